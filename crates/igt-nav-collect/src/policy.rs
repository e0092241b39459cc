//! Point maintenance policy, independent of any scene.
//!
//! The last point of a collected list is a live preview of the tool
//! position. Earlier points are settled. A new point is committed once the
//! tool has travelled `minimum_add_distance_mm` away from the last settled
//! point; with removals enabled the newest settled point is dropped again
//! when the tool comes back within that distance of the point before it.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Collection parameters. Changes apply from the next update on.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Travel needed before a new point is committed, in millimeters.
    pub minimum_add_distance_mm: f64,
    /// Un-commit the newest point when the tool backtracks.
    pub allow_point_removals: bool,
    /// Snap each committed point to exactly `minimum_add_distance_mm` from
    /// its predecessor along the travelled direction.
    pub force_constant_point_distance: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            minimum_add_distance_mm: 5.0,
            allow_point_removals: false,
            force_constant_point_distance: false,
        }
    }
}

/// List edit decided for one position update, before the preview move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointEdit {
    /// Append the current position. `snap` optionally relocates the current
    /// last point first: `(index, new_position)`.
    Add {
        snap: Option<(usize, Point3<f64>)>,
    },
    /// Delete the last point.
    Remove,
    /// Only move the preview point.
    Move,
}

/// Distances from the current position to the 2nd- and 3rd-from-last points,
/// 0 where the list is too short.
pub fn trailing_distances(points: &[Point3<f64>], current: &Point3<f64>) -> (f64, f64) {
    let n = points.len();
    let dist_n2 = if n >= 2 {
        (current - points[n - 2]).norm()
    } else {
        0.0
    };
    let dist_n3 = if n >= 3 {
        (current - points[n - 3]).norm()
    } else {
        0.0
    };
    (dist_n2, dist_n3)
}

/// Decide how the list changes for a tool at `current`.
pub fn plan_edit(
    points: &[Point3<f64>],
    current: &Point3<f64>,
    config: &CollectorConfig,
) -> PointEdit {
    let n = points.len();
    let (dist_n2, dist_n3) = trailing_distances(points, current);
    let min = config.minimum_add_distance_mm;

    let add = n < 2 || dist_n2 >= min;
    if add {
        let snap = if config.force_constant_point_distance && n >= 2 {
            Some((n - 1, snap_to_distance(&points[n - 2], &points[n - 1], min)))
        } else {
            None
        };
        return PointEdit::Add { snap };
    }

    let remove = config.allow_point_removals && n >= 3 && dist_n3 < min;
    if remove {
        PointEdit::Remove
    } else {
        PointEdit::Move
    }
}

/// Position `distance` away from `anchor` in the direction of `point`.
///
/// A point coincident with `anchor` has no direction and is returned as is.
pub fn snap_to_distance(anchor: &Point3<f64>, point: &Point3<f64>, distance: f64) -> Point3<f64> {
    let trajectory = point - anchor;
    match trajectory.try_normalize(f64::EPSILON) {
        Some(dir) => anchor + dir * distance,
        None => *point,
    }
}

/// Apply one update to an in-memory list, preview move included.
pub fn apply_to_list(
    points: &mut Vec<Point3<f64>>,
    current: Point3<f64>,
    config: &CollectorConfig,
) -> PointEdit {
    let edit = plan_edit(points, &current, config);
    match edit {
        PointEdit::Add { snap } => {
            if let Some((index, p)) = snap {
                points[index] = p;
            }
            points.push(current);
        }
        PointEdit::Remove => {
            points.pop();
        }
        PointEdit::Move => {}
    }
    if let Some(last) = points.last_mut() {
        *last = current;
    }
    edit
}
