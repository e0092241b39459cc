//! JSON configuration of a navigation session.

use std::fs;
use std::path::Path;

use igt_nav_calib::CalibrationParams;
use igt_nav_collect::CollectorConfig;
use igt_nav_core::DEFAULT_CONFIGURATION;
use igt_nav_grid::{GridExtents, GridPattern, GridSpacing, GridSpec};
use igt_nav_reconstruct::TubeParams;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum NavIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Upper bound of points on one side of the grid origin.
pub const MAX_GRID_POINTS_PER_SIDE: u32 = 10;
pub const MIN_GRID_SPACING_MM: u32 = 1;
pub const MAX_GRID_SPACING_MM: u32 = 20;

/// Side of the insertion grid, as seen in the grid plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GridSide {
    Left,
    Right,
    Up,
    Down,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GridAxis {
    Horizontal,
    Vertical,
}

/// Grid size as whole point counts and spacings, adjusted one step at a
/// time within fixed bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridPlanConfig {
    pub pattern: GridPattern,
    pub left_points: u32,
    pub right_points: u32,
    pub up_points: u32,
    pub down_points: u32,
    pub horizontal_spacing_mm: u32,
    pub vertical_spacing_mm: u32,
}

impl Default for GridPlanConfig {
    fn default() -> Self {
        Self {
            pattern: GridPattern::Triangular,
            left_points: 2,
            right_points: 2,
            up_points: 2,
            down_points: 2,
            horizontal_spacing_mm: 10,
            vertical_spacing_mm: 10,
        }
    }
}

impl GridPlanConfig {
    fn points_mut(&mut self, side: GridSide) -> &mut u32 {
        match side {
            GridSide::Left => &mut self.left_points,
            GridSide::Right => &mut self.right_points,
            GridSide::Up => &mut self.up_points,
            GridSide::Down => &mut self.down_points,
        }
    }

    fn spacing_mut(&mut self, axis: GridAxis) -> &mut u32 {
        match axis {
            GridAxis::Horizontal => &mut self.horizontal_spacing_mm,
            GridAxis::Vertical => &mut self.vertical_spacing_mm,
        }
    }

    /// One more point on `side`; returns false at the upper bound.
    pub fn grow(&mut self, side: GridSide) -> bool {
        let n = self.points_mut(side);
        if *n >= MAX_GRID_POINTS_PER_SIDE {
            return false;
        }
        *n += 1;
        true
    }

    /// One point less on `side`; returns false when already empty.
    pub fn shrink(&mut self, side: GridSide) -> bool {
        let n = self.points_mut(side);
        if *n == 0 {
            return false;
        }
        *n -= 1;
        true
    }

    pub fn widen_spacing(&mut self, axis: GridAxis) -> bool {
        let s = self.spacing_mut(axis);
        if *s >= MAX_GRID_SPACING_MM {
            return false;
        }
        *s += 1;
        true
    }

    pub fn narrow_spacing(&mut self, axis: GridAxis) -> bool {
        let s = self.spacing_mut(axis);
        if *s <= MIN_GRID_SPACING_MM {
            return false;
        }
        *s -= 1;
        true
    }

    /// Extents are point count times spacing on each side.
    pub fn to_spec(&self) -> GridSpec {
        let h = self.horizontal_spacing_mm as f64;
        let v = self.vertical_spacing_mm as f64;
        GridSpec {
            pattern: self.pattern,
            extents: GridExtents {
                left: self.left_points as f64 * h,
                right: self.right_points as f64 * h,
                up: self.up_points as f64 * v,
                down: self.down_points as f64 * v,
            },
            spacing: GridSpacing {
                horizontal: h,
                vertical: v,
            },
        }
    }
}

fn default_configuration() -> String {
    DEFAULT_CONFIGURATION.to_owned()
}

fn default_path_collection() -> CollectorConfig {
    CollectorConfig {
        minimum_add_distance_mm: 1.0,
        allow_point_removals: true,
        force_constant_point_distance: false,
    }
}

/// Everything a [`crate::CathNavSession`] needs besides the stored settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// Settings configuration transforms and thresholds are read from.
    #[serde(default = "default_configuration")]
    pub configuration: String,
    #[serde(default = "default_path_collection")]
    pub path_collection: CollectorConfig,
    /// Calibration defaults; values already stored in the settings win.
    #[serde(default)]
    pub calibration: CalibrationParams,
    #[serde(default)]
    pub grid: GridPlanConfig,
    #[serde(default)]
    pub tube: TubeParams,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            configuration: default_configuration(),
            path_collection: default_path_collection(),
            calibration: CalibrationParams::default(),
            grid: GridPlanConfig::default(),
            tube: TubeParams::default(),
        }
    }
}

impl NavigationConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, NavIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), NavIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
