use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

use igt_nav_core::{cylinder_along_z, TriangleMesh};

/// Cylinder length for one planned insertion, in millimeters.
pub const CYLINDER_HEIGHT_MM: f32 = 80.0;
/// Cylinder radius for one planned insertion, in millimeters.
pub const CYLINDER_RADIUS_MM: f32 = 1.0;
/// Facets around each cylinder.
pub const CYLINDER_RESOLUTION: usize = 6;

/// Point arrangement of the grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridPattern {
    #[default]
    Rectangular,
    /// Odd rows shifted by half a horizontal spacing.
    Triangular,
}

/// How far the grid reaches from its origin on each side, in millimeters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridExtents {
    pub left: f64,
    pub right: f64,
    pub up: f64,
    pub down: f64,
}

impl GridExtents {
    pub fn uniform(mm: f64) -> Self {
        Self {
            left: mm,
            right: mm,
            up: mm,
            down: mm,
        }
    }
}

/// Distance between neighbouring grid points, in millimeters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpacing {
    pub horizontal: f64,
    pub vertical: f64,
}

impl Default for GridSpacing {
    fn default() -> Self {
        Self {
            horizontal: 10.0,
            vertical: 10.0,
        }
    }
}

/// Full grid description.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    pub pattern: GridPattern,
    pub extents: GridExtents,
    pub spacing: GridSpacing,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("grid extent '{side}' must be finite and >= 0, got {value}")]
    InvalidExtent { side: &'static str, value: f64 },
    #[error("grid spacing '{axis}' must be finite and > 0, got {value}")]
    InvalidSpacing { axis: &'static str, value: f64 },
}

/// Integer column/row ranges of a validated spec, in spacing units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatticeSteps {
    pub left: i64,
    pub right: i64,
    pub down: i64,
    pub up: i64,
}

impl GridSpec {
    pub fn validate(&self) -> Result<(), GridError> {
        let e = &self.extents;
        for (side, value) in [
            ("left", e.left),
            ("right", e.right),
            ("up", e.up),
            ("down", e.down),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(GridError::InvalidExtent { side, value });
            }
        }
        for (axis, value) in [
            ("horizontal", self.spacing.horizontal),
            ("vertical", self.spacing.vertical),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(GridError::InvalidSpacing { axis, value });
            }
        }
        Ok(())
    }

    /// Whole spacings that fit inside each extent.
    pub fn steps(&self) -> Result<LatticeSteps, GridError> {
        self.validate()?;
        let h = self.spacing.horizontal;
        let v = self.spacing.vertical;
        Ok(LatticeSteps {
            left: (self.extents.left / h).floor() as i64,
            right: (self.extents.right / h).floor() as i64,
            down: (self.extents.down / v).floor() as i64,
            up: (self.extents.up / v).floor() as i64,
        })
    }

    /// `(lower, upper)` horizontal bound: multiples of the spacing that never
    /// exceed the requested extent.
    pub fn horizontal_bounds(&self) -> Result<(f64, f64), GridError> {
        let s = self.steps()?;
        let h = self.spacing.horizontal;
        Ok((-(s.left as f64) * h, s.right as f64 * h))
    }

    /// `(lower, upper)` vertical bound.
    pub fn vertical_bounds(&self) -> Result<(f64, f64), GridError> {
        let s = self.steps()?;
        let v = self.spacing.vertical;
        Ok((-(s.down as f64) * v, s.up as f64 * v))
    }
}

/// Enumerate grid points row by row (y ascending, then x ascending).
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug"))]
pub fn generate_lattice(spec: &GridSpec) -> Result<Vec<Point2<f64>>, GridError> {
    let s = spec.steps()?;
    let h = spec.spacing.horizontal;
    let v = spec.spacing.vertical;
    let upper_x = s.right as f64 * h;

    let mut points = Vec::new();
    for row in -s.down..=s.up {
        let y = row as f64 * v;
        let odd_row = ((y / v).round() as i64).rem_euclid(2) == 1;
        let offset = match spec.pattern {
            GridPattern::Triangular if odd_row => 0.5 * h,
            _ => 0.0,
        };
        for col in -s.left..=s.right {
            let x = col as f64 * h + offset;
            if x > upper_x {
                break;
            }
            points.push(Point2::new(x, y));
        }
    }
    Ok(points)
}

/// One cylinder per lattice point, along the depth axis and centered one
/// cylinder length below the grid plane, merged into a single mesh.
pub fn lattice_mesh(points: &[Point2<f64>]) -> TriangleMesh {
    let mut mesh = TriangleMesh::new();
    for p in points {
        let center = Point3::new(p.x as f32, p.y as f32, -CYLINDER_HEIGHT_MM);
        mesh.append(&cylinder_along_z(
            center,
            CYLINDER_RADIUS_MM,
            CYLINDER_HEIGHT_MM,
            CYLINDER_RESOLUTION,
        ));
    }
    mesh
}
