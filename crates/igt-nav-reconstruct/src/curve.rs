//! Smooth tube meshes through ordered points.

use std::f64::consts::TAU;

use igt_nav_core::TriangleMesh;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::ReconstructError;

/// Consecutive points closer than this are merged before fitting.
const DUPLICATE_EPS_MM: f64 = 1e-6;

/// Turns an ordered point list into a surface mesh.
///
/// Implementations run on the reconstruction worker thread.
pub trait CurveModeler: Send + Sync {
    fn build(&self, points: &[Point3<f64>]) -> Result<TriangleMesh, ReconstructError>;
}

/// Tube geometry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TubeParams {
    pub radius_mm: f64,
    /// Vertices around each ring.
    pub sides: usize,
    /// Curve samples between two consecutive input points.
    pub samples_per_segment: usize,
}

impl Default for TubeParams {
    fn default() -> Self {
        Self {
            radius_mm: 1.0,
            sides: 8,
            samples_per_segment: 5,
        }
    }
}

/// Catmull-Rom spline through the points, swept by a circular tube.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TubeCurveModeler {
    pub params: TubeParams,
}

impl TubeCurveModeler {
    pub fn new(params: TubeParams) -> Self {
        Self { params }
    }
}

impl CurveModeler for TubeCurveModeler {
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(points = points.len())))]
    fn build(&self, points: &[Point3<f64>]) -> Result<TriangleMesh, ReconstructError> {
        let p = &self.params;
        if p.sides < 3 || p.samples_per_segment == 0 || !p.radius_mm.is_finite() || p.radius_mm <= 0.0 {
            return Err(ReconstructError::InvalidTube(*p));
        }
        let cleaned = remove_consecutive_duplicates(points);
        if cleaned.len() < 2 {
            return Err(ReconstructError::TooFewPoints { got: cleaned.len() });
        }
        let centerline = catmull_rom(&cleaned, p.samples_per_segment);
        Ok(sweep_tube(&centerline, p.radius_mm, p.sides))
    }
}

pub(crate) fn remove_consecutive_duplicates(points: &[Point3<f64>]) -> Vec<Point3<f64>> {
    let mut out: Vec<Point3<f64>> = Vec::with_capacity(points.len());
    for p in points {
        match out.last() {
            Some(last) if (p - last).norm() < DUPLICATE_EPS_MM => {}
            _ => out.push(*p),
        }
    }
    out
}

/// Uniform Catmull-Rom samples, end points repeated as phantom neighbours.
///
/// Passes through every input point: sample `k * samples_per_segment` is
/// `points[k]`.
pub fn catmull_rom(points: &[Point3<f64>], samples_per_segment: usize) -> Vec<Point3<f64>> {
    let n = points.len();
    if n < 2 {
        return points.to_vec();
    }
    let s = samples_per_segment.max(1);
    let mut out = Vec::with_capacity((n - 1) * s + 1);
    for i in 0..n - 1 {
        let p0 = points[i.saturating_sub(1)].coords;
        let p1 = points[i].coords;
        let p2 = points[i + 1].coords;
        let p3 = points[(i + 2).min(n - 1)].coords;
        for k in 0..s {
            let t = k as f64 / s as f64;
            let t2 = t * t;
            let t3 = t2 * t;
            let c = (p1 * 2.0
                + (p2 - p0) * t
                + (p0 * 2.0 - p1 * 5.0 + p2 * 4.0 - p3) * t2
                + (p1 * 3.0 - p0 - p2 * 3.0 + p3) * t3)
                * 0.5;
            out.push(Point3::from(c));
        }
    }
    out.push(points[n - 1]);
    out
}

fn any_normal(t: &Vector3<f64>) -> Vector3<f64> {
    let axis = if t.x.abs() <= t.y.abs() && t.x.abs() <= t.z.abs() {
        Vector3::x()
    } else if t.y.abs() <= t.z.abs() {
        Vector3::y()
    } else {
        Vector3::z()
    };
    t.cross(&axis)
        .try_normalize(f64::EPSILON)
        .unwrap_or_else(Vector3::y)
}

/// Tangents by central differences; degenerate ones reuse the previous.
fn tangents(centerline: &[Point3<f64>]) -> Vec<Vector3<f64>> {
    let n = centerline.len();
    let mut out = Vec::with_capacity(n);
    let mut previous = Vector3::x();
    for i in 0..n {
        let a = centerline[i.saturating_sub(1)];
        let b = centerline[(i + 1).min(n - 1)];
        let t = (b - a).try_normalize(f64::EPSILON).unwrap_or(previous);
        out.push(t);
        previous = t;
    }
    out
}

/// Rings of `sides` vertices around each centerline sample, oriented with a
/// parallel-transported frame, joined by two triangles per quad. Open ends.
pub fn sweep_tube(centerline: &[Point3<f64>], radius: f64, sides: usize) -> TriangleMesh {
    let mut mesh = TriangleMesh::new();
    if centerline.len() < 2 || sides < 3 {
        return mesh;
    }
    let tangents = tangents(centerline);
    let mut normal = any_normal(&tangents[0]);

    for (c, t) in centerline.iter().zip(&tangents) {
        normal = (normal - t * normal.dot(t))
            .try_normalize(f64::EPSILON)
            .unwrap_or_else(|| any_normal(t));
        let binormal = t.cross(&normal);
        for j in 0..sides {
            let a = TAU * j as f64 / sides as f64;
            let v = c + (normal * a.cos() + binormal * a.sin()) * radius;
            mesh.vertices
                .push(Point3::new(v.x as f32, v.y as f32, v.z as f32));
        }
    }

    let sides_u = sides as u32;
    for ring in 0..(centerline.len() - 1) as u32 {
        let base = ring * sides_u;
        let next = base + sides_u;
        for j in 0..sides_u {
            let j1 = (j + 1) % sides_u;
            mesh.triangles.push([base + j, base + j1, next + j]);
            mesh.triangles.push([base + j1, next + j1, next + j]);
        }
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line(n: usize, step: f64) -> Vec<Point3<f64>> {
        (0..n)
            .map(|i| Point3::new(step * i as f64, 0.0, 0.0))
            .collect()
    }

    #[test]
    fn spline_interpolates_control_points() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(10.0, 5.0, 0.0),
            Point3::new(20.0, 0.0, 3.0),
            Point3::new(30.0, -2.0, 1.0),
        ];
        let samples = catmull_rom(&points, 4);
        assert_eq!(samples.len(), 3 * 4 + 1);
        for (k, p) in points.iter().enumerate() {
            assert_relative_eq!(samples[k * 4], *p, epsilon = 1e-12);
        }
    }

    #[test]
    fn straight_line_gives_straight_tube() {
        let modeler = TubeCurveModeler::default();
        let mesh = modeler.build(&line(3, 10.0)).unwrap();
        // 11 rings of 8
        assert_eq!(mesh.vertex_count(), 88);
        assert_eq!(mesh.triangle_count(), 10 * 8 * 2);
        for v in &mesh.vertices {
            let r = (v.y * v.y + v.z * v.z).sqrt();
            assert!((r - 1.0).abs() < 1e-5, "vertex {v:?} off the tube");
        }
        let (lo, hi) = mesh.bounds().unwrap();
        assert!(lo.x.abs() < 1e-5 && (hi.x - 20.0).abs() < 1e-5);
    }

    #[test]
    fn duplicates_are_cleaned_before_fitting() {
        let mut points = line(2, 10.0);
        points.insert(1, points[0]);
        points.push(points[2]);
        assert_eq!(remove_consecutive_duplicates(&points).len(), 2);
        let mesh = TubeCurveModeler::default().build(&points).unwrap();
        assert_eq!(mesh.vertex_count(), 6 * 8);
    }

    #[test]
    fn too_few_points_or_bad_params_are_errors() {
        let modeler = TubeCurveModeler::default();
        let p = Point3::new(1.0, 1.0, 1.0);
        assert!(matches!(
            modeler.build(&[p, p]),
            Err(ReconstructError::TooFewPoints { got: 1 })
        ));
        let thin = TubeCurveModeler::new(TubeParams {
            sides: 2,
            ..TubeParams::default()
        });
        assert!(matches!(
            thin.build(&line(3, 1.0)),
            Err(ReconstructError::InvalidTube(_))
        ));
    }

    #[test]
    fn bent_path_keeps_ring_radius() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(10.0, 0.0, 0.0),
            Point3::new(10.0, 10.0, 0.0),
            Point3::new(10.0, 10.0, 10.0),
        ];
        let params = TubeParams {
            radius_mm: 2.0,
            sides: 6,
            samples_per_segment: 3,
        };
        let centerline = catmull_rom(&points, 3);
        let mesh = sweep_tube(&centerline, params.radius_mm, params.sides);
        for (ring, c) in centerline.iter().enumerate() {
            for j in 0..6 {
                let v = mesh.vertices[ring * 6 + j];
                let d = Vector3::new(v.x as f64 - c.x, v.y as f64 - c.y, v.z as f64 - c.z);
                assert_relative_eq!(d.norm(), 2.0, epsilon = 1e-4);
            }
        }
    }
}
