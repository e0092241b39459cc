use std::sync::{Arc, PoisonError, RwLock};

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Indexed triangle mesh in millimeters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3<f32>>,
    pub triangles: Vec<[u32; 3]>,
}

impl TriangleMesh {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Merge `other` into this mesh, re-indexing its triangles.
    pub fn append(&mut self, other: &TriangleMesh) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.triangles.extend(
            other
                .triangles
                .iter()
                .map(|[a, b, c]| [a + base, b + base, c + base]),
        );
    }

    /// Axis-aligned bounds `(min, max)`, or `None` for a mesh without vertices.
    pub fn bounds(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        let first = *self.vertices.first()?;
        let mut lo = first;
        let mut hi = first;
        for v in &self.vertices[1..] {
            for k in 0..3 {
                lo[k] = lo[k].min(v[k]);
                hi[k] = hi[k].max(v[k]);
            }
        }
        Some((lo, hi))
    }

    pub fn translate(&mut self, offset: &Vector3<f32>) {
        for v in &mut self.vertices {
            *v += offset;
        }
    }
}

/// Closed cylinder centered at `center` with its axis along z.
///
/// The side wall has `resolution` facets; both ends are capped with a
/// triangle fan.
pub fn cylinder_along_z(
    center: Point3<f32>,
    radius: f32,
    height: f32,
    resolution: usize,
) -> TriangleMesh {
    let n = resolution.max(3);
    let half = 0.5 * height;
    let mut mesh = TriangleMesh {
        vertices: Vec::with_capacity(2 * n + 2),
        triangles: Vec::with_capacity(4 * n),
    };

    for z in [-half, half] {
        for k in 0..n {
            let a = std::f32::consts::TAU * k as f32 / n as f32;
            mesh.vertices.push(Point3::new(
                center.x + radius * a.cos(),
                center.y + radius * a.sin(),
                center.z + z,
            ));
        }
    }
    let bottom_center = (2 * n) as u32;
    let top_center = bottom_center + 1;
    mesh.vertices.push(Point3::new(center.x, center.y, center.z - half));
    mesh.vertices.push(Point3::new(center.x, center.y, center.z + half));

    let n32 = n as u32;
    for k in 0..n32 {
        let next = (k + 1) % n32;
        // side wall
        mesh.triangles.push([k, next, n32 + next]);
        mesh.triangles.push([k, n32 + next, n32 + k]);
        // caps, wound outward
        mesh.triangles.push([bottom_center, next, k]);
        mesh.triangles.push([top_center, n32 + k, n32 + next]);
    }
    mesh
}

/// UV sphere with `resolution` segments around the z axis and half as many
/// from pole to pole.
pub fn sphere(center: Point3<f32>, radius: f32, resolution: usize) -> TriangleMesh {
    use std::f32::consts::{PI, TAU};

    let around = resolution.max(3);
    let rings = (around / 2).max(2);
    let mut mesh = TriangleMesh::new();
    mesh.vertices.push(center + Vector3::new(0.0, 0.0, radius));
    for r in 1..rings {
        let polar = PI * r as f32 / rings as f32;
        for k in 0..around {
            let azimuth = TAU * k as f32 / around as f32;
            mesh.vertices.push(
                center
                    + Vector3::new(
                        polar.sin() * azimuth.cos(),
                        polar.sin() * azimuth.sin(),
                        polar.cos(),
                    ) * radius,
            );
        }
    }
    mesh.vertices.push(center - Vector3::new(0.0, 0.0, radius));

    let n = around as u32;
    let south = mesh.vertices.len() as u32 - 1;
    let ring_start = |r: u32| 1 + r * n;
    for k in 0..n {
        let next = (k + 1) % n;
        mesh.triangles.push([0, ring_start(0) + k, ring_start(0) + next]);
        let last = ring_start(rings as u32 - 2);
        mesh.triangles.push([south, last + next, last + k]);
    }
    for r in 0..rings as u32 - 2 {
        let (upper, lower) = (ring_start(r), ring_start(r + 1));
        for k in 0..n {
            let next = (k + 1) % n;
            mesh.triangles.push([upper + k, lower + k, lower + next]);
            mesh.triangles.push([upper + k, lower + next, upper + next]);
        }
    }
    mesh
}

/// Mesh slot shared between a model node and a background writer.
#[derive(Clone, Debug, Default)]
pub struct SharedMesh {
    inner: Arc<RwLock<Option<TriangleMesh>>>,
}

impl SharedMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored mesh.
    pub fn set(&self, mesh: TriangleMesh) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(mesh);
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }

    /// Clone of the current mesh, if any.
    pub fn snapshot(&self) -> Option<TriangleMesh> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_set(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cylinder_has_expected_topology_and_extent() {
        let mesh = cylinder_along_z(Point3::new(5.0, -5.0, -80.0), 1.0, 80.0, 6);
        assert_eq!(mesh.vertex_count(), 14);
        assert_eq!(mesh.triangle_count(), 24);
        let (lo, hi) = mesh.bounds().expect("bounds");
        assert!((lo.z + 120.0).abs() < 1e-4);
        assert!((hi.z + 40.0).abs() < 1e-4);
        assert!((hi.x - 6.0).abs() < 1e-4);
        assert!((lo.y + 5.0 + 0.75_f32.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn sphere_vertices_lie_on_the_surface() {
        let center = Point3::new(1.0, 2.0, 3.0);
        let mesh = sphere(center, 0.75, 12);
        // poles plus 5 rings of 12
        assert_eq!(mesh.vertex_count(), 62);
        assert_eq!(mesh.triangle_count(), 2 * 12 + 4 * 2 * 12);
        for v in &mesh.vertices {
            assert!(((v - center).norm() - 0.75).abs() < 1e-5);
        }
        let max_index = mesh.triangles.iter().flatten().copied().max().unwrap();
        assert_eq!(max_index as usize, mesh.vertex_count() - 1);
    }

    #[test]
    fn append_reindexes_triangles() {
        let a = cylinder_along_z(Point3::origin(), 1.0, 2.0, 4);
        let mut merged = a.clone();
        merged.append(&a);
        assert_eq!(merged.vertex_count(), 2 * a.vertex_count());
        let max_index = merged.triangles.iter().flatten().copied().max().unwrap();
        assert_eq!(max_index as usize, merged.vertex_count() - 1);
    }

    #[test]
    fn shared_mesh_is_visible_through_clones() {
        let slot = SharedMesh::new();
        let writer = slot.clone();
        assert!(!slot.is_set());
        writer.set(cylinder_along_z(Point3::origin(), 1.0, 1.0, 3));
        assert!(slot.is_set());
        slot.clear();
        assert!(writer.snapshot().is_none());
    }
}
