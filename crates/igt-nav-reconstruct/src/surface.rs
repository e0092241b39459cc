//! Closed surfaces around unordered point sets, kept in sync with a point
//! list of the scene.
//!
//! Used for structures outlined by hand in ultrasound, e.g. a seroma or the
//! chest wall: every change of the list rebuilds the model from all of its
//! points.

use igt_nav_core::{NodeEvent, NodeId, Scene, Subscription, TriangleMesh};
use log::{debug, warn};
use nalgebra::{Point3, Vector3};

use crate::curve::remove_consecutive_duplicates;
use crate::ReconstructError;

/// Turns an unordered point set into a closed surface mesh.
pub trait SurfaceModeler: Send + Sync {
    fn build(&self, points: &[Point3<f64>]) -> Result<TriangleMesh, ReconstructError>;
}

/// Convex hull of the points.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ConvexHullModeler;

impl SurfaceModeler for ConvexHullModeler {
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(points = points.len())))]
    fn build(&self, points: &[Point3<f64>]) -> Result<TriangleMesh, ReconstructError> {
        let cleaned = remove_duplicates(points);
        if cleaned.len() < 4 {
            return Err(ReconstructError::TooFewPoints { got: cleaned.len() });
        }
        let faces = convex_hull(&cleaned).ok_or(ReconstructError::FlatPoints {
            got: cleaned.len(),
        })?;
        Ok(compact_mesh(&cleaned, &faces))
    }
}

fn remove_duplicates(points: &[Point3<f64>]) -> Vec<Point3<f64>> {
    let mut out = remove_consecutive_duplicates(points);
    let mut i = 0;
    while i < out.len() {
        let p = out[i];
        let seen = out[..i].iter().any(|q| (p - q).norm() < 1e-6);
        if seen {
            out.remove(i);
        } else {
            i += 1;
        }
    }
    out
}

fn normal(points: &[Point3<f64>], [a, b, c]: [usize; 3]) -> Vector3<f64> {
    (points[b] - points[a]).cross(&(points[c] - points[a]))
}

/// Index of the point maximizing `score`.
fn arg_max(points: &[Point3<f64>], score: impl Fn(&Point3<f64>) -> f64) -> (usize, f64) {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| (i, score(p)))
        .fold((0, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
}

/// Outward-wound triangles of the convex hull, as indices into `points`.
///
/// Incremental construction from the most spread-out tetrahedron. `None`
/// when the points are collinear or coplanar.
pub fn convex_hull(points: &[Point3<f64>]) -> Option<Vec<[usize; 3]>> {
    if points.len() < 4 {
        return None;
    }
    let extent = points
        .iter()
        .map(|p| (p - points[0]).norm())
        .fold(0.0, f64::max);
    let eps = 1e-9 * extent.max(1.0);

    let a = 0;
    let (b, d_ab) = arg_max(points, |p| (p - points[a]).norm());
    let axis = (points[b] - points[a]) / d_ab.max(f64::MIN_POSITIVE);
    let (c, d_line) = arg_max(points, |p| (p - points[a]).cross(&axis).norm());
    let plane = normal(points, [a, b, c]);
    let plane_norm = plane.norm();
    if d_ab <= eps || d_line <= eps || plane_norm <= eps * eps {
        return None;
    }
    let plane = plane / plane_norm;
    let (d, d_plane) = arg_max(points, |p| (p - points[a]).dot(&plane).abs());
    if d_plane <= eps {
        return None;
    }

    let inside = Point3::from((points[a].coords + points[b].coords + points[c].coords + points[d].coords) / 4.0);
    let mut faces: Vec<[usize; 3]> = Vec::new();
    for mut f in [[a, b, c], [a, b, d], [a, c, d], [b, c, d]] {
        if normal(points, f).dot(&(points[f[0]] - inside)) < 0.0 {
            f.swap(1, 2);
        }
        faces.push(f);
    }

    for (i, p) in points.iter().enumerate() {
        if [a, b, c, d].contains(&i) {
            continue;
        }
        let visible: Vec<bool> = faces
            .iter()
            .map(|&f| normal(points, f).normalize().dot(&(p - points[f[0]])) > eps)
            .collect();
        if !visible.contains(&true) {
            continue;
        }
        // edges of visible faces not shared with another visible face
        let mut horizon: Vec<(usize, usize)> = Vec::new();
        for (f, _) in faces.iter().zip(&visible).filter(|(_, v)| **v) {
            for k in 0..3 {
                let edge = (f[k], f[(k + 1) % 3]);
                match horizon.iter().position(|&e| e == (edge.1, edge.0)) {
                    Some(shared) => {
                        horizon.swap_remove(shared);
                    }
                    None => horizon.push(edge),
                }
            }
        }
        let mut kept: Vec<[usize; 3]> = faces
            .iter()
            .zip(&visible)
            .filter(|(_, v)| !**v)
            .map(|(f, _)| *f)
            .collect();
        kept.extend(horizon.into_iter().map(|(u, v)| [u, v, i]));
        faces = kept;
    }
    Some(faces)
}

/// Mesh holding only the vertices referenced by `faces`.
fn compact_mesh(points: &[Point3<f64>], faces: &[[usize; 3]]) -> TriangleMesh {
    let mut remap = vec![u32::MAX; points.len()];
    let mut mesh = TriangleMesh::new();
    for face in faces {
        let mut tri = [0u32; 3];
        for (slot, &index) in tri.iter_mut().zip(face) {
            if remap[index] == u32::MAX {
                remap[index] = mesh.vertices.len() as u32;
                let p = points[index];
                mesh.vertices.push(Point3::new(p.x as f32, p.y as f32, p.z as f32));
            }
            *slot = remap[index];
        }
        mesh.triangles.push(tri);
    }
    mesh
}

/// What a change of an observed point list led to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceUpdate {
    Rebuilt { triangles: usize },
    /// The points no longer enclose a volume; the model mesh was emptied.
    Cleared,
}

/// Keeps a model node wrapped around the points of a list.
///
/// Rebuilds run synchronously in [`SurfaceUpdater::process_pending`]; hand
/// outlined point sets stay small.
#[derive(Debug)]
pub struct SurfaceUpdater<M> {
    modeler: M,
    list: NodeId,
    model: NodeId,
    subscription: Option<Subscription>,
}

impl<M: SurfaceModeler> SurfaceUpdater<M> {
    /// Observe `list` and keep `model` in sync with it from now on.
    pub fn new(scene: &mut Scene, modeler: M, list: NodeId, model: NodeId) -> Result<Self, ReconstructError> {
        scene.points(list)?;
        scene.model_mesh(model)?;
        Ok(Self {
            modeler,
            list,
            model,
            subscription: Some(scene.subscribe([list])),
        })
    }

    pub fn list(&self) -> NodeId {
        self.list
    }

    pub fn model(&self) -> NodeId {
        self.model
    }

    pub fn is_observing(&self) -> bool {
        self.subscription.is_some()
    }

    /// Rebuild once if the list changed since the last call.
    pub fn process_pending(&mut self, scene: &mut Scene) -> Result<Option<SurfaceUpdate>, ReconstructError> {
        let Some(sub) = &self.subscription else {
            return Ok(None);
        };
        let events = sub.drain();
        if events.iter().any(|e| matches!(e, NodeEvent::Removed(_))) {
            warn!("point list {} was removed; surface {} is no longer updated", self.list, self.model);
            self.stop(scene);
            return Ok(None);
        }
        if events.is_empty() {
            return Ok(None);
        }
        self.rebuild(scene).map(Some)
    }

    /// Rebuild the model from the current points.
    pub fn rebuild(&mut self, scene: &mut Scene) -> Result<SurfaceUpdate, ReconstructError> {
        let points = scene.points(self.list)?;
        match self.modeler.build(points) {
            Ok(mesh) => {
                let triangles = mesh.triangle_count();
                scene.set_model_mesh(self.model, mesh)?;
                debug!("surface {} rebuilt with {triangles} triangles", self.model);
                Ok(SurfaceUpdate::Rebuilt { triangles })
            }
            Err(ReconstructError::TooFewPoints { .. } | ReconstructError::FlatPoints { .. }) => {
                scene.set_model_mesh(self.model, TriangleMesh::new())?;
                Ok(SurfaceUpdate::Cleared)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the newest point. `None` on an empty list.
    pub fn delete_last(&mut self, scene: &mut Scene) -> Result<Option<Point3<f64>>, ReconstructError> {
        let count = scene.point_count(self.list)?;
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(scene.remove_point(self.list, count - 1)?))
    }

    pub fn delete_all(&mut self, scene: &mut Scene) -> Result<(), ReconstructError> {
        scene.clear_points(self.list)?;
        Ok(())
    }

    /// End observation. A no-op when already stopped.
    pub fn stop(&mut self, scene: &mut Scene) {
        if let Some(sub) = self.subscription.take() {
            scene.unsubscribe(sub.id());
        }
    }
}
