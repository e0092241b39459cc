//! Live path reconstruction while points are collected.
//!
//! The live point list is observed; when it changes and holds more than
//! [`MIN_POINTS_FOR_RECONSTRUCTION`] points, a worker thread rebuilds the
//! path model from a snapshot. Only one worker runs at a time and changes
//! arriving meanwhile are dropped, not queued: the next change after the
//! worker finishes picks up the latest points anyway.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use igt_nav_core::{ModelDisplay, NodeEvent, NodeId, Scene, SharedMesh, Subscription};
use log::{debug, error, info, warn};
use nalgebra::Point3;

use crate::curve::CurveModeler;
use crate::ReconstructError;

/// A path is rebuilt only once the live list holds more points than this.
pub const MIN_POINTS_FOR_RECONSTRUCTION: usize = 10;

pub fn path_model_name(path_number: usize) -> String {
    format!("Catheter{path_number}")
}

pub fn raw_path_list_name(path_number: usize) -> String {
    format!("WirePoints_Needle_RawPath{path_number}")
}

fn path_display() -> ModelDisplay {
    ModelDisplay {
        color: [0.0, 1.0, 0.0],
        opacity: 0.3,
        backface_culling: false,
        slice_intersection_visible: true,
        ..ModelDisplay::default()
    }
}

/// What a change of the live list led to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// A worker was started for the current points.
    Spawned,
    /// A worker is still running; the change was dropped.
    Busy,
    TooFewPoints,
}

/// Result of [`PathReconstructor::stop_path`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchivedPath {
    pub path_number: usize,
    /// Copy of the raw points.
    pub raw_list: NodeId,
    pub model: NodeId,
    pub point_count: usize,
}

type Worker = JoinHandle<Result<usize, ReconstructError>>;

/// Rebuilds the model of the current path in the background.
pub struct PathReconstructor<M> {
    modeler: Arc<M>,
    live_list: NodeId,
    path_number: usize,
    subscription: Option<Subscription>,
    worker: Option<Worker>,
}

impl<M> std::fmt::Debug for PathReconstructor<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathReconstructor")
            .field("live_list", &self.live_list)
            .field("path_number", &self.path_number)
            .field("observing", &self.subscription.is_some())
            .field("worker", &self.worker.is_some())
            .finish()
    }
}

impl<M: CurveModeler + 'static> PathReconstructor<M> {
    /// Paths are numbered from 1.
    pub fn new(modeler: M, live_list: NodeId) -> Self {
        Self {
            modeler: Arc::new(modeler),
            live_list,
            path_number: 1,
            subscription: None,
            worker: None,
        }
    }

    pub fn live_list(&self) -> NodeId {
        self.live_list
    }

    /// Number of the path currently being collected.
    pub fn path_number(&self) -> usize {
        self.path_number
    }

    pub fn is_observing(&self) -> bool {
        self.subscription.is_some()
    }

    /// A worker has been started and has not finished yet.
    pub fn is_reconstructing(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Start observing the live list for a new path.
    pub fn start_path(&mut self, scene: &mut Scene) -> Result<(), ReconstructError> {
        if self.subscription.is_some() {
            return Ok(());
        }
        scene.points(self.live_list)?;
        self.subscription = Some(scene.subscribe([self.live_list]));
        info!("collecting path {}", self.path_number);
        Ok(())
    }

    /// Handle the changes delivered since the last call.
    ///
    /// Changes are coalesced: at most one reconstruction is considered per
    /// call since it always uses the current points. `None` when nothing
    /// changed.
    pub fn process_pending(&mut self, scene: &mut Scene) -> Result<Option<Trigger>, ReconstructError> {
        let Some(sub) = &self.subscription else {
            return Ok(None);
        };
        let mut changed = false;
        let mut removed = false;
        for event in sub.drain() {
            match event {
                NodeEvent::Modified(_) => changed = true,
                NodeEvent::Removed(_) => removed = true,
            }
        }
        if removed {
            warn!("live point list {} was removed; path observation ends", self.live_list);
            if let Some(sub) = self.subscription.take() {
                scene.unsubscribe(sub.id());
            }
            return Ok(None);
        }
        if !changed {
            return Ok(None);
        }
        self.on_points_changed(scene).map(Some)
    }

    /// Start a background rebuild unless one is running or the path is
    /// still too short.
    pub fn on_points_changed(&mut self, scene: &mut Scene) -> Result<Trigger, ReconstructError> {
        if self.is_reconstructing() {
            return Ok(Trigger::Busy);
        }
        if scene.point_count(self.live_list)? <= MIN_POINTS_FOR_RECONSTRUCTION {
            return Ok(Trigger::TooFewPoints);
        }
        self.reap_worker();

        let model = self.path_model(scene)?;
        let mesh = scene.model_mesh(model)?;
        let points = scene.points(self.live_list)?.to_vec();
        self.worker = Some(spawn_worker(Arc::clone(&self.modeler), points, mesh)?);
        Ok(Trigger::Spawned)
    }

    /// Finish the current path.
    ///
    /// Waits for a running worker, rebuilds the model once more from the
    /// final points, archives the raw points under a numbered list, empties
    /// the live list and moves on to the next path number. `None` without
    /// any change when no path is being observed.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "info", skip(self, scene), fields(path = self.path_number)))]
    pub fn stop_path(&mut self, scene: &mut Scene) -> Result<Option<ArchivedPath>, ReconstructError> {
        let Some(sub) = self.subscription.take() else {
            debug!("no path is being collected; nothing to stop");
            return Ok(None);
        };
        scene.unsubscribe(sub.id());
        self.reap_worker();

        let points = scene.points(self.live_list)?.to_vec();
        let model = self.path_model(scene)?;
        match self.modeler.build(&points) {
            Ok(mesh) => scene.set_model_mesh(model, mesh)?,
            Err(e) => warn!("final reconstruction of path {} skipped: {e}", self.path_number),
        }

        let raw_list = scene.get_or_add_point_list(&raw_path_list_name(self.path_number))?;
        let point_count = points.len();
        scene.replace_points(raw_list, points)?;
        scene.clear_points(self.live_list)?;

        let archived = ArchivedPath {
            path_number: self.path_number,
            raw_list,
            model,
            point_count,
        };
        info!(
            "path {} archived with {point_count} points",
            self.path_number
        );
        self.path_number += 1;
        Ok(Some(archived))
    }

    fn path_model(&self, scene: &mut Scene) -> Result<NodeId, ReconstructError> {
        let name = path_model_name(self.path_number);
        if let Some(id) = scene.find(&name) {
            return Ok(id);
        }
        let id = scene.add_model(&name, path_display())?;
        debug!("created path model '{name}' {id}");
        Ok(id)
    }

    /// Join the last worker, if any, and log how it ended.
    fn reap_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        match worker.join() {
            Ok(Ok(triangles)) => debug!("path reconstruction produced {triangles} triangles"),
            Ok(Err(e)) => warn!("path reconstruction failed: {e}"),
            Err(_) => error!("path reconstruction worker panicked"),
        }
    }
}

fn spawn_worker<M: CurveModeler + 'static>(
    modeler: Arc<M>,
    points: Vec<Point3<f64>>,
    target: SharedMesh,
) -> Result<Worker, ReconstructError> {
    let handle = thread::Builder::new()
        .name("path-reconstruction".to_owned())
        .spawn(move || {
            let mesh = modeler.build(&points)?;
            let triangles = mesh.triangle_count();
            target.set(mesh);
            Ok(triangles)
        })
        .map_err(ReconstructError::Spawn)?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::TubeCurveModeler;
    use igt_nav_core::{NodeKind, TriangleMesh};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Condvar, Mutex};

    /// Blocks every build until the gate is opened.
    #[derive(Default)]
    struct GatedModeler {
        open: Mutex<bool>,
        opened: Condvar,
        builds: AtomicUsize,
    }

    impl GatedModeler {
        fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.opened.notify_all();
        }
    }

    impl CurveModeler for Arc<GatedModeler> {
        fn build(&self, points: &[Point3<f64>]) -> Result<TriangleMesh, ReconstructError> {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.opened.wait(open).unwrap();
            }
            self.builds.fetch_add(1, Ordering::SeqCst);
            let mut mesh = TriangleMesh::new();
            mesh.vertices = points
                .iter()
                .map(|p| Point3::new(p.x as f32, p.y as f32, p.z as f32))
                .collect();
            Ok(mesh)
        }
    }

    fn push_line(scene: &mut Scene, list: NodeId, range: std::ops::Range<usize>) {
        for i in range {
            scene
                .push_point(list, Point3::new(i as f64, 0.0, 0.0))
                .unwrap();
        }
    }

    #[test]
    fn at_most_one_worker_in_flight() {
        let mut scene = Scene::new();
        let list = scene.add_point_list("WirePoints_Needle").unwrap();
        let gate = Arc::new(GatedModeler::default());
        let mut recon = PathReconstructor::new(Arc::clone(&gate), list);
        recon.start_path(&mut scene).unwrap();

        push_line(&mut scene, list, 0..10);
        assert_eq!(recon.process_pending(&mut scene).unwrap(), Some(Trigger::TooFewPoints));
        assert!(!recon.is_reconstructing());

        push_line(&mut scene, list, 10..11);
        assert_eq!(recon.process_pending(&mut scene).unwrap(), Some(Trigger::Spawned));
        assert!(recon.is_reconstructing());

        for i in 11..15 {
            push_line(&mut scene, list, i..i + 1);
            assert_eq!(recon.process_pending(&mut scene).unwrap(), Some(Trigger::Busy));
        }
        assert_eq!(gate.builds.load(Ordering::SeqCst), 0);
        assert_eq!(recon.process_pending(&mut scene).unwrap(), None);

        gate.open();
        let archived = recon.stop_path(&mut scene).unwrap().unwrap();
        // one background build and the final one
        assert_eq!(gate.builds.load(Ordering::SeqCst), 2);
        assert_eq!(archived.point_count, 15);
        let mesh = scene.model_mesh(archived.model).unwrap().snapshot().unwrap();
        assert_eq!(mesh.vertex_count(), 15);
    }

    #[test]
    fn finished_worker_allows_the_next_one() {
        let mut scene = Scene::new();
        let list = scene.add_point_list("WirePoints_Needle").unwrap();
        let gate = Arc::new(GatedModeler::default());
        gate.open();
        let mut recon = PathReconstructor::new(Arc::clone(&gate), list);
        recon.start_path(&mut scene).unwrap();

        push_line(&mut scene, list, 0..11);
        assert_eq!(recon.process_pending(&mut scene).unwrap(), Some(Trigger::Spawned));
        while recon.is_reconstructing() {
            thread::yield_now();
        }
        push_line(&mut scene, list, 11..12);
        assert_eq!(recon.process_pending(&mut scene).unwrap(), Some(Trigger::Spawned));
        recon.stop_path(&mut scene).unwrap();
        assert_eq!(gate.builds.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stop_archives_numbered_paths() {
        let mut scene = Scene::new();
        let list = scene.add_point_list("WirePoints_Needle").unwrap();
        let mut recon = PathReconstructor::new(TubeCurveModeler::default(), list);

        for (expected, len) in [(1, 12), (2, 5)] {
            recon.start_path(&mut scene).unwrap();
            push_line(&mut scene, list, 0..len);
            recon.process_pending(&mut scene).unwrap();
            let archived = recon.stop_path(&mut scene).unwrap().unwrap();

            assert_eq!(archived.path_number, expected);
            assert_eq!(scene.name(archived.raw_list).unwrap(), raw_path_list_name(expected));
            assert_eq!(scene.point_count(archived.raw_list).unwrap(), len);
            assert_eq!(scene.point_count(list).unwrap(), 0);

            assert_eq!(scene.name(archived.model).unwrap(), format!("Catheter{expected}"));
            assert_eq!(scene.kind(archived.model).unwrap(), NodeKind::Model);
            let display = scene.model_display(archived.model).unwrap();
            assert_eq!(display.color, [0.0, 1.0, 0.0]);
            assert_eq!(display.opacity, 0.3);
            assert!(scene.model_mesh(archived.model).unwrap().is_set());
        }
        assert_eq!(recon.path_number(), 3);
        assert_eq!(scene.subscriber_count(), 0);
    }

    #[test]
    fn stop_with_too_few_points_still_archives() {
        let mut scene = Scene::new();
        let list = scene.add_point_list("WirePoints_Needle").unwrap();
        let mut recon = PathReconstructor::new(TubeCurveModeler::default(), list);
        recon.start_path(&mut scene).unwrap();
        push_line(&mut scene, list, 0..1);

        let archived = recon.stop_path(&mut scene).unwrap().unwrap();
        assert_eq!(archived.point_count, 1);
        assert!(!scene.model_mesh(archived.model).unwrap().is_set());
    }

    #[test]
    fn removed_live_list_ends_observation() {
        let mut scene = Scene::new();
        let list = scene.add_point_list("WirePoints_Needle").unwrap();
        let mut recon = PathReconstructor::new(TubeCurveModeler::default(), list);
        recon.start_path(&mut scene).unwrap();
        scene.remove_node(list).unwrap();
        assert_eq!(recon.process_pending(&mut scene).unwrap(), None);
        assert!(!recon.is_observing());
        assert!(recon.stop_path(&mut scene).unwrap().is_none());
        assert_eq!(recon.path_number(), 1);
    }

    #[test]
    fn stop_without_a_path_changes_nothing() {
        let mut scene = Scene::new();
        let list = scene.add_point_list("WirePoints_Needle").unwrap();
        scene.push_point(list, Point3::origin()).unwrap();
        let mut recon = PathReconstructor::new(TubeCurveModeler::default(), list);

        assert!(recon.stop_path(&mut scene).unwrap().is_none());
        assert_eq!(recon.path_number(), 1);
        assert_eq!(scene.len(), 1);
        assert_eq!(scene.point_count(list).unwrap(), 1);
        assert!(scene.find(&path_model_name(1)).is_none());
    }
}
