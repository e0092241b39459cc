use igt_nav_core::{origin_of, NodeId, PoseSubscription, PoseWatch, Scene, SceneError};
use log::{debug, warn};
use nalgebra::Point3;

use crate::policy::{plan_edit, CollectorConfig, PointEdit};

/// Errors raised while collecting.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CollectError {
    #[error("collector has no {0} selected")]
    NotConfigured(&'static str),
    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Which required inputs were missing when a start was refused.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MissingInputs {
    pub source: bool,
    pub target: bool,
    pub point_list: bool,
}

/// Result of [`FiducialCollector::start_collection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyCollecting,
    /// Collection was not entered; nothing happens until the inputs are set.
    MissingInput(MissingInputs),
}

impl StartOutcome {
    pub fn is_collecting(&self) -> bool {
        matches!(self, StartOutcome::Started | StartOutcome::AlreadyCollecting)
    }
}

/// Collects points at the origin of a source transform, expressed in a
/// target frame, whenever either transform chain moves.
///
/// The collector owns no data. It writes into a point list of the scene and
/// reacts to the source pose samples delivered through its subscription;
/// call [`FiducialCollector::process_pending`] from the thread that owns the
/// scene to handle them. Each sample carries the pose of its own tracker
/// frame, so frames queued between two calls are replayed in order.
#[derive(Debug, Default)]
pub struct FiducialCollector {
    config: CollectorConfig,
    source: Option<NodeId>,
    target: Option<NodeId>,
    point_list: Option<NodeId>,
    subscription: Option<PoseSubscription>,
    current_position_mm: Point3<f64>,
}

impl FiducialCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: CollectorConfig) {
        self.config = config;
    }

    pub fn set_minimum_add_distance_mm(&mut self, distance_mm: f64) {
        debug!("minimum add distance set to {distance_mm} mm");
        self.config.minimum_add_distance_mm = distance_mm;
    }

    pub fn set_allow_point_removals(&mut self, allow: bool) {
        debug!("allow point removals: {allow}");
        self.config.allow_point_removals = allow;
    }

    pub fn set_force_constant_point_distance(&mut self, force: bool) {
        debug!("force constant point distance: {force}");
        self.config.force_constant_point_distance = force;
    }

    /// Tool transform whose origin is collected. Takes effect for
    /// subscriptions at the next start.
    pub fn set_source(&mut self, node: Option<NodeId>) {
        self.source = node;
    }

    /// Frame the collected points are expressed in.
    pub fn set_target(&mut self, node: Option<NodeId>) {
        self.target = node;
    }

    pub fn set_point_list(&mut self, node: Option<NodeId>) {
        self.point_list = node;
    }

    pub fn source(&self) -> Option<NodeId> {
        self.source
    }

    pub fn target(&self) -> Option<NodeId> {
        self.target
    }

    pub fn point_list(&self) -> Option<NodeId> {
        self.point_list
    }

    pub fn is_collecting(&self) -> bool {
        self.subscription.is_some()
    }

    /// Last position computed by an update, in the target frame.
    pub fn current_position_mm(&self) -> Point3<f64> {
        self.current_position_mm
    }

    /// Begin observing both transform chains. The chains are followed
    /// through later reparenting.
    ///
    /// Missing inputs are reported through the returned outcome and a
    /// warning; the collector stays idle.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, scene)))]
    pub fn start_collection(&mut self, scene: &mut Scene) -> Result<StartOutcome, CollectError> {
        if self.is_collecting() {
            return Ok(StartOutcome::AlreadyCollecting);
        }
        let (Some(source), Some(target), Some(_)) = (self.source, self.target, self.point_list)
        else {
            let missing = MissingInputs {
                source: self.source.is_none(),
                target: self.target.is_none(),
                point_list: self.point_list.is_none(),
            };
            warn!("a collection input is missing ({missing:?}); collection not started");
            return Ok(StartOutcome::MissingInput(missing));
        };

        let source_depth = scene.transform_chain(source)?.len();
        let target_depth = scene.transform_chain(target)?.len();
        debug!("observing transform chains of depth {source_depth} and {target_depth}");
        self.subscription = Some(scene.subscribe_pose(PoseWatch::Relative { source, target }));
        Ok(StartOutcome::Started)
    }

    /// Stop observing. A no-op when idle.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, scene)))]
    pub fn stop_collection(&mut self, scene: &mut Scene) {
        if let Some(sub) = self.subscription.take() {
            scene.unsubscribe(sub.id());
            debug!("collection stopped");
        }
    }

    /// Run one update per pose sample delivered since the last call, each at
    /// the position of its sample.
    ///
    /// Returns the number of updates run. The first failing update aborts
    /// processing; remaining samples stay queued.
    pub fn process_pending(&mut self, scene: &mut Scene) -> Result<usize, CollectError> {
        let mut handled = 0;
        while let Some(sample) = self.subscription.as_ref().and_then(PoseSubscription::try_next) {
            let matrix = sample.matrix?;
            self.update_at(scene, origin_of(&matrix))?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Handle one position update at the current pose of the scene.
    ///
    /// Runs on every tracking frame, so it does not log. The position is
    /// resolved before the list is touched; a missing frame path leaves the
    /// list unchanged.
    pub fn update(&mut self, scene: &mut Scene) -> Result<PointEdit, CollectError> {
        let source = self.source.ok_or(CollectError::NotConfigured("source transform"))?;
        let target = self.target.ok_or(CollectError::NotConfigured("target transform"))?;
        let current = origin_of(&scene.transform_between(source, target)?);
        self.update_at(scene, current)
    }

    /// Handle one position update with the source origin at `current` in the
    /// target frame.
    pub fn update_at(
        &mut self,
        scene: &mut Scene,
        current: Point3<f64>,
    ) -> Result<PointEdit, CollectError> {
        let list = self.point_list.ok_or(CollectError::NotConfigured("point list"))?;
        self.current_position_mm = current;

        let edit = plan_edit(scene.points(list)?, &current, &self.config);
        match edit {
            PointEdit::Add { snap } => {
                if let Some((index, p)) = snap {
                    scene.set_point(list, index, p)?;
                }
                scene.push_point(list, current)?;
            }
            PointEdit::Remove => {
                let last = scene.point_count(list)? - 1;
                scene.remove_point(list, last)?;
            }
            PointEdit::Move => {}
        }

        let count = scene.point_count(list)?;
        if count >= 1 {
            scene.set_point(list, count - 1, current)?;
        }
        Ok(edit)
    }

    /// Empty the configured point list.
    pub fn remove_all_points(&mut self, scene: &mut Scene) -> Result<(), CollectError> {
        if let Some(list) = self.point_list {
            scene.clear_points(list)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use igt_nav_core::translation_matrix;
    use nalgebra::{Matrix4, Vector3};

    struct Rig {
        scene: Scene,
        reference: NodeId,
        tool: NodeId,
        target: NodeId,
        list: NodeId,
    }

    fn rig() -> Rig {
        let mut scene = Scene::new();
        let reference = scene.add_transform("ChestToRas").unwrap();
        let tool = scene.add_transform("WireToChest").unwrap();
        let target = scene.add_transform("NeedleToChest").unwrap();
        scene.set_parent(tool, Some(reference)).unwrap();
        scene.set_parent(target, Some(reference)).unwrap();
        let list = scene.add_point_list("WirePoints_Needle").unwrap();
        Rig {
            scene,
            reference,
            tool,
            target,
            list,
        }
    }

    fn collector_for(rig: &Rig, config: CollectorConfig) -> FiducialCollector {
        let mut c = FiducialCollector::new(config);
        c.set_source(Some(rig.tool));
        c.set_target(Some(rig.target));
        c.set_point_list(Some(rig.list));
        c
    }

    fn move_tool(rig: &mut Rig, x: f64) {
        rig.scene
            .set_matrix_to_parent(rig.tool, translation_matrix(&Vector3::new(x, 0.0, 0.0)))
            .unwrap();
    }

    #[test]
    fn start_without_inputs_stays_idle() {
        let mut r = rig();
        let mut c = FiducialCollector::new(CollectorConfig::default());
        c.set_source(Some(r.tool));
        let outcome = c.start_collection(&mut r.scene).unwrap();
        assert_eq!(
            outcome,
            StartOutcome::MissingInput(MissingInputs {
                source: false,
                target: true,
                point_list: true,
            })
        );
        assert!(!c.is_collecting());
        assert_eq!(r.scene.subscriber_count(), 0);
    }

    #[test]
    fn stop_when_idle_is_a_no_op() {
        let mut r = rig();
        let mut c = collector_for(&r, CollectorConfig::default());
        c.stop_collection(&mut r.scene);
        assert!(!c.is_collecting());
        assert_eq!(r.scene.point_count(r.list).unwrap(), 0);
    }

    fn sweep_tool(config: CollectorConfig) -> Vec<f64> {
        let mut r = rig();
        let mut c = collector_for(&r, config);
        assert_eq!(c.start_collection(&mut r.scene).unwrap(), StartOutcome::Started);
        for step in 0..=30 {
            move_tool(&mut r, step as f64);
            assert_eq!(c.process_pending(&mut r.scene).unwrap(), 1);
        }
        assert_eq!(c.current_position_mm().x, 30.0);
        r.scene.points(r.list).unwrap().iter().map(|p| p.x).collect()
    }

    #[test]
    fn tool_motion_commits_the_preview_once_threshold_is_crossed() {
        let xs = sweep_tool(CollectorConfig {
            minimum_add_distance_mm: 10.0,
            ..CollectorConfig::default()
        });
        // the preview settles where it was when the threshold was reached
        assert_eq!(xs, vec![0.0, 9.0, 18.0, 27.0, 30.0]);
    }

    #[test]
    fn constant_distance_produces_an_evenly_spaced_trail() {
        let xs = sweep_tool(CollectorConfig {
            minimum_add_distance_mm: 10.0,
            force_constant_point_distance: true,
            ..CollectorConfig::default()
        });
        assert_eq!(xs, vec![0.0, 10.0, 20.0, 30.0, 30.0]);
    }

    #[test]
    fn ancestor_motion_triggers_updates() {
        let mut r = rig();
        let mut c = collector_for(&r, CollectorConfig::default());
        c.start_collection(&mut r.scene).unwrap();
        r.scene
            .set_matrix_to_parent(r.reference, translation_matrix(&Vector3::new(3.0, 0.0, 0.0)))
            .unwrap();
        assert_eq!(c.process_pending(&mut r.scene).unwrap(), 1);
        // both chains share the moved ancestor, so the relative position is unchanged
        assert_eq!(r.scene.points(r.list).unwrap(), &[Point3::origin()]);
    }

    #[test]
    fn queued_moves_are_replayed_at_their_own_positions() {
        let mut r = rig();
        let mut c = collector_for(
            &r,
            CollectorConfig {
                minimum_add_distance_mm: 10.0,
                ..CollectorConfig::default()
            },
        );
        c.start_collection(&mut r.scene).unwrap();
        for x in [0.0, 9.0] {
            move_tool(&mut r, x);
            c.process_pending(&mut r.scene).unwrap();
        }

        move_tool(&mut r, 19.0);
        move_tool(&mut r, 29.0);
        assert_eq!(c.process_pending(&mut r.scene).unwrap(), 2);
        let xs: Vec<f64> = r.scene.points(r.list).unwrap().iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![0.0, 9.0, 19.0, 29.0]);
        assert_eq!(c.current_position_mm().x, 29.0);
    }

    #[test]
    fn reparented_source_is_followed() {
        let mut r = rig();
        let mount = r.scene.add_transform("Mount").unwrap();
        r.scene
            .set_matrix_to_parent(mount, translation_matrix(&Vector3::new(40.0, 0.0, 0.0)))
            .unwrap();
        let mut c = collector_for(&r, CollectorConfig::default());
        c.start_collection(&mut r.scene).unwrap();

        r.scene.set_parent(r.tool, Some(mount)).unwrap();
        r.scene
            .set_matrix_to_parent(mount, translation_matrix(&Vector3::new(50.0, 0.0, 0.0)))
            .unwrap();
        assert_eq!(c.process_pending(&mut r.scene).unwrap(), 2);
        let xs: Vec<f64> = r.scene.points(r.list).unwrap().iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![40.0, 50.0]);
    }

    #[test]
    fn events_after_stop_are_ignored() {
        let mut r = rig();
        let mut c = collector_for(&r, CollectorConfig::default());
        c.start_collection(&mut r.scene).unwrap();
        c.stop_collection(&mut r.scene);
        move_tool(&mut r, 50.0);
        assert_eq!(c.process_pending(&mut r.scene).unwrap(), 0);
        assert_eq!(r.scene.point_count(r.list).unwrap(), 0);
    }

    #[test]
    fn missing_frame_path_keeps_committed_points() {
        let mut r = rig();
        let mut c = collector_for(&r, CollectorConfig::default());
        c.update(&mut r.scene).unwrap();
        move_tool(&mut r, 20.0);
        c.update(&mut r.scene).unwrap();
        let before = r.scene.points(r.list).unwrap().to_vec();

        r.scene.set_matrix_to_parent(r.target, Matrix4::zeros()).unwrap();
        let err = c.update(&mut r.scene).unwrap_err();
        assert!(matches!(
            err,
            CollectError::Scene(SceneError::NoTransformPath { .. })
        ));
        assert_eq!(r.scene.points(r.list).unwrap(), before.as_slice());
    }

    #[test]
    fn remove_all_points_empties_the_list() {
        let mut r = rig();
        let mut c = collector_for(&r, CollectorConfig::default());
        for x in [0.0, 10.0, 20.0] {
            move_tool(&mut r, x);
            c.update(&mut r.scene).unwrap();
        }
        assert!(r.scene.point_count(r.list).unwrap() > 0);
        c.remove_all_points(&mut r.scene).unwrap();
        assert_eq!(r.scene.point_count(r.list).unwrap(), 0);
    }

    #[test]
    fn update_requires_configuration() {
        let mut scene = Scene::new();
        let mut c = FiducialCollector::new(CollectorConfig::default());
        assert_eq!(
            c.update(&mut scene),
            Err(CollectError::NotConfigured("source transform"))
        );
    }
}
