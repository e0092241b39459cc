//! Catheter navigation session.
//!
//! Transform hierarchy, child under parent:
//!
//! ```text
//! ChestToRas
//! ├── WireToChest
//! │   └── WireModel
//! ├── GuideToChest
//! │   └── GuideTipToGuide
//! │       └── GuideModelToGuideTip
//! │           └── GuideCameraToGuideModel
//! ├── ChestwallMarkups_Chest, ChestWallModel
//! └── NeedleToChest
//!     ├── SeromaMarkups_Needle, SeromaModel
//!     ├── NeedleTipToNeedle
//!     │   └── NeedleModelToNeedleTip
//!     └── PlanToNeedle
//!         └── GridToPlan
//!             └── GridCameraToGrid
//! NeedleToGuide
//! ```
//!
//! Tracker transforms are written by the caller; the session reacts in
//! [`CathNavSession::tick`].

use std::path::Path;
use std::time::Instant;

use igt_nav_calib::{
    CalibrationError, CalibrationParams, CalibrationSession, CalibrationStatus, CalibrationTarget,
    FixedPointInputs,
};
use igt_nav_collect::{FiducialCollector, StartOutcome};
use igt_nav_core::{rotation_z_degrees, sphere, ModelDisplay, NodeId, Scene, SettingsStore};
use igt_nav_grid::GridPlanner;
use igt_nav_reconstruct::{
    ArchivedPath, ConvexHullModeler, PathReconstructor, SurfaceUpdate, SurfaceUpdater, Trigger,
    TubeCurveModeler,
};
use log::{debug, info, warn};
use nalgebra::{Matrix4, Point3};

use crate::config::{GridPlanConfig, NavigationConfig};
use crate::error::NavError;

/// Scene names of the session nodes. Calibration results are persisted in
/// the settings under the name of their transform.
pub mod node_names {
    pub const CHEST_TO_RAS: &str = "ChestToRas";
    pub const WIRE_TO_CHEST: &str = "WireToChest";
    pub const GUIDE_TO_CHEST: &str = "GuideToChest";
    pub const NEEDLE_TO_CHEST: &str = "NeedleToChest";
    pub const GUIDE_TIP_TO_GUIDE: &str = "GuideTipToGuide";
    pub const GUIDE_MODEL_TO_GUIDE_TIP: &str = "GuideModelToGuideTip";
    pub const GUIDE_CAMERA_TO_GUIDE_MODEL: &str = "GuideCameraToGuideModel";
    pub const NEEDLE_TIP_TO_NEEDLE: &str = "NeedleTipToNeedle";
    pub const NEEDLE_MODEL_TO_NEEDLE_TIP: &str = "NeedleModelToNeedleTip";
    pub const PLAN_TO_NEEDLE: &str = "PlanToNeedle";
    pub const GRID_TO_PLAN: &str = "GridToPlan";
    pub const GRID_CAMERA_TO_GRID: &str = "GridCameraToGrid";
    pub const NEEDLE_TO_GUIDE: &str = "NeedleToGuide";
    pub const NEEDLE_TIP_MARKUPS_GUIDE: &str = "NeedleTipMarkups_Guide";
    pub const WIRE_POINTS_NEEDLE: &str = "WirePoints_Needle";
    pub const WIRE_MODEL: &str = "WireModel";
    pub const SEROMA_MARKUPS_NEEDLE: &str = "SeromaMarkups_Needle";
    pub const SEROMA_MODEL: &str = "SeromaModel";
    pub const CHESTWALL_MARKUPS_CHEST: &str = "ChestwallMarkups_Chest";
    pub const CHEST_WALL_MODEL: &str = "ChestWallModel";
}

use node_names::*;

/// Model axes of the tool meshes are permuted against the tip frames.
const TOOL_MODEL_TO_TIP: [f64; 16] = [
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    1.0, 0.0, 0.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

const GUIDE_CAMERA_TO_GUIDE_MODEL_MATRIX: [f64; 16] = [
    0.0, 1.0, 0.0, 0.0, //
    1.0, 0.0, 0.0, 0.0, //
    0.0, 0.0, -1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

const MAX_GRID_ROTATION_DEG: f64 = 180.0;

const WIRE_TIP_RADIUS_MM: f32 = 0.75;

fn wire_display() -> ModelDisplay {
    ModelDisplay {
        color: [1.0, 0.5, 0.25],
        slice_intersection_visible: true,
        ..ModelDisplay::default()
    }
}

fn segmentation_display(color: [f32; 3]) -> ModelDisplay {
    ModelDisplay {
        color,
        opacity: 0.3,
        backface_culling: false,
        slice_intersection_visible: true,
        ..ModelDisplay::default()
    }
}

/// Structures outlined point by point on ultrasound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segmentation {
    /// Outlined in the needle frame, shown red.
    Seroma,
    /// Outlined in the chest frame, shown grey.
    ChestWall,
}

/// Ids of the nodes created by [`CathNavSession::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CathNavNodes {
    pub chest_to_ras: NodeId,
    pub wire_to_chest: NodeId,
    pub guide_to_chest: NodeId,
    pub needle_to_chest: NodeId,
    pub guide_tip_to_guide: NodeId,
    pub guide_model_to_guide_tip: NodeId,
    pub guide_camera_to_guide_model: NodeId,
    pub needle_tip_to_needle: NodeId,
    pub needle_model_to_needle_tip: NodeId,
    pub plan_to_needle: NodeId,
    pub grid_to_plan: NodeId,
    pub grid_camera_to_grid: NodeId,
    pub needle_to_guide: NodeId,
    /// Needle tip positions in the guide frame, for guide calibration.
    pub needle_tip_markups_guide: NodeId,
    /// Live wire path in the needle frame.
    pub wire_points_needle: NodeId,
    /// Sphere marking the wire tip.
    pub wire_model: NodeId,
    pub seroma_markups_needle: NodeId,
    pub seroma_model: NodeId,
    pub chestwall_markups_chest: NodeId,
    pub chest_wall_model: NodeId,
}

fn child(scene: &mut Scene, name: &str, parent: Option<NodeId>) -> Result<NodeId, NavError> {
    let id = scene.get_or_add_transform(name)?;
    scene.set_parent(id, parent)?;
    Ok(id)
}

fn point_list_under(scene: &mut Scene, name: &str, parent: NodeId) -> Result<NodeId, NavError> {
    let id = scene.get_or_add_point_list(name)?;
    scene.set_parent(id, Some(parent))?;
    Ok(id)
}

fn model_under(
    scene: &mut Scene,
    name: &str,
    display: ModelDisplay,
    parent: NodeId,
) -> Result<NodeId, NavError> {
    let id = match scene.find(name) {
        Some(id) => id,
        None => scene.add_model(name, display)?,
    };
    scene.set_parent(id, Some(parent))?;
    Ok(id)
}

impl CathNavNodes {
    fn build(scene: &mut Scene) -> Result<Self, NavError> {
        let chest_to_ras = child(scene, CHEST_TO_RAS, None)?;
        let wire_to_chest = child(scene, WIRE_TO_CHEST, Some(chest_to_ras))?;
        let guide_to_chest = child(scene, GUIDE_TO_CHEST, Some(chest_to_ras))?;
        let needle_to_chest = child(scene, NEEDLE_TO_CHEST, Some(chest_to_ras))?;

        let guide_tip_to_guide = child(scene, GUIDE_TIP_TO_GUIDE, Some(guide_to_chest))?;
        let guide_model_to_guide_tip =
            child(scene, GUIDE_MODEL_TO_GUIDE_TIP, Some(guide_tip_to_guide))?;
        let guide_camera_to_guide_model = child(
            scene,
            GUIDE_CAMERA_TO_GUIDE_MODEL,
            Some(guide_model_to_guide_tip),
        )?;

        let needle_tip_to_needle = child(scene, NEEDLE_TIP_TO_NEEDLE, Some(needle_to_chest))?;
        let needle_model_to_needle_tip =
            child(scene, NEEDLE_MODEL_TO_NEEDLE_TIP, Some(needle_tip_to_needle))?;

        let plan_to_needle = child(scene, PLAN_TO_NEEDLE, Some(needle_to_chest))?;
        let grid_to_plan = child(scene, GRID_TO_PLAN, Some(plan_to_needle))?;
        let grid_camera_to_grid = child(scene, GRID_CAMERA_TO_GRID, Some(grid_to_plan))?;

        let needle_to_guide = child(scene, NEEDLE_TO_GUIDE, None)?;

        scene.set_matrix_from_values(guide_model_to_guide_tip, &TOOL_MODEL_TO_TIP)?;
        scene.set_matrix_from_values(needle_model_to_needle_tip, &TOOL_MODEL_TO_TIP)?;
        scene.set_matrix_from_values(
            guide_camera_to_guide_model,
            &GUIDE_CAMERA_TO_GUIDE_MODEL_MATRIX,
        )?;

        let wire_model = model_under(scene, WIRE_MODEL, wire_display(), wire_to_chest)?;
        scene.set_model_mesh(wire_model, sphere(Point3::origin(), WIRE_TIP_RADIUS_MM, 16))?;

        Ok(Self {
            chest_to_ras,
            wire_to_chest,
            guide_to_chest,
            needle_to_chest,
            guide_tip_to_guide,
            guide_model_to_guide_tip,
            guide_camera_to_guide_model,
            needle_tip_to_needle,
            needle_model_to_needle_tip,
            plan_to_needle,
            grid_to_plan,
            grid_camera_to_grid,
            needle_to_guide,
            needle_tip_markups_guide: scene.get_or_add_point_list(NEEDLE_TIP_MARKUPS_GUIDE)?,
            wire_points_needle: scene.get_or_add_point_list(WIRE_POINTS_NEEDLE)?,
            wire_model,
            seroma_markups_needle: point_list_under(scene, SEROMA_MARKUPS_NEEDLE, needle_to_chest)?,
            seroma_model: model_under(
                scene,
                SEROMA_MODEL,
                segmentation_display([1.0, 0.0, 0.0]),
                needle_to_chest,
            )?,
            chestwall_markups_chest: point_list_under(scene, CHESTWALL_MARKUPS_CHEST, chest_to_ras)?,
            chest_wall_model: model_under(
                scene,
                CHEST_WALL_MODEL,
                segmentation_display([0.75, 0.75, 0.75]),
                chest_to_ras,
            )?,
        })
    }
}

/// What one [`CathNavSession::tick`] did.
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    /// Tracker updates handled by the path collector.
    pub path_updates: usize,
    /// Reaction of the path reconstructor, if the live path changed.
    pub reconstruction: Option<Trigger>,
    /// Calibration progress. A rejected calibration is reported here rather
    /// than failing the whole tick.
    pub calibration: Result<CalibrationStatus, CalibrationError>,
    /// Segmentation models rebuilt after their points changed.
    pub segmentation: Vec<(Segmentation, SurfaceUpdate)>,
}

/// Guide and needle navigation with grid planning, tool calibration and
/// catheter path collection over one scene.
#[derive(Debug)]
pub struct CathNavSession {
    scene: Scene,
    settings: SettingsStore,
    config: NavigationConfig,
    nodes: CathNavNodes,
    planner: GridPlanner,
    calibration: CalibrationSession,
    path_collector: FiducialCollector,
    reconstructor: PathReconstructor<TubeCurveModeler>,
    seroma: SurfaceUpdater<ConvexHullModeler>,
    chest_wall: SurfaceUpdater<ConvexHullModeler>,
}

impl CathNavSession {
    /// Build the scene, merge calibration defaults into `settings` and
    /// restore the stored tool calibrations.
    pub fn new(config: NavigationConfig, mut settings: SettingsStore) -> Result<Self, NavError> {
        let mut scene = Scene::new();
        let nodes = CathNavNodes::build(&mut scene)?;

        let configuration = config.configuration.clone();
        config.calibration.merge_into(&mut settings, &configuration);
        let params = CalibrationParams::from_settings(&settings, &configuration);

        for (name, node) in [
            (GUIDE_TIP_TO_GUIDE, nodes.guide_tip_to_guide),
            (NEEDLE_TIP_TO_NEEDLE, nodes.needle_tip_to_needle),
        ] {
            match settings.read_transform(name, &configuration) {
                Ok(Some(m)) => {
                    scene.set_matrix_to_parent(node, m)?;
                    info!("restored calibration '{name}'");
                }
                Ok(None) => info!("no stored calibration '{name}'; using identity"),
                Err(e) => warn!("ignoring stored calibration '{name}': {e}"),
            }
        }

        let mut planner = GridPlanner::new(config.grid.to_spec());
        planner.set_grid_to_target(Some(nodes.grid_to_plan));

        let mut path_collector = FiducialCollector::new(config.path_collection);
        path_collector.set_source(Some(nodes.wire_to_chest));
        path_collector.set_target(Some(nodes.needle_to_chest));
        path_collector.set_point_list(Some(nodes.wire_points_needle));

        let reconstructor = PathReconstructor::new(
            TubeCurveModeler::new(config.tube),
            nodes.wire_points_needle,
        );

        let seroma = SurfaceUpdater::new(
            &mut scene,
            ConvexHullModeler,
            nodes.seroma_markups_needle,
            nodes.seroma_model,
        )?;
        let chest_wall = SurfaceUpdater::new(
            &mut scene,
            ConvexHullModeler,
            nodes.chestwall_markups_chest,
            nodes.chest_wall_model,
        )?;

        debug!("navigation session ready with {} scene nodes", scene.len());
        Ok(Self {
            scene,
            settings,
            calibration: CalibrationSession::new(params, &configuration),
            config,
            nodes,
            planner,
            path_collector,
            reconstructor,
            seroma,
            chest_wall,
        })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Mutable scene access, e.g. for writing tracker transforms.
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn nodes(&self) -> &CathNavNodes {
        &self.nodes
    }

    pub fn config(&self) -> &NavigationConfig {
        &self.config
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn write_settings(&self, path: impl AsRef<Path>) -> Result<(), NavError> {
        self.settings.write_json(path)?;
        Ok(())
    }

    /// Move a tracker transform.
    pub fn set_tracker_pose(&mut self, node: NodeId, m: Matrix4<f64>) -> Result<(), NavError> {
        self.scene.set_matrix_to_parent(node, m)?;
        Ok(())
    }

    // ----- planning -----

    pub fn grid(&self) -> &GridPlanConfig {
        &self.config.grid
    }

    /// Grid size used by the next [`CathNavSession::create_plan`].
    pub fn grid_mut(&mut self) -> &mut GridPlanConfig {
        &mut self.config.grid
    }

    /// Model of the current grid, if one was created.
    pub fn grid_model(&self) -> Option<NodeId> {
        self.planner.model()
    }

    /// Freeze the current guide camera pose relative to the needle as the
    /// plan frame.
    pub fn record_guide_position(&mut self) -> Result<Matrix4<f64>, NavError> {
        let m = self.scene.transform_between(
            self.nodes.guide_camera_to_guide_model,
            self.nodes.needle_to_chest,
        )?;
        self.scene.set_matrix_to_parent(self.nodes.plan_to_needle, m)?;
        debug!("plan frame recorded from guide position");
        Ok(m)
    }

    /// Record the guide position and rebuild the grid model on it.
    pub fn create_plan(&mut self) -> Result<NodeId, NavError> {
        self.record_guide_position()?;
        self.planner.set_spec(self.config.grid.to_spec());
        let model = self.planner.create_grid(&mut self.scene)?;
        info!("insertion plan created");
        Ok(model)
    }

    /// Rotate the grid in its plane; clamped to [-180, 180] degrees.
    pub fn rotate_grid(&mut self, degrees: f64) -> Result<(), NavError> {
        let degrees = degrees.clamp(-MAX_GRID_ROTATION_DEG, MAX_GRID_ROTATION_DEG);
        self.scene
            .set_matrix_to_parent(self.nodes.grid_to_plan, rotation_z_degrees(degrees))?;
        Ok(())
    }

    // ----- calibration -----

    /// Calibration parameters are re-read from the settings at every start.
    fn refresh_calibration_params(&mut self) {
        let params = CalibrationParams::from_settings(&self.settings, &self.config.configuration);
        self.calibration.set_params(params);
    }

    /// Pivot the needle about its tip; the result is NeedleTipToNeedle.
    pub fn start_needle_calibration(&mut self, now: Instant) -> Result<(), NavError> {
        self.refresh_calibration_params();
        let target = CalibrationTarget {
            node: self.nodes.needle_tip_to_needle,
            settings_name: NEEDLE_TIP_TO_NEEDLE.to_owned(),
        };
        self.calibration
            .start_pivot(&mut self.scene, self.nodes.needle_to_guide, target, now)?;
        Ok(())
    }

    /// Hold the needle tip on the guide tip; the result is GuideTipToGuide.
    pub fn start_guide_calibration(&mut self, now: Instant) -> Result<(), NavError> {
        self.refresh_calibration_params();
        let inputs = FixedPointInputs {
            pointer_tip: self.nodes.needle_tip_to_needle,
            tool_sensor: self.nodes.guide_to_chest,
            samples: self.nodes.needle_tip_markups_guide,
        };
        let target = CalibrationTarget {
            node: self.nodes.guide_tip_to_guide,
            settings_name: GUIDE_TIP_TO_GUIDE.to_owned(),
        };
        self.calibration
            .start_fixed_point(&mut self.scene, inputs, target, now)?;
        Ok(())
    }

    pub fn cancel_calibration(&mut self) {
        self.calibration.cancel(&mut self.scene);
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_running()
    }

    // ----- path collection -----

    pub fn is_collecting_path(&self) -> bool {
        self.path_collector.is_collecting()
    }

    /// Number of the path the next collection fills.
    pub fn path_number(&self) -> usize {
        self.reconstructor.path_number()
    }

    /// Empty the live path and collect wire tip positions into it.
    pub fn start_path_collection(&mut self) -> Result<(), NavError> {
        if self.path_collector.is_collecting() {
            return Ok(());
        }
        self.scene.clear_points(self.nodes.wire_points_needle)?;
        if let StartOutcome::MissingInput(missing) = self.path_collector.start_collection(&mut self.scene)? {
            return Err(NavError::MissingInput(missing));
        }
        self.reconstructor.start_path(&mut self.scene)?;
        info!("path collection {} started", self.reconstructor.path_number());
        Ok(())
    }

    /// Take in the last tracker updates, then archive the path.
    ///
    /// `None` when no path is being collected; nothing changes then.
    pub fn stop_path_collection(&mut self) -> Result<Option<ArchivedPath>, NavError> {
        if !self.path_collector.is_collecting() {
            return Ok(None);
        }
        self.path_collector.process_pending(&mut self.scene)?;
        self.path_collector.stop_collection(&mut self.scene);
        Ok(self.reconstructor.stop_path(&mut self.scene)?)
    }

    // ----- segmentation -----

    fn surface_mut(
        &mut self,
        which: Segmentation,
    ) -> (&mut SurfaceUpdater<ConvexHullModeler>, &mut Scene) {
        let updater = match which {
            Segmentation::Seroma => &mut self.seroma,
            Segmentation::ChestWall => &mut self.chest_wall,
        };
        (updater, &mut self.scene)
    }

    pub fn segmentation_points(&self, which: Segmentation) -> NodeId {
        match which {
            Segmentation::Seroma => self.seroma.list(),
            Segmentation::ChestWall => self.chest_wall.list(),
        }
    }

    pub fn segmentation_model(&self, which: Segmentation) -> NodeId {
        match which {
            Segmentation::Seroma => self.seroma.model(),
            Segmentation::ChestWall => self.chest_wall.model(),
        }
    }

    /// Place an outline point, in the frame of its list. The model follows
    /// at the next [`CathNavSession::tick`].
    pub fn add_segmentation_point(
        &mut self,
        which: Segmentation,
        p: Point3<f64>,
    ) -> Result<usize, NavError> {
        let list = self.segmentation_points(which);
        Ok(self.scene.push_point(list, p)?)
    }

    /// Remove the newest outline point; `None` when there is none.
    pub fn delete_last_segmentation_point(
        &mut self,
        which: Segmentation,
    ) -> Result<Option<Point3<f64>>, NavError> {
        let (updater, scene) = self.surface_mut(which);
        Ok(updater.delete_last(scene)?)
    }

    pub fn delete_all_segmentation_points(&mut self, which: Segmentation) -> Result<(), NavError> {
        let (updater, scene) = self.surface_mut(which);
        updater.delete_all(scene)?;
        debug!("{which:?} outline cleared");
        Ok(())
    }

    // ----- event loop -----

    /// Handle updates delivered since the last call: extend the live path,
    /// refresh its model, advance a running calibration and rebuild changed
    /// segmentation models.
    pub fn tick(&mut self, now: Instant) -> Result<TickReport, NavError> {
        let path_updates = if self.path_collector.is_collecting() {
            self.path_collector.process_pending(&mut self.scene)?
        } else {
            0
        };
        let reconstruction = self.reconstructor.process_pending(&mut self.scene)?;
        let calibration = self
            .calibration
            .tick(&mut self.scene, &mut self.settings, now);
        let mut segmentation = Vec::new();
        for which in [Segmentation::Seroma, Segmentation::ChestWall] {
            let (updater, scene) = self.surface_mut(which);
            if let Some(update) = updater.process_pending(scene)? {
                segmentation.push((which, update));
            }
        }
        Ok(TickReport {
            path_updates,
            reconstruction,
            calibration,
            segmentation,
        })
    }
}
