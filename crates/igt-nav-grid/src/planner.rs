use igt_nav_core::{ModelDisplay, NodeId, Scene, SceneError};
use log::{debug, info};

use crate::lattice::{generate_lattice, lattice_mesh, GridError, GridPattern, GridSpec};

/// Name of the model produced by [`GridPlanner::create_grid`].
pub const GRID_MODEL_NAME: &str = "Grid";

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Scene(#[from] SceneError),
}

fn grid_display() -> ModelDisplay {
    ModelDisplay {
        color: [0.0, 0.0, 1.0],
        opacity: 0.5,
        ..ModelDisplay::default()
    }
}

/// Keeps a grid description and the single model generated from it.
#[derive(Debug, Default)]
pub struct GridPlanner {
    spec: GridSpec,
    grid_to_target: Option<NodeId>,
    model: Option<NodeId>,
}

impl GridPlanner {
    pub fn new(spec: GridSpec) -> Self {
        Self {
            spec,
            ..Self::default()
        }
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    pub fn set_spec(&mut self, spec: GridSpec) {
        self.spec = spec;
    }

    pub fn set_pattern(&mut self, pattern: GridPattern) {
        self.spec.pattern = pattern;
    }

    pub fn set_extent_left(&mut self, mm: f64) {
        self.spec.extents.left = mm;
    }

    pub fn set_extent_right(&mut self, mm: f64) {
        self.spec.extents.right = mm;
    }

    pub fn set_extent_up(&mut self, mm: f64) {
        self.spec.extents.up = mm;
    }

    pub fn set_extent_down(&mut self, mm: f64) {
        self.spec.extents.down = mm;
    }

    pub fn set_spacing_horizontal(&mut self, mm: f64) {
        self.spec.spacing.horizontal = mm;
    }

    pub fn set_spacing_vertical(&mut self, mm: f64) {
        self.spec.spacing.vertical = mm;
    }

    /// Transform the grid model is attached to.
    pub fn set_grid_to_target(&mut self, node: Option<NodeId>) {
        self.grid_to_target = node;
    }

    pub fn grid_to_target(&self) -> Option<NodeId> {
        self.grid_to_target
    }

    /// Model created by the last [`GridPlanner::create_grid`], if still present.
    pub fn model(&self) -> Option<NodeId> {
        self.model
    }

    /// Replace any previous grid model with one built from the current spec.
    ///
    /// The grid spec is validated before the scene is touched.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "info", skip(self, scene)))]
    pub fn create_grid(&mut self, scene: &mut Scene) -> Result<NodeId, PlannerError> {
        let points = generate_lattice(&self.spec)?;
        let mesh = lattice_mesh(&points);

        self.delete_grid(scene)?;
        let model = scene.add_model(GRID_MODEL_NAME, grid_display())?;
        self.model = Some(model);
        if let Some(parent) = self.grid_to_target {
            scene.set_parent(model, Some(parent))?;
        }
        scene.set_model_mesh(model, mesh)?;
        info!(
            "{:?} grid with {} points created as {}",
            self.spec.pattern,
            points.len(),
            model
        );
        Ok(model)
    }

    /// Remove the grid model. A no-op when none exists.
    pub fn delete_grid(&mut self, scene: &mut Scene) -> Result<(), PlannerError> {
        if let Some(model) = self.model.take() {
            if scene.contains(model) {
                scene.remove_node(model)?;
                debug!("grid model {model} removed");
            }
        }
        Ok(())
    }
}
