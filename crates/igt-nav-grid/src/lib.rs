//! Insertion grid planning.
//!
//! A [`GridSpec`] describes a rectangular or triangular lattice on the grid
//! plane. [`generate_lattice`] enumerates its points and [`lattice_mesh`]
//! turns them into one mesh of needle-sized cylinders. [`GridPlanner`]
//! keeps a single grid model in the scene in sync with its `GridSpec`.

mod lattice;
mod planner;

pub use lattice::{
    generate_lattice, lattice_mesh, GridError, GridExtents, GridPattern, GridSpacing, GridSpec,
    LatticeSteps, CYLINDER_HEIGHT_MM, CYLINDER_RADIUS_MM, CYLINDER_RESOLUTION,
};
pub use planner::{GridPlanner, PlannerError, GRID_MODEL_NAME};
