//! Catheter path reconstruction.
//!
//! While the tip of a tracked wire is collected into a point list,
//! [`PathReconstructor`] keeps a tube model of the path up to date on a
//! background thread. Stopping a path archives its raw points and starts
//! numbering the next one.
//!
//! Structures outlined point by point, such as a seroma, are wrapped in a
//! closed surface by a [`SurfaceUpdater`].

mod curve;
mod reconstructor;
mod surface;

pub use curve::{catmull_rom, sweep_tube, CurveModeler, TubeCurveModeler, TubeParams};
pub use reconstructor::{
    path_model_name, raw_path_list_name, ArchivedPath, PathReconstructor, Trigger,
    MIN_POINTS_FOR_RECONSTRUCTION,
};
pub use surface::{convex_hull, ConvexHullModeler, SurfaceModeler, SurfaceUpdate, SurfaceUpdater};

use igt_nav_core::SceneError;

#[derive(thiserror::Error, Debug)]
pub enum ReconstructError {
    #[error("too few distinct points ({got}) to build a model")]
    TooFewPoints { got: usize },
    #[error("{got} points do not enclose a volume")]
    FlatPoints { got: usize },
    #[error("invalid tube parameters {0:?}")]
    InvalidTube(TubeParams),
    #[error("failed to start reconstruction worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Scene(#[from] SceneError),
}
