//! Tool calibration for tracked instruments.
//!
//! Two calibrations are provided, both gated by an RMSE threshold:
//! - fixed point: the pointer tip is held on a point of another tool; the
//!   centroid of the collected tip positions becomes the tool point offset
//!   ([`evaluate_fixed_point`]);
//! - pivot: the tool is rotated about its tip; a [`PivotSolver`] estimates
//!   the tip offset ([`gate_pivot`]).
//!
//! [`CalibrationSession`] runs either one over a scene for a timed window
//! and stores accepted results.

mod estimate;
mod params;
mod pivot;
mod session;
mod window;

use igt_nav_collect::{CollectError, MissingInputs};
use igt_nav_core::SceneError;

pub use estimate::{
    centroid, evaluate_fixed_point, rmse_to_samples, FixedPointResult, NO_DATA_RMSE_MM,
};
pub use params::{
    CalibrationParams, FIXED_POINT_DURATION_KEY, FIXED_POINT_THRESHOLD_KEY, PIVOT_DURATION_KEY,
    PIVOT_THRESHOLD_KEY,
};
pub use pivot::{gate_pivot, LeastSquaresPivotSolver, PivotSolution, PivotSolver, MIN_PIVOT_SAMPLES};
pub use session::{
    CalibrationKind, CalibrationReport, CalibrationSession, CalibrationStatus, CalibrationTarget,
    FixedPointInputs,
};
pub use window::CalibrationWindow;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("calibration rejected, error = {rmse_mm:.3} mm")]
    Rejected { rmse_mm: f64 },
    #[error("pivot calibration needs at least {needed} poses, got {got}")]
    NotEnoughSamples { got: usize, needed: usize },
    #[error("pivot poses do not constrain the tip (too little rotation)")]
    Degenerate,
    #[error("a {0:?} calibration is already running")]
    AlreadyRunning(CalibrationKind),
    #[error("calibration inputs missing: {0:?}")]
    MissingInput(MissingInputs),
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error(transparent)]
    Scene(#[from] SceneError),
}
