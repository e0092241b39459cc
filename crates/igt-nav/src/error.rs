use igt_nav_calib::CalibrationError;
use igt_nav_collect::{CollectError, MissingInputs};
use igt_nav_core::{SceneError, SettingsError};
use igt_nav_grid::{GridError, PlannerError};
use igt_nav_reconstruct::ReconstructError;

use crate::config::NavIoError;

#[derive(thiserror::Error, Debug)]
pub enum NavError {
    #[error("path collection inputs missing: {0:?}")]
    MissingInput(MissingInputs),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Planner(#[from] PlannerError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),
    #[error(transparent)]
    Io(#[from] NavIoError),
}
