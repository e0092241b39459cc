//! Image-guided catheter navigation.
//!
//! This crate is the main entry point. It re-exports the building blocks:
//! - [`core`]: scene graph, settings store and logging,
//! - [`collect`]: automatic fiducial collection,
//! - [`grid`]: insertion grid planning,
//! - [`calib`]: pivot and fixed-point tool calibration,
//! - [`reconstruct`]: background catheter path reconstruction,
//!
//! and wires them into a [`CathNavSession`]: a guide and a needle tracked
//! relative to the chest, an insertion grid planned on the guide tip,
//! catheter paths collected from a tracked wire, and seroma and chest wall
//! surfaces outlined on ultrasound.
//!
//! ```no_run
//! use std::time::Instant;
//! use igt_nav::{CathNavSession, NavigationConfig};
//! use igt_nav::core::SettingsStore;
//!
//! # fn main() -> Result<(), igt_nav::NavError> {
//! let mut session = CathNavSession::new(NavigationConfig::default(), SettingsStore::new())?;
//! session.create_plan()?;
//! session.start_path_collection()?;
//! // tracker updates move the wire, then:
//! session.tick(Instant::now())?;
//! if let Some(path) = session.stop_path_collection()? {
//!     println!("path {} has {} points", path.path_number, path.point_count);
//! }
//! # Ok(())
//! # }
//! ```

pub use igt_nav_calib as calib;
pub use igt_nav_collect as collect;
pub use igt_nav_core as core;
pub use igt_nav_grid as grid;
pub use igt_nav_reconstruct as reconstruct;

mod config;
mod error;
mod session;

pub use config::{
    GridAxis, GridPlanConfig, GridSide, NavIoError, NavigationConfig, MAX_GRID_POINTS_PER_SIDE,
    MAX_GRID_SPACING_MM, MIN_GRID_SPACING_MM,
};
pub use error::NavError;
pub use session::{node_names, CathNavNodes, CathNavSession, Segmentation, TickReport};

pub use igt_nav_calib::{CalibrationError, CalibrationKind, CalibrationReport, CalibrationStatus};
pub use igt_nav_core::{NodeId, Scene, SettingsStore};
pub use igt_nav_reconstruct::{ArchivedPath, SurfaceUpdate, Trigger};
