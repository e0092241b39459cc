//! Automatic fiducial collection along a tracked tool trajectory.
//!
//! Design idea:
//! - Observe the source and target transform chains of a [`igt_nav_core::Scene`].
//! - On every change, compute the source origin in the target frame.
//! - Keep the last point of the list glued to the tool (the preview) and
//!   commit it once the tool has moved far enough; optionally drop the
//!   newest committed point when the tool backtracks.
//!
//! The policy itself lives in [`policy`] and works on plain slices, so it can
//! be used without a scene.

mod collector;
pub mod policy;

pub use collector::{CollectError, FiducialCollector, MissingInputs, StartOutcome};
pub use policy::{CollectorConfig, PointEdit};
