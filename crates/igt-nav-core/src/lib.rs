//! Scene model shared by the `igt-nav-*` crates.
//!
//! The navigation tools never own their data: transforms, point lists and
//! models live in a [`Scene`] and are addressed by [`NodeId`]. Tools observe
//! nodes through channel-backed [`Subscription`]s and react to
//! [`NodeEvent`]s on their own thread; tracker observers get a
//! [`PoseSample`] per mutation through a [`PoseSubscription`]. Calibration
//! results are persisted in a [`SettingsStore`].

mod events;
mod logger;
mod mesh;
mod scene;
mod settings;
mod transform;

pub use events::{
    NodeEvent, PoseSample, PoseSubscription, PoseWatch, Subscription, SubscriptionId,
};
pub use mesh::{cylinder_along_z, sphere, SharedMesh, TriangleMesh};
pub use scene::{ModelDisplay, NodeId, NodeKind, Scene, SceneError};
pub use settings::{SettingsError, SettingsStore, DEFAULT_CONFIGURATION};
pub use transform::{
    matrix_from_row_values, matrix_to_row_values, origin_of, rotation_z_degrees,
    translation_matrix, MATRIX_VALUE_COUNT,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
