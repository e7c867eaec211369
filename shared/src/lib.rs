// lib.rs - profile sync and presence engine

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod capabilities;
pub mod config;
pub mod currency;
pub mod engine;
pub mod error;
pub mod geocode;
pub mod i18n;
pub mod location_flow;
pub mod model;
pub mod optimistic;
pub mod poller;
pub mod preferences;
pub mod reconcile;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod view;

pub use capabilities::Capabilities;
pub use config::{load_config, load_config_from_path, load_config_from_str, ConfigError, SyncConfig};
pub use engine::{EngineResult, SyncEngine};
pub use error::{AppError, AppResult, ErrorKind, ErrorSeverity, UserFacingError};
pub use i18n::Locale;
pub use location_flow::{FlowState, FlowStep, LocationFlow};
pub use model::{
    MetricsSnapshot, Notification, Profile, ProfileId, ProfilePatch, UnixTimeMs,
    ValidatedCoordinate,
};
pub use poller::Poller;
pub use preferences::{GeoPermission, PreferenceStore};
pub use view::{Model, StreamSlot, ViewModel};
