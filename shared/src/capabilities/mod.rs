//! Ports to the outside world.
//!
//! The engine only talks to these traits. Shells provide real
//! implementations (see [`http`] for the reqwest-backed ones); tests use the
//! doubles in the `testing` module (`testing` feature).

#[cfg(feature = "http")]
pub mod http;
pub mod kv;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::AppResult;
use crate::model::{
    Comment, MetricsSnapshot, NewComment, Notification, Profile, ProfileId, ProfilePatch, Rating,
    ValidatedCoordinate,
};

pub use self::kv::{KeyNamespace, KeyValueStore, KvError, KvKey, MemoryKvStore, TypedKvStore};

#[cfg(not(target_arch = "wasm32"))]
pub use self::kv::SqliteKvStore;

/// The listings backend.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn list_profiles(&self) -> AppResult<Vec<Profile>>;

    async fn get_profile(&self, id: &ProfileId) -> AppResult<Profile>;

    /// `Ok(None)` when no profile is registered under `email`.
    async fn get_profile_by_email(&self, email: &str) -> AppResult<Option<Profile>>;

    /// Returns the profile as the server stored it.
    async fn update_profile(&self, id: &ProfileId, patch: &ProfilePatch) -> AppResult<Profile>;

    async fn get_metrics(&self, id: &ProfileId) -> AppResult<MetricsSnapshot>;

    async fn get_notifications(&self, id: &ProfileId) -> AppResult<Vec<Notification>>;

    async fn mark_notifications_read(&self, id: &ProfileId) -> AppResult<Vec<Notification>>;

    async fn submit_comment(&self, id: &ProfileId, comment: &NewComment) -> AppResult<Comment>;

    async fn submit_rating(&self, id: &ProfileId, rating: Rating) -> AppResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoPlace {
    /// ISO 3166-1 alpha-2, upper case.
    pub country_code: String,
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardPlace {
    pub coordinate: ValidatedCoordinate,
    pub city: Option<String>,
    pub display_name: Option<String>,
}

/// Best-effort geocoding. Callers treat every error as "no answer".
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse(&self, coordinate: &ValidatedCoordinate) -> AppResult<GeoPlace>;

    async fn forward(&self, query: &str) -> AppResult<Option<ForwardPlace>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionQueryState {
    Granted,
    Denied,
    Prompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    Unavailable,
    #[error("position request timed out")]
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            high_accuracy: false,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::from_secs(300),
        }
    }
}

/// Device geolocation.
#[async_trait]
pub trait Geolocation: Send + Sync {
    fn is_supported(&self) -> bool;

    fn supports_permission_query(&self) -> bool;

    async fn query_permission(&self) -> Result<PermissionQueryState, PositionError>;

    /// Implementations must give up after `options.timeout`.
    async fn current_position(
        &self,
        options: &PositionOptions,
    ) -> Result<ValidatedCoordinate, PositionError>;
}

/// For shells without any location capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedGeolocation;

#[async_trait]
impl Geolocation for UnsupportedGeolocation {
    fn is_supported(&self) -> bool {
        false
    }

    fn supports_permission_query(&self) -> bool {
        false
    }

    async fn query_permission(&self) -> Result<PermissionQueryState, PositionError> {
        Err(PositionError::Unavailable)
    }

    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> Result<ValidatedCoordinate, PositionError> {
        Err(PositionError::Unavailable)
    }
}

#[derive(Clone)]
pub struct Capabilities {
    pub remote: Arc<dyn RemoteService>,
    pub geocoder: Arc<dyn Geocoder>,
    pub geolocation: Arc<dyn Geolocation>,
    pub store: Arc<dyn KeyValueStore>,
}

impl Capabilities {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        geocoder: Arc<dyn Geocoder>,
        geolocation: Arc<dyn Geolocation>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            remote,
            geocoder,
            geolocation,
            store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_geolocation() {
        let geo = UnsupportedGeolocation;
        assert!(!geo.is_supported());
        assert!(!geo.supports_permission_query());
        assert_eq!(
            geo.current_position(&PositionOptions::default()).await,
            Err(PositionError::Unavailable)
        );
    }

    #[test]
    fn test_default_position_options_are_bounded() {
        let options = PositionOptions::default();
        assert!(!options.high_accuracy);
        assert_eq!(options.timeout, Duration::from_secs(10));
        assert_eq!(options.maximum_age, Duration::from_secs(300));
    }
}
