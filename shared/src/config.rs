//! Engine configuration.
//!
//! Layered with figment: compiled defaults, then `profile-sync.toml` in the
//! working directory, then `PROFILE_SYNC_*` environment variables.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::capabilities::PositionOptions;
use crate::geocode::DEFAULT_CACHE_SIZE;
use crate::i18n::Locale;
use crate::poller::MIN_INTERVAL;

pub const CONFIG_FILE: &str = "profile-sync.toml";
pub const ENV_PREFIX: &str = "PROFILE_SYNC_";

const SECTIONS: [&str; 7] = [
    "api",
    "geocoder",
    "polling",
    "geolocation",
    "presence",
    "locale",
    "storage",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub geocoder: GeocoderConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub geolocation: GeolocationConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub locale: LocaleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Listings backend.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Permit loopback and private-network hosts. Off outside development.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            user_agent: default_user_agent(),
            allow_private_hosts: false,
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.example.com/v1".to_string()
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_user_agent() -> String {
    format!("profile-sync/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GeocoderConfig {
    #[serde(default = "default_geocoder_base_url")]
    pub base_url: String,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: default_geocoder_base_url(),
            cache_size: default_cache_size(),
        }
    }
}

fn default_geocoder_base_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

/// Per-stream refresh intervals in milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    #[serde(default = "default_fast_interval_ms")]
    pub listings_ms: u64,
    #[serde(default = "default_fast_interval_ms")]
    pub profile_ms: u64,
    #[serde(default = "default_slow_interval_ms")]
    pub metrics_ms: u64,
    #[serde(default = "default_slow_interval_ms")]
    pub notifications_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            listings_ms: default_fast_interval_ms(),
            profile_ms: default_fast_interval_ms(),
            metrics_ms: default_slow_interval_ms(),
            notifications_ms: default_slow_interval_ms(),
        }
    }
}

fn default_fast_interval_ms() -> u64 {
    15_000
}

fn default_slow_interval_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GeolocationConfig {
    #[serde(default)]
    pub high_accuracy: bool,
    #[serde(default = "default_geolocation_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_maximum_age_ms")]
    pub maximum_age_ms: u64,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            high_accuracy: false,
            timeout_ms: default_geolocation_timeout_ms(),
            maximum_age_ms: default_maximum_age_ms(),
        }
    }
}

fn default_geolocation_timeout_ms() -> u64 {
    10_000
}

fn default_maximum_age_ms() -> u64 {
    300_000
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PresenceConfig {
    /// How long "online" lasts after the owner switches it on.
    #[serde(default = "default_presence_duration_ms")]
    pub duration_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_presence_duration_ms(),
        }
    }
}

fn default_presence_duration_ms() -> u64 {
    12 * 60 * 60 * 1000
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LocaleConfig {
    #[serde(default = "default_locale_tag")]
    pub default: String,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            default: default_locale_tag(),
        }
    }
}

fn default_locale_tag() -> String {
    Locale::En.as_tag().to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// SQLite file for persisted settings. `None` keeps them in memory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "api.base_url",
                reason: "cannot be empty".into(),
            });
        }
        if self.geocoder.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "geocoder.base_url",
                reason: "cannot be empty".into(),
            });
        }
        if self.api.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "api.request_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        let intervals = [
            ("polling.listings_ms", self.polling.listings_ms),
            ("polling.profile_ms", self.polling.profile_ms),
            ("polling.metrics_ms", self.polling.metrics_ms),
            ("polling.notifications_ms", self.polling.notifications_ms),
        ];
        for (field, value) in intervals {
            if Duration::from_millis(value) < MIN_INTERVAL {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!(
                        "{value}ms is below the {}ms minimum",
                        MIN_INTERVAL.as_millis()
                    ),
                });
            }
        }
        if self.geolocation.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "geolocation.timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.presence.duration_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "presence.duration_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if Locale::from_tag(&self.locale.default).is_none() {
            return Err(ConfigError::Invalid {
                field: "locale.default",
                reason: format!("unsupported locale '{}'", self.locale.default),
            });
        }
        Ok(())
    }

    pub fn default_locale(&self) -> Locale {
        Locale::from_tag(&self.locale.default).unwrap_or_default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.api.request_timeout_ms)
    }

    pub fn presence_duration(&self) -> Duration {
        Duration::from_millis(self.presence.duration_ms)
    }

    pub fn position_options(&self) -> PositionOptions {
        PositionOptions {
            high_accuracy: self.geolocation.high_accuracy,
            timeout: Duration::from_millis(self.geolocation.timeout_ms),
            maximum_age: Duration::from_millis(self.geolocation.maximum_age_ms),
        }
    }
}

impl PollingConfig {
    pub fn listings(&self) -> Duration {
        Duration::from_millis(self.listings_ms)
    }

    pub fn profile(&self) -> Duration {
        Duration::from_millis(self.profile_ms)
    }

    pub fn metrics(&self) -> Duration {
        Duration::from_millis(self.metrics_ms)
    }

    pub fn notifications(&self) -> Duration {
        Duration::from_millis(self.notifications_ms)
    }
}

/// Load and validate from the working directory file plus environment.
pub fn load_config() -> Result<SyncConfig, ConfigError> {
    let config: SyncConfig = Figment::new()
        .merge(Serialized::defaults(SyncConfig::default()))
        .merge(Toml::file(CONFIG_FILE))
        .merge(env_provider())
        .extract()
        .map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate from a specific file with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<SyncConfig, ConfigError> {
    let config: SyncConfig = Figment::new()
        .merge(Serialized::defaults(SyncConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
        .map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate from a TOML string only. No environment lookup.
pub fn load_config_from_str(toml_content: &str) -> Result<SyncConfig, ConfigError> {
    let config: SyncConfig = Figment::new()
        .merge(Serialized::defaults(SyncConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
        .map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

/// `PROFILE_SYNC_POLLING_LISTINGS_MS` maps to `polling.listings_ms`. Only the
/// first underscore after a known section name becomes a dot.
fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX).map(|key| map_env_key(key.as_str()).into())
}

fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|r| r.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.polling.listings(), Duration::from_secs(15));
        assert_eq!(config.polling.metrics(), Duration::from_secs(30));
        assert_eq!(config.presence_duration(), Duration::from_secs(12 * 60 * 60));
        assert_eq!(config.default_locale(), Locale::En);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = load_config_from_str(
            r#"
[api]
base_url = "https://listings.example.org/api"

[polling]
metrics_ms = 60000

[locale]
default = "pt-BR"
"#,
        )
        .unwrap();

        assert_eq!(config.api.base_url, "https://listings.example.org/api");
        assert_eq!(config.polling.metrics_ms, 60_000);
        assert_eq!(config.polling.listings_ms, 15_000);
        assert_eq!(config.default_locale(), Locale::PtBr);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result = load_config_from_str("[polling]\nlistngs_ms = 5000\n");
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_short_interval_is_rejected() {
        let result = load_config_from_str("[polling]\nprofile_ms = 10\n");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "polling.profile_ms",
                ..
            })
        ));
    }

    #[test]
    fn test_unsupported_locale_is_rejected() {
        let result = load_config_from_str("[locale]\ndefault = \"ja\"\n");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "locale.default",
                ..
            })
        ));
    }

    #[test]
    fn test_env_key_mapping() {
        assert_eq!(map_env_key("polling_listings_ms"), "polling.listings_ms");
        assert_eq!(map_env_key("geolocation_maximum_age_ms"), "geolocation.maximum_age_ms");
        assert_eq!(map_env_key("geocoder_base_url"), "geocoder.base_url");
        assert_eq!(map_env_key("api_allow_private_hosts"), "api.allow_private_hosts");
        assert_eq!(map_env_key("unrelated"), "unrelated");
    }

    #[test]
    fn test_position_options() {
        let options = SyncConfig::default().position_options();
        assert!(!options.high_accuracy);
        assert_eq!(options.timeout, Duration::from_secs(10));
        assert_eq!(options.maximum_age, Duration::from_secs(300));
    }
}
