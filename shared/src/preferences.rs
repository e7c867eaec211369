//! Typed access to the scalar settings the location flow depends on.
//!
//! Nothing here caches: every getter goes back to the store, so a value
//! written by another session is seen on the next read.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::capabilities::{KeyNamespace, KeyValueStore, KvError, TypedKvStore};
use crate::i18n::Locale;

const PROMPT_SHOWN_KEY: &str = "geo_prompt_shown";
const PERMISSION_KEY: &str = "geo_permission";
const MANUAL_LOCALE_KEY: &str = "locale_manual";
const AGE_GATE_KEY: &str = "age_gate_accepted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoPermission {
    #[default]
    Unset,
    Granted,
    Denied,
    Dismissed,
    Unsupported,
}

#[derive(Clone)]
pub struct PreferenceStore {
    flags: TypedKvStore<bool>,
    permission: TypedKvStore<GeoPermission>,
    locale: TypedKvStore<Locale>,
}

impl PreferenceStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            flags: TypedKvStore::new(Arc::clone(&store), KeyNamespace::Consent),
            permission: TypedKvStore::new(Arc::clone(&store), KeyNamespace::Consent),
            locale: TypedKvStore::new(store, KeyNamespace::Settings),
        }
    }

    pub async fn prompt_shown(&self) -> Result<bool, KvError> {
        Ok(self.flags.get(PROMPT_SHOWN_KEY).await?.unwrap_or(false))
    }

    pub async fn set_prompt_shown(&self) -> Result<(), KvError> {
        self.flags.set(PROMPT_SHOWN_KEY, &true).await
    }

    pub async fn geo_permission(&self) -> Result<GeoPermission, KvError> {
        Ok(self.permission.get(PERMISSION_KEY).await?.unwrap_or_default())
    }

    pub async fn set_geo_permission(&self, permission: GeoPermission) -> Result<(), KvError> {
        debug!(?permission, "recording geolocation permission");
        self.permission.set(PERMISSION_KEY, &permission).await
    }

    /// Marks the prompt as shown and records the outcome.
    pub async fn record_decision(&self, permission: GeoPermission) -> Result<(), KvError> {
        self.set_prompt_shown().await?;
        self.set_geo_permission(permission).await
    }

    /// Forgets every geolocation decision so the flow starts over.
    pub async fn clear_geolocation(&self) -> Result<(), KvError> {
        self.flags.delete(PROMPT_SHOWN_KEY).await?;
        self.permission.delete(PERMISSION_KEY).await?;
        Ok(())
    }

    pub async fn manual_locale(&self) -> Result<Option<Locale>, KvError> {
        self.locale.get(MANUAL_LOCALE_KEY).await
    }

    pub async fn set_manual_locale(&self, locale: Locale) -> Result<(), KvError> {
        self.locale.set(MANUAL_LOCALE_KEY, &locale).await
    }

    pub async fn age_gate_accepted(&self) -> Result<bool, KvError> {
        Ok(self.flags.get(AGE_GATE_KEY).await?.unwrap_or(false))
    }

    pub async fn accept_age_gate(&self) -> Result<(), KvError> {
        self.flags.set(AGE_GATE_KEY, &true).await
    }
}
