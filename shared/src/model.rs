use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{CommentError, CoordinateError, RatingError};

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(ProfileId);
typed_id!(NotificationId);
typed_id!(CommentId);

/// Unix timestamp in milliseconds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[allow(clippy::cast_possible_truncation)]
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        )
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_millis() as u64))
    }
}

// --- Coordinate: validated, NaN-safe ---

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct ValidatedCoordinate {
    lat: f64,
    lon: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    lat: f64,
    lon: f64,
}

impl TryFrom<RawCoordinate> for ValidatedCoordinate {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Self::new(raw.lat, raw.lon)
    }
}

impl ValidatedCoordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    /// Grid cell of roughly 100 m used to key reverse-geocode lookups.
    #[allow(clippy::cast_possible_truncation)]
    pub fn cell(&self) -> (i32, i32) {
        (
            (self.lat * 1000.0).round() as i32,
            (self.lon * 1000.0).round() as i32,
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Price {
    pub label: String,
    pub amount: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Comment {
    pub id: CommentId,
    pub name: String,
    pub message: String,
    pub created_at: UnixTimeMs,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NewComment {
    pub name: String,
    pub message: String,
}

impl NewComment {
    pub const MAX_NAME_LENGTH: usize = 80;
    pub const MAX_MESSAGE_LENGTH: usize = 1000;

    /// Trims both fields and checks they are present and bounded.
    pub fn new(name: &str, message: &str) -> Result<Self, CommentError> {
        let name = name.trim();
        let message = message.trim();
        if name.is_empty() {
            return Err(CommentError::MissingName);
        }
        if message.is_empty() {
            return Err(CommentError::MissingMessage);
        }
        let name_len = name.chars().count();
        if name_len > Self::MAX_NAME_LENGTH {
            return Err(CommentError::TooLong {
                field: "name",
                len: name_len,
                max: Self::MAX_NAME_LENGTH,
            });
        }
        let message_len = message.chars().count();
        if message_len > Self::MAX_MESSAGE_LENGTH {
            return Err(CommentError::TooLong {
                field: "message",
                len: message_len,
                max: Self::MAX_MESSAGE_LENGTH,
            });
        }
        Ok(Self {
            name: name.to_string(),
            message: message.to_string(),
        })
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct Profile {
    pub id: ProfileId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub prices: Vec<Price>,
    #[serde(default)]
    pub photos: Vec<String>,
    /// Absent means online.
    #[serde(default)]
    pub presence: Option<Presence>,
    #[serde(default)]
    pub presence_expires_at: Option<UnixTimeMs>,
    #[serde(default)]
    pub location: Option<ValidatedCoordinate>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Newest first.
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub updated_at: Option<UnixTimeMs>,
}

// Redact the contact identifier from logs.
impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("id", &self.id)
            .field("email_present", &self.email.is_some())
            .field("name", &self.name)
            .field("presence", &self.presence)
            .field("presence_expires_at", &self.presence_expires_at)
            .field("location", &self.location)
            .field("currency", &self.currency)
            .field("comments", &self.comments.len())
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

impl Profile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ProfileId::new(id),
            email: None,
            name: name.into(),
            bio: String::new(),
            services: Vec::new(),
            attributes: BTreeMap::new(),
            prices: Vec::new(),
            photos: Vec::new(),
            presence: None,
            presence_expires_at: None,
            location: None,
            currency: None,
            comments: Vec::new(),
            updated_at: None,
        }
    }

    /// Raw presence flag as last reported by the server.
    pub fn is_online(&self) -> bool {
        !matches!(self.presence, Some(Presence::Offline))
    }

    pub fn is_presence_expired(&self, now: UnixTimeMs) -> bool {
        self.presence_expires_at.is_some_and(|at| now >= at)
    }

    /// Presence to display at `now`: online only while the flag says so and
    /// the expiry has not passed.
    pub fn effective_online(&self, now: UnixTimeMs) -> bool {
        self.is_online() && !self.is_presence_expired(now)
    }
}

/// Partial update. `None` leaves a field untouched.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prices: Option<Vec<Price>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photos: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<Presence>,
    /// `Some(None)` clears the expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_expires_at: Option<Option<UnixTimeMs>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<ValidatedCoordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl ProfilePatch {
    pub fn presence(online: bool, expires_at: Option<UnixTimeMs>) -> Self {
        Self {
            presence: Some(if online {
                Presence::Online
            } else {
                Presence::Offline
            }),
            presence_expires_at: Some(expires_at),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(name) = &self.name {
            profile.name.clone_from(name);
        }
        if let Some(bio) = &self.bio {
            profile.bio.clone_from(bio);
        }
        if let Some(services) = &self.services {
            profile.services.clone_from(services);
        }
        if let Some(attributes) = &self.attributes {
            profile.attributes.clone_from(attributes);
        }
        if let Some(prices) = &self.prices {
            profile.prices.clone_from(prices);
        }
        if let Some(photos) = &self.photos {
            profile.photos.clone_from(photos);
        }
        if let Some(presence) = self.presence {
            profile.presence = Some(presence);
        }
        if let Some(expires_at) = self.presence_expires_at {
            profile.presence_expires_at = expires_at;
        }
        if let Some(location) = self.location {
            profile.location = Some(location);
        }
        if let Some(currency) = &self.currency {
            profile.currency = Some(currency.clone());
        }
    }
}

/// Server-computed counters, replaced wholesale on every refresh.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub views_today: u64,
    pub contact_clicks_today: u64,
    pub rating_average: f64,
    pub rating_count: u64,
    pub estimated_monthly_earnings: f64,
}

impl MetricsSnapshot {
    pub fn is_well_formed(&self) -> bool {
        [self.rating_average, self.estimated_monthly_earnings]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: UnixTimeMs,
}

impl Notification {
    /// Read is a one-way transition.
    pub fn mark_read(&mut self) {
        self.read = true;
    }
}

/// Star rating, 1 to 5 inclusive.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "i64")]
pub struct Rating(u8);

impl TryFrom<i64> for Rating {
    type Error = RatingError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: i64) -> Result<Self, RatingError> {
        u8::try_from(value)
            .ok()
            .filter(|v| (Self::MIN..=Self::MAX).contains(v))
            .map(Self)
            .ok_or(RatingError::OutOfRange(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}
