use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::i18n::{translate, Locale, MessageKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Validation,
    NotFound,
    PermissionDenied,
    Unsupported,
    Conflict,
    RateLimited,
    Storage,
    Serialization,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Unsupported => "UNSUPPORTED",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network
            | Self::Timeout
            | Self::Conflict
            | Self::RateLimited
            | Self::Storage
            | Self::Unsupported => ErrorSeverity::Transient,

            Self::Serialization | Self::Internal => ErrorSeverity::Fatal,

            Self::Validation | Self::NotFound | Self::PermissionDenied | Self::Unknown => {
                ErrorSeverity::Permanent
            }
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::Storage | Self::Conflict
        )
    }

    /// Failures that background polling absorbs silently and retries on the
    /// next tick.
    #[must_use]
    pub const fn is_background_tolerable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::Unsupported | Self::RateLimited
        )
    }

    const fn message_key(self) -> MessageKey {
        match self {
            Self::Network => MessageKey::NetworkUnavailable,
            Self::Timeout => MessageKey::Timeout,
            Self::NotFound => MessageKey::NotFound,
            Self::PermissionDenied => MessageKey::PermissionDenied,
            Self::Unsupported => MessageKey::Unsupported,
            Self::Storage => MessageKey::StorageFailed,
            Self::Serialization => MessageKey::DataError,
            Self::Validation
            | Self::Conflict
            | Self::RateLimited
            | Self::Internal
            | Self::Unknown => MessageKey::Generic,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub message_key: Option<MessageKey>,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            message_key: None,
            internal_message: None,
            context: HashMap::new(),
        }
    }

    /// An error whose user-visible text comes from the catalogue entry `key`.
    #[must_use]
    pub fn keyed(kind: ErrorKind, key: MessageKey) -> Self {
        let mut error = Self::new(kind, format!("{key:?}"));
        error.message_key = Some(key);
        error
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    /// Short, translated text for the user. Catalogue keys win; server-sent
    /// validation text is shown as-is; an error with no message at all gets
    /// the generic fallback.
    #[must_use]
    pub fn user_facing_message(&self, locale: Locale) -> String {
        if let Some(key) = self.message_key {
            return translate(key, locale).to_string();
        }
        if self.message.trim().is_empty() {
            return translate(MessageKey::Generic, locale).to_string();
        }
        match self.kind {
            ErrorKind::Validation => self.message.clone(),
            kind => translate(kind.message_key(), locale).to_string(),
        }
    }

    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>) -> Self {
        let kind = match status {
            400 | 422 => ErrorKind::Validation,
            401 | 403 => ErrorKind::PermissionDenied,
            404 | 410 => ErrorKind::NotFound,
            408 | 504 => ErrorKind::Timeout,
            409 => ErrorKind::Conflict,
            429 => ErrorKind::RateLimited,
            501 => ErrorKind::Unsupported,
            502 | 503 => ErrorKind::Network,
            500..=599 => ErrorKind::Internal,
            _ => ErrorKind::Unknown,
        };

        let message = body
            .and_then(|b| serde_json::from_slice::<ApiErrorResponse>(b).ok())
            .map(|e| e.message)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_default();

        Self::new(kind, message)
            .with_internal(format!("HTTP error: {status}"))
            .with_context("http_status", status.to_string())
    }

    #[must_use]
    pub fn to_user_facing(&self, locale: Locale, seq: u64) -> UserFacingError {
        UserFacingError {
            message: self.user_facing_message(locale),
            code: self.code().to_string(),
            is_transient: matches!(self.severity, ErrorSeverity::Transient),
            seq,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: String,
}

pub type AppResult<T> = Result<T, AppError>;

/// The only error shape a view ever sees. `code` is for shell logic and is
/// never rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFacingError {
    pub message: String,
    pub code: String,
    pub is_transient: bool,
    pub seq: u64,
}

#[derive(Debug, Clone, Error)]
pub enum CoordinateError {
    #[error("Latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("Longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("Coordinate value is not finite (NaN or Infinity)")]
    NonFinite,
}

impl From<CoordinateError> for AppError {
    fn from(e: CoordinateError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
            .with_internal("coordinate rejected")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RatingError {
    #[error("rating {0} is outside 1..=5")]
    OutOfRange(i64),
}

impl From<RatingError> for AppError {
    fn from(e: RatingError) -> Self {
        AppError::keyed(ErrorKind::Validation, MessageKey::InvalidRating).with_internal(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommentError {
    #[error("comment author is empty")]
    MissingName,
    #[error("comment message is empty")]
    MissingMessage,
    #[error("comment {field} too long ({len} > {max})")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

impl From<CommentError> for AppError {
    fn from(e: CommentError) -> Self {
        AppError::keyed(ErrorKind::Validation, MessageKey::EmptyComment).with_internal(e.to_string())
    }
}
