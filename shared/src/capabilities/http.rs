use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use super::{ForwardPlace, GeoPlace, Geocoder, RemoteService};
use crate::error::{AppError, AppResult, ErrorKind};
use crate::model::{
    Comment, MetricsSnapshot, NewComment, Notification, Profile, ProfileId, ProfilePatch, Rating,
    ValidatedCoordinate,
};

pub const MAX_URL_LENGTH: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedUrl {
    url: String,
    scheme: String,
    host: String,
}

impl ValidatedUrl {
    /// Accepts absolute http(s) URLs with a host and no embedded credentials.
    pub fn new(url: impl Into<String>) -> Result<Self, HttpError> {
        let url = url.into();
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(HttpError::InvalidUrl {
                url: String::new(),
                reason: "URL cannot be empty".to_string(),
            });
        }
        if trimmed.len() > MAX_URL_LENGTH {
            return Err(HttpError::InvalidUrl {
                url: Self::truncate_url(trimmed),
                reason: format!("URL exceeds maximum length of {MAX_URL_LENGTH} bytes"),
            });
        }

        let parsed = Url::parse(trimmed).map_err(|e| HttpError::InvalidUrl {
            url: Self::truncate_url(trimmed),
            reason: e.to_string(),
        })?;

        let scheme = parsed.scheme().to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(HttpError::InvalidUrl {
                url: Self::truncate_url(trimmed),
                reason: format!("invalid scheme '{scheme}', only 'http' and 'https' are allowed"),
            });
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| HttpError::InvalidUrl {
                url: Self::truncate_url(trimmed),
                reason: "URL must have a host".to_string(),
            })?
            .to_lowercase();

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(HttpError::InvalidUrl {
                url: Self::truncate_url(trimmed),
                reason: "credentials in URL are not allowed".to_string(),
            });
        }

        Ok(Self {
            url: parsed.to_string(),
            scheme,
            host,
        })
    }

    /// Like [`ValidatedUrl::new`], but also rejects loopback and private hosts.
    pub fn public(url: impl Into<String>) -> Result<Self, HttpError> {
        let validated = Self::new(url)?;
        if validated.is_private() {
            return Err(HttpError::PrivateNetworkBlocked {
                url: Self::truncate_url(&validated.url),
                host: validated.host,
            });
        }
        Ok(validated)
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_private(&self) -> bool {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        if host == "localhost"
            || host.ends_with(".localhost")
            || host.ends_with(".local")
            || host.ends_with(".internal")
        {
            return true;
        }
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => {
                ip.is_loopback()
                    || ip.is_private()
                    || ip.is_link_local()
                    || ip.is_unspecified()
                    || ip.is_broadcast()
            }
            Ok(IpAddr::V6(ip)) => {
                let first = ip.segments()[0];
                ip.is_loopback()
                    || ip.is_unspecified()
                    || (first & 0xfe00) == 0xfc00
                    || (first & 0xffc0) == 0xfe80
            }
            Err(_) => false,
        }
    }

    /// Appends percent-encoded path segments to the base URL.
    pub fn join_segments(&self, segments: &[&str]) -> Result<Url, HttpError> {
        let mut url = Url::parse(&self.url).map_err(|e| HttpError::InvalidUrl {
            url: Self::truncate_url(&self.url),
            reason: e.to_string(),
        })?;
        url.path_segments_mut()
            .map_err(|()| HttpError::InvalidUrl {
                url: Self::truncate_url(&self.url),
                reason: "URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn truncate_url(url: &str) -> String {
        if url.chars().count() <= 100 {
            url.to_string()
        } else {
            format!("{}...", url.chars().take(100).collect::<String>())
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("private network access blocked: {url} resolves to {host}")]
    PrivateNetworkBlocked { url: String, host: String },

    #[error("client setup failed: {message}")]
    Client { message: String },

    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },
}

impl From<HttpError> for AppError {
    fn from(e: HttpError) -> Self {
        let kind = match e {
            HttpError::Timeout { .. } => ErrorKind::Timeout,
            HttpError::Connection { .. } => ErrorKind::Network,
            HttpError::InvalidResponse { .. } => ErrorKind::Serialization,
            HttpError::InvalidUrl { .. }
            | HttpError::PrivateNetworkBlocked { .. }
            | HttpError::Client { .. } => ErrorKind::Internal,
        };
        AppError::new(kind, "").with_internal(e.to_string())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn transport_error(e: &reqwest::Error, timeout: Duration) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if e.is_decode() {
        HttpError::InvalidResponse {
            reason: e.to_string(),
        }
    } else {
        HttpError::Connection {
            message: e.to_string(),
        }
    }
}

fn build_client(timeout: Duration, user_agent: &str) -> Result<reqwest::Client, HttpError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(|e| HttpError::Client {
            message: e.to_string(),
        })
}

/// JSON client for the listings backend.
pub struct HttpRemoteService {
    client: reqwest::Client,
    base: ValidatedUrl,
    timeout: Duration,
}

impl HttpRemoteService {
    pub fn new(base: ValidatedUrl, timeout: Duration, user_agent: &str) -> Result<Self, HttpError> {
        Ok(Self {
            client: build_client(timeout, user_agent)?,
            base,
            timeout,
        })
    }

    fn url(&self, segments: &[&str]) -> AppResult<Url> {
        Ok(self.base.join_segments(segments)?)
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> AppResult<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.ok();
        let error = AppError::from_http_status(status.as_u16(), body.as_deref());
        debug!(status = status.as_u16(), code = error.code(), "remote call failed");
        Err(error)
    }

    async fn json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> AppResult<T> {
        let response = self.execute(request).await?;
        Ok(response
            .json::<T>()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?)
    }
}

#[derive(Serialize)]
struct RatingBody {
    value: u8,
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    #[instrument(skip(self))]
    async fn list_profiles(&self) -> AppResult<Vec<Profile>> {
        let url = self.url(&["profiles"])?;
        self.json(self.client.get(url)).await
    }

    #[instrument(skip(self), fields(profile_id = %id))]
    async fn get_profile(&self, id: &ProfileId) -> AppResult<Profile> {
        let url = self.url(&["profiles", id.as_str()])?;
        self.json(self.client.get(url)).await
    }

    #[instrument(skip_all)]
    async fn get_profile_by_email(&self, email: &str) -> AppResult<Option<Profile>> {
        let mut url = self.url(&["profiles", "lookup"])?;
        url.query_pairs_mut().append_pair("email", email.trim());
        match self.json::<Profile>(self.client.get(url)).await {
            Ok(profile) => Ok(Some(profile)),
            Err(e) if e.kind == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, patch), fields(profile_id = %id))]
    async fn update_profile(&self, id: &ProfileId, patch: &ProfilePatch) -> AppResult<Profile> {
        let url = self.url(&["profiles", id.as_str()])?;
        self.json(self.client.patch(url).json(patch)).await
    }

    #[instrument(skip(self), fields(profile_id = %id))]
    async fn get_metrics(&self, id: &ProfileId) -> AppResult<MetricsSnapshot> {
        let url = self.url(&["profiles", id.as_str(), "metrics"])?;
        self.json(self.client.get(url)).await
    }

    #[instrument(skip(self), fields(profile_id = %id))]
    async fn get_notifications(&self, id: &ProfileId) -> AppResult<Vec<Notification>> {
        let url = self.url(&["profiles", id.as_str(), "notifications"])?;
        self.json(self.client.get(url)).await
    }

    #[instrument(skip(self), fields(profile_id = %id))]
    async fn mark_notifications_read(&self, id: &ProfileId) -> AppResult<Vec<Notification>> {
        let url = self.url(&["profiles", id.as_str(), "notifications", "read"])?;
        self.json(self.client.post(url)).await
    }

    #[instrument(skip(self, comment), fields(profile_id = %id))]
    async fn submit_comment(&self, id: &ProfileId, comment: &NewComment) -> AppResult<Comment> {
        let url = self.url(&["profiles", id.as_str(), "comments"])?;
        self.json(self.client.post(url).json(comment)).await
    }

    #[instrument(skip(self), fields(profile_id = %id))]
    async fn submit_rating(&self, id: &ProfileId, rating: Rating) -> AppResult<()> {
        let url = self.url(&["profiles", id.as_str(), "ratings"])?;
        let body = RatingBody {
            value: rating.value(),
        };
        self.execute(self.client.post(url).json(&body)).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    country_code: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
}

impl NominatimAddress {
    fn locality(self) -> Option<String> {
        self.city.or(self.town).or(self.village)
    }
}

#[derive(Debug, Deserialize)]
struct NominatimReverse {
    address: Option<NominatimAddress>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NominatimHit {
    lat: String,
    lon: String,
    display_name: Option<String>,
    address: Option<NominatimAddress>,
}

/// Geocoder speaking the Nominatim `jsonv2` API.
pub struct HttpGeocoder {
    client: reqwest::Client,
    base: ValidatedUrl,
    timeout: Duration,
}

impl HttpGeocoder {
    pub fn new(base: ValidatedUrl, timeout: Duration, user_agent: &str) -> Result<Self, HttpError> {
        Ok(Self {
            client: build_client(timeout, user_agent)?,
            base,
            timeout,
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, url: Url) -> AppResult<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::from_http_status(status.as_u16(), None));
        }
        Ok(response
            .json::<T>()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?)
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    #[instrument(skip(self))]
    async fn reverse(&self, coordinate: &ValidatedCoordinate) -> AppResult<GeoPlace> {
        let mut url = self.base.join_segments(&["reverse"])?;
        url.query_pairs_mut()
            .append_pair("format", "jsonv2")
            .append_pair("lat", &coordinate.lat().to_string())
            .append_pair("lon", &coordinate.lon().to_string())
            .append_pair("zoom", "10")
            .append_pair("addressdetails", "1");

        let body: NominatimReverse = self.fetch(url).await?;
        if let Some(reason) = body.error {
            return Err(AppError::new(ErrorKind::NotFound, "").with_internal(reason));
        }
        let address = body
            .address
            .ok_or_else(|| AppError::new(ErrorKind::NotFound, "").with_internal("no address"))?;
        let country_code = address
            .country_code
            .clone()
            .filter(|c| c.trim().len() == 2)
            .ok_or_else(|| {
                AppError::new(ErrorKind::NotFound, "").with_internal("no country code")
            })?
            .trim()
            .to_ascii_uppercase();

        Ok(GeoPlace {
            country_code,
            city: address.locality(),
        })
    }

    #[instrument(skip(self))]
    async fn forward(&self, query: &str) -> AppResult<Option<ForwardPlace>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(None);
        }
        let mut url = self.base.join_segments(&["search"])?;
        url.query_pairs_mut()
            .append_pair("format", "jsonv2")
            .append_pair("q", query)
            .append_pair("limit", "1")
            .append_pair("addressdetails", "1");

        let hits: Vec<NominatimHit> = self.fetch(url).await?;
        let Some(hit) = hits.into_iter().next() else {
            return Ok(None);
        };

        let parse = |raw: &str| {
            raw.parse::<f64>().map_err(|e| {
                AppError::from(HttpError::InvalidResponse {
                    reason: format!("bad coordinate '{raw}': {e}"),
                })
            })
        };
        let coordinate = ValidatedCoordinate::new(parse(&hit.lat)?, parse(&hit.lon)?)?;

        Ok(Some(ForwardPlace {
            coordinate,
            city: hit.address.and_then(NominatimAddress::locality),
            display_name: hit.display_name,
        }))
    }
}
