//! In-memory capability doubles for tests and local shells.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::capabilities::{
    ForwardPlace, GeoPlace, Geocoder, Geolocation, PermissionQueryState, PositionError,
    PositionOptions, RemoteService,
};
use crate::error::{AppError, AppResult, ErrorKind};
use crate::model::{
    Comment, CommentId, MetricsSnapshot, NewComment, Notification, Profile, ProfileId,
    ProfilePatch, Rating, UnixTimeMs, ValidatedCoordinate,
};

fn injected(kind: ErrorKind) -> AppError {
    AppError::new(kind, "connection refused").with_internal("injected failure")
}

fn not_found(id: &ProfileId) -> AppError {
    AppError::new(ErrorKind::NotFound, "profile not found").with_context("profile_id", id.as_str())
}

#[derive(Default)]
struct RemoteState {
    profiles: Vec<Profile>,
    metrics: HashMap<ProfileId, MetricsSnapshot>,
    notifications: HashMap<ProfileId, Vec<Notification>>,
    ratings: Vec<(ProfileId, Rating)>,
}

/// Listings backend held in memory. Reads and writes can be made to fail
/// independently, and every call can be delayed.
#[derive(Default)]
pub struct FakeRemoteService {
    state: Mutex<RemoteState>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    latency: Mutex<Duration>,
    read_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

impl FakeRemoteService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: Vec<Profile>) -> Self {
        let fake = Self::new();
        fake.state.lock().profiles = profiles;
        fake
    }

    pub fn upsert_profile(&self, profile: Profile) {
        let mut state = self.state.lock();
        match state.profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile,
            None => state.profiles.push(profile),
        }
    }

    pub fn set_profiles(&self, profiles: Vec<Profile>) {
        self.state.lock().profiles = profiles;
    }

    pub fn profile(&self, id: &ProfileId) -> Option<Profile> {
        self.state.lock().profiles.iter().find(|p| &p.id == id).cloned()
    }

    pub fn set_metrics(&self, id: &ProfileId, metrics: MetricsSnapshot) {
        self.state.lock().metrics.insert(id.clone(), metrics);
    }

    pub fn set_notifications(&self, id: &ProfileId, notifications: Vec<Notification>) {
        self.state.lock().notifications.insert(id.clone(), notifications);
    }

    pub fn ratings(&self) -> Vec<(ProfileId, Rating)> {
        self.state.lock().ratings.clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.read_calls() + self.write_calls()
    }

    async fn begin_read(&self) -> AppResult<()> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected(ErrorKind::Network));
        }
        Ok(())
    }

    async fn begin_write(&self) -> AppResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected(ErrorKind::Network));
        }
        Ok(())
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteService for FakeRemoteService {
    async fn list_profiles(&self) -> AppResult<Vec<Profile>> {
        self.begin_read().await?;
        Ok(self.state.lock().profiles.clone())
    }

    async fn get_profile(&self, id: &ProfileId) -> AppResult<Profile> {
        self.begin_read().await?;
        self.profile(id).ok_or_else(|| not_found(id))
    }

    async fn get_profile_by_email(&self, email: &str) -> AppResult<Option<Profile>> {
        self.begin_read().await?;
        Ok(self
            .state
            .lock()
            .profiles
            .iter()
            .find(|p| p.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .cloned())
    }

    async fn update_profile(&self, id: &ProfileId, patch: &ProfilePatch) -> AppResult<Profile> {
        self.begin_write().await?;
        let mut state = self.state.lock();
        let profile = state
            .profiles
            .iter_mut()
            .find(|p| &p.id == id)
            .ok_or_else(|| not_found(id))?;
        patch.apply_to(profile);
        // Server-side normalisation, so callers can tell confirmed from sent.
        profile.name = profile.name.trim().to_string();
        profile.updated_at = Some(UnixTimeMs::now());
        Ok(profile.clone())
    }

    async fn get_metrics(&self, id: &ProfileId) -> AppResult<MetricsSnapshot> {
        self.begin_read().await?;
        Ok(self.state.lock().metrics.get(id).cloned().unwrap_or_default())
    }

    async fn get_notifications(&self, id: &ProfileId) -> AppResult<Vec<Notification>> {
        self.begin_read().await?;
        Ok(self.state.lock().notifications.get(id).cloned().unwrap_or_default())
    }

    async fn mark_notifications_read(&self, id: &ProfileId) -> AppResult<Vec<Notification>> {
        self.begin_write().await?;
        let mut state = self.state.lock();
        let list = state.notifications.entry(id.clone()).or_default();
        for n in list.iter_mut() {
            n.mark_read();
        }
        Ok(list.clone())
    }

    async fn submit_comment(&self, id: &ProfileId, comment: &NewComment) -> AppResult<Comment> {
        self.begin_write().await?;
        let mut state = self.state.lock();
        let profile = state
            .profiles
            .iter_mut()
            .find(|p| &p.id == id)
            .ok_or_else(|| not_found(id))?;
        let created = Comment {
            id: CommentId::generate(),
            name: comment.name.clone(),
            message: comment.message.clone(),
            created_at: UnixTimeMs::now(),
        };
        profile.comments.insert(0, created.clone());
        Ok(created)
    }

    async fn submit_rating(&self, id: &ProfileId, rating: Rating) -> AppResult<()> {
        self.begin_write().await?;
        self.state.lock().ratings.push((id.clone(), rating));
        Ok(())
    }
}

/// Geocoder answering every reverse lookup with one configured country.
#[derive(Default)]
pub struct FakeGeocoder {
    country: Mutex<Option<String>>,
    city: Mutex<Option<String>>,
    forward: Mutex<Option<ForwardPlace>>,
    failing: AtomicBool,
    reverse_calls: AtomicUsize,
    forward_calls: AtomicUsize,
}

impl FakeGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_country(&self, country_code: &str) {
        *self.country.lock() = Some(country_code.to_string());
    }

    pub fn set_city(&self, city: &str) {
        *self.city.lock() = Some(city.to_string());
    }

    pub fn set_forward(&self, place: Option<ForwardPlace>) {
        *self.forward.lock() = place;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn reverse_calls(&self) -> usize {
        self.reverse_calls.load(Ordering::SeqCst)
    }

    pub fn forward_calls(&self) -> usize {
        self.forward_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn reverse(&self, _coordinate: &ValidatedCoordinate) -> AppResult<GeoPlace> {
        self.reverse_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected(ErrorKind::Network));
        }
        let country = self.country.lock().clone();
        country
            .map(|country_code| GeoPlace {
                country_code,
                city: self.city.lock().clone(),
            })
            .ok_or_else(|| AppError::new(ErrorKind::NotFound, "no country at coordinate"))
    }

    async fn forward(&self, _query: &str) -> AppResult<Option<ForwardPlace>> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(injected(ErrorKind::Network));
        }
        Ok(self.forward.lock().clone())
    }
}

/// Scripted device geolocation.
pub struct FakeGeolocation {
    supported: bool,
    query_supported: bool,
    query_result: Mutex<Result<PermissionQueryState, PositionError>>,
    position_result: Mutex<Result<ValidatedCoordinate, PositionError>>,
    query_calls: AtomicUsize,
    position_calls: AtomicUsize,
}

impl FakeGeolocation {
    fn scripted(
        supported: bool,
        query_supported: bool,
        query: Result<PermissionQueryState, PositionError>,
        position: Result<ValidatedCoordinate, PositionError>,
    ) -> Self {
        Self {
            supported,
            query_supported,
            query_result: Mutex::new(query),
            position_result: Mutex::new(position),
            query_calls: AtomicUsize::new(0),
            position_calls: AtomicUsize::new(0),
        }
    }

    /// Permission undecided; the user has to be asked.
    pub fn prompting() -> Self {
        Self::scripted(
            true,
            true,
            Ok(PermissionQueryState::Prompt),
            Err(PositionError::Unavailable),
        )
    }

    pub fn granted(coordinate: ValidatedCoordinate) -> Self {
        Self::scripted(true, true, Ok(PermissionQueryState::Granted), Ok(coordinate))
    }

    pub fn denied() -> Self {
        Self::scripted(
            true,
            true,
            Ok(PermissionQueryState::Denied),
            Err(PositionError::PermissionDenied),
        )
    }

    pub fn unsupported() -> Self {
        Self::scripted(
            false,
            false,
            Err(PositionError::Unavailable),
            Err(PositionError::Unavailable),
        )
    }

    /// Supported, but there is no way to ask for the permission state.
    pub fn without_query(position: Result<ValidatedCoordinate, PositionError>) -> Self {
        Self::scripted(true, false, Err(PositionError::Unavailable), position)
    }

    pub fn set_query_result(&self, result: Result<PermissionQueryState, PositionError>) {
        *self.query_result.lock() = result;
    }

    pub fn set_position_result(&self, result: Result<ValidatedCoordinate, PositionError>) {
        *self.position_result.lock() = result;
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn position_calls(&self) -> usize {
        self.position_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geolocation for FakeGeolocation {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn supports_permission_query(&self) -> bool {
        self.query_supported
    }

    async fn query_permission(&self) -> Result<PermissionQueryState, PositionError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        *self.query_result.lock()
    }

    async fn current_position(
        &self,
        _options: &PositionOptions,
    ) -> Result<ValidatedCoordinate, PositionError> {
        self.position_calls.fetch_add(1, Ordering::SeqCst);
        *self.position_result.lock()
    }
}
