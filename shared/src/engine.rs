//! The engine shells drive.
//!
//! [`SyncEngine`] owns one poller per watched stream, the location flow and
//! the shared [`Model`]. Every user-initiated failure is surfaced exactly
//! once as a [`UserFacingError`]; background refresh failures only set an
//! inline message for their stream.

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{Capabilities, ForwardPlace};
use crate::config::SyncConfig;
use crate::currency::{resolve_display_currency, CurrencyResolution};
use crate::error::{AppError, ErrorKind, UserFacingError};
use crate::geocode::{locale_for_place, ReverseGeocodeResolver};
use crate::i18n::{translate, Locale, MessageKey};
use crate::location_flow::{FlowState, FlowStep, LocationFlow};
use crate::model::{
    Comment, MetricsSnapshot, NewComment, Notification, Profile, ProfileId, ProfilePatch, Rating,
    UnixTimeMs, ValidatedCoordinate,
};
use crate::optimistic::{OptimisticController, OptimisticSlot};
use crate::poller::{FetchFuture, Poller, PollerBuilder};
use crate::preferences::{GeoPermission, PreferenceStore};
use crate::reconcile::{
    mark_all_read, merge_notifications, order_by_presence, prepend_local_comment,
    replace_in_listings,
};
use crate::view::{Model, ProfileCurrency, StreamSlot, ViewModel};

pub type EngineResult<T> = Result<T, UserFacingError>;

struct Inner {
    caps: Capabilities,
    config: SyncConfig,
    model: RwLock<Model>,
    prefs: PreferenceStore,
    resolver: ReverseGeocodeResolver,
    profile_writes: OptimisticController<ProfileId>,
    notification_writes: OptimisticController<ProfileId>,
    error_seq: AtomicU64,
}

impl Inner {
    fn surface(&self, error: AppError) -> UserFacingError {
        let seq = self.error_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let mut model = self.model.write();
        let surfaced = error.to_user_facing(model.locale, seq);
        warn!(code = %surfaced.code, seq, error = %error, "surfacing error");
        model.active_error = Some(surfaced.clone());
        surfaced
    }

    fn translate(&self, error: &AppError) -> String {
        let locale = self.model.read().locale;
        error.user_facing_message(locale)
    }

    fn set_stream_error(&self, slot: StreamSlot, message: String) {
        self.model.write().stream_errors.insert(slot, message);
    }

    fn apply_listings(&self, fetched: Vec<Profile>) {
        let mut model = self.model.write();
        // Keep the local copy of anything with a write in flight.
        let merged: Vec<Profile> = fetched
            .into_iter()
            .map(|p| {
                if self.profile_writes.is_pending(&p.id) {
                    model.listings.iter().find(|l| l.id == p.id).cloned().unwrap_or(p)
                } else {
                    p
                }
            })
            .collect();
        model.listings = order_by_presence(merged);
        model.stream_errors.remove(&StreamSlot::Listings);
    }

    fn apply_profile(&self, profile: Profile) {
        if self.profile_writes.is_pending(&profile.id) {
            debug!(profile_id = %profile.id, "skipping profile refresh during pending write");
            return;
        }
        let mut model = self.model.write();
        replace_in_listings(&mut model.listings, &profile);
        model.profile = Some(profile);
        model.stream_errors.remove(&StreamSlot::Profile);
    }

    fn apply_metrics(&self, metrics: MetricsSnapshot) {
        let mut model = self.model.write();
        if !metrics.is_well_formed() {
            warn!(?metrics, "ignoring malformed metrics snapshot");
            let message = translate(MessageKey::DataError, model.locale).to_string();
            model.stream_errors.insert(StreamSlot::Metrics, message);
            return;
        }
        model.metrics = Some(metrics);
        model.stream_errors.remove(&StreamSlot::Metrics);
    }

    fn apply_notifications(&self, id: &ProfileId, incoming: Vec<Notification>) {
        if self.notification_writes.is_pending(id) {
            debug!(profile_id = %id, "skipping notification refresh during pending write");
            return;
        }
        let mut model = self.model.write();
        model.notifications = merge_notifications(&model.notifications, incoming);
        model.stream_errors.remove(&StreamSlot::Notifications);
    }
}

/// The open profile, or its listing entry when it is not open.
struct ProfileSlot<'a> {
    model: &'a RwLock<Model>,
    id: &'a ProfileId,
}

impl OptimisticSlot<Profile> for ProfileSlot<'_> {
    fn read(&self) -> Option<Profile> {
        let model = self.model.read();
        model
            .profile
            .as_ref()
            .filter(|p| &p.id == self.id)
            .or_else(|| model.listings.iter().find(|p| &p.id == self.id))
            .cloned()
    }

    fn write(&self, value: Profile) {
        let mut model = self.model.write();
        replace_in_listings(&mut model.listings, &value);
        if let Some(open) = model.profile.as_mut().filter(|p| p.id == value.id) {
            *open = value;
        }
    }
}

struct NotificationSlot<'a> {
    model: &'a RwLock<Model>,
}

impl OptimisticSlot<Vec<Notification>> for NotificationSlot<'_> {
    fn read(&self) -> Option<Vec<Notification>> {
        Some(self.model.read().notifications.clone())
    }

    fn write(&self, value: Vec<Notification>) {
        self.model.write().notifications = value;
    }
}

pub struct SyncEngine {
    inner: Arc<Inner>,
    pollers: Mutex<HashMap<StreamSlot, Poller>>,
    flow: tokio::sync::Mutex<LocationFlow>,
}

impl SyncEngine {
    pub fn new(caps: Capabilities, config: SyncConfig) -> Self {
        let prefs = PreferenceStore::new(Arc::clone(&caps.store));
        let resolver =
            ReverseGeocodeResolver::new(Arc::clone(&caps.geocoder), config.geocoder.cache_size);
        let flow = LocationFlow::new(config.position_options());
        let model = Model::new(config.default_locale());

        Self {
            inner: Arc::new(Inner {
                caps,
                config,
                model: RwLock::new(model),
                prefs,
                resolver,
                profile_writes: OptimisticController::new(),
                notification_writes: OptimisticController::new(),
                error_seq: AtomicU64::new(0),
            }),
            pollers: Mutex::new(HashMap::new()),
            flow: tokio::sync::Mutex::new(flow),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.inner.prefs
    }

    pub fn locale(&self) -> Locale {
        self.inner.model.read().locale
    }

    pub fn is_watching(&self, slot: StreamSlot) -> bool {
        self.pollers.lock().contains_key(&slot)
    }

    pub async fn flow_state(&self) -> FlowState {
        self.flow.lock().await.state()
    }

    // --- Polling ---

    fn poller(&self, slot: StreamSlot, interval: Duration) -> PollerBuilder {
        let translator = Arc::clone(&self.inner);
        let errors = Arc::clone(&self.inner);
        Poller::builder(slot.as_str(), interval)
            .translator(move |e| translator.translate(e))
            .on_error(move |message| errors.set_stream_error(slot, message))
    }

    fn install(&self, slot: StreamSlot, poller: Poller) {
        let previous = self.pollers.lock().insert(slot, poller);
        drop(previous);
    }

    /// Stops the poller for `slot`, if any. Returns once no result from it
    /// can be applied any more.
    pub fn unwatch(&self, slot: StreamSlot) {
        let poller = self.pollers.lock().remove(&slot);
        if let Some(poller) = poller {
            poller.stop();
        }
        self.inner.model.write().stream_errors.remove(&slot);
    }

    /// Stops every poller.
    pub fn shutdown(&self) {
        let pollers: Vec<Poller> = self.pollers.lock().drain().map(|(_, p)| p).collect();
        for poller in &pollers {
            poller.stop();
        }
        info!(stopped = pollers.len(), "sync engine shut down");
    }

    pub fn watch_listings(&self) {
        self.unwatch(StreamSlot::Listings);
        let remote = Arc::clone(&self.inner.caps.remote);
        let fetch = move || -> FetchFuture<Vec<Profile>> {
            let remote = Arc::clone(&remote);
            async move { remote.list_profiles().await }.boxed()
        };
        let inner = Arc::clone(&self.inner);
        let poller = self
            .poller(StreamSlot::Listings, self.inner.config.polling.listings())
            .spawn(fetch, move |profiles| inner.apply_listings(profiles));
        self.install(StreamSlot::Listings, poller);
    }

    /// Keeps `id` open and fresh. Watching another profile replaces it.
    pub fn watch_profile(&self, id: &ProfileId) {
        self.unwatch(StreamSlot::Profile);
        {
            let mut model = self.inner.model.write();
            if model.profile.as_ref().is_some_and(|p| &p.id != id) {
                model.profile = None;
                model.profile_currency = None;
            }
        }
        let remote = Arc::clone(&self.inner.caps.remote);
        let target = id.clone();
        let fetch = move || -> FetchFuture<Profile> {
            let remote = Arc::clone(&remote);
            let id = target.clone();
            async move { remote.get_profile(&id).await }.boxed()
        };
        let inner = Arc::clone(&self.inner);
        let poller = self
            .poller(StreamSlot::Profile, self.inner.config.polling.profile())
            .spawn(fetch, move |profile| inner.apply_profile(profile));
        self.install(StreamSlot::Profile, poller);
    }

    pub fn watch_metrics(&self, id: &ProfileId) {
        self.unwatch(StreamSlot::Metrics);
        self.inner.model.write().metrics = None;
        let remote = Arc::clone(&self.inner.caps.remote);
        let target = id.clone();
        let fetch = move || -> FetchFuture<MetricsSnapshot> {
            let remote = Arc::clone(&remote);
            let id = target.clone();
            async move { remote.get_metrics(&id).await }.boxed()
        };
        let inner = Arc::clone(&self.inner);
        let poller = self
            .poller(StreamSlot::Metrics, self.inner.config.polling.metrics())
            .spawn(fetch, move |metrics| inner.apply_metrics(metrics));
        self.install(StreamSlot::Metrics, poller);
    }

    pub fn watch_notifications(&self, id: &ProfileId) {
        self.unwatch(StreamSlot::Notifications);
        self.inner.model.write().notifications.clear();
        let remote = Arc::clone(&self.inner.caps.remote);
        let target = id.clone();
        let fetch = move || -> FetchFuture<Vec<Notification>> {
            let remote = Arc::clone(&remote);
            let id = target.clone();
            async move { remote.get_notifications(&id).await }.boxed()
        };
        let inner = Arc::clone(&self.inner);
        let owner = id.clone();
        let poller = self
            .poller(
                StreamSlot::Notifications,
                self.inner.config.polling.notifications(),
            )
            .spawn(fetch, move |list| inner.apply_notifications(&owner, list));
        self.install(StreamSlot::Notifications, poller);
    }

    // --- Owner operations ---

    /// Looks up the owner's profile and opens it.
    #[instrument(skip_all)]
    pub async fn load_profile_by_email(&self, email: &str) -> EngineResult<Profile> {
        let email = email.trim();
        let not_found = || AppError::keyed(ErrorKind::NotFound, MessageKey::NotFound);
        if email.is_empty() {
            return Err(self.inner.surface(not_found()));
        }

        let found = self
            .inner
            .caps
            .remote
            .get_profile_by_email(email)
            .await
            .map_err(|e| self.inner.surface(e))?;
        let profile = found.ok_or_else(|| self.inner.surface(not_found()))?;

        let mut model = self.inner.model.write();
        if model.profile.as_ref().is_some_and(|p| p.id != profile.id) {
            model.profile_currency = None;
        }
        model.profile = Some(profile.clone());
        info!(profile_id = %profile.id, "profile loaded");
        Ok(profile)
    }

    /// Switches presence on for the configured duration, or off.
    #[instrument(skip(self), fields(profile_id = %id))]
    pub async fn toggle_presence(&self, id: &ProfileId, online: bool) -> EngineResult<Profile> {
        let expires_at =
            online.then(|| UnixTimeMs::now().saturating_add(self.inner.config.presence_duration()));
        self.write_profile(id, ProfilePatch::presence(online, expires_at))
            .await
    }

    #[instrument(skip(self, patch), fields(profile_id = %id))]
    pub async fn update_profile(&self, id: &ProfileId, patch: ProfilePatch) -> EngineResult<Profile> {
        if patch.is_empty() {
            let slot = ProfileSlot {
                model: &self.inner.model,
                id,
            };
            return slot.read().ok_or_else(|| {
                self.inner
                    .surface(AppError::keyed(ErrorKind::NotFound, MessageKey::NotFound))
            });
        }
        self.write_profile(id, patch).await
    }

    async fn write_profile(&self, id: &ProfileId, patch: ProfilePatch) -> EngineResult<Profile> {
        let slot = ProfileSlot {
            model: &self.inner.model,
            id,
        };
        let remote = Arc::clone(&self.inner.caps.remote);
        let local = patch.clone();

        self.inner
            .profile_writes
            .apply(
                id.clone(),
                &slot,
                move |profile: &mut Profile| local.apply_to(profile),
                move |_sent: Profile| async move { remote.update_profile(id, &patch).await },
            )
            .await
            .map_err(|e| self.inner.surface(e))
    }

    /// Marks every notification read, locally first.
    #[instrument(skip(self), fields(profile_id = %id))]
    pub async fn mark_notifications_read(&self, id: &ProfileId) -> EngineResult<Vec<Notification>> {
        let slot = NotificationSlot {
            model: &self.inner.model,
        };
        let remote = Arc::clone(&self.inner.caps.remote);

        self.inner
            .notification_writes
            .apply(
                id.clone(),
                &slot,
                |list: &mut Vec<Notification>| mark_all_read(list),
                move |sent: Vec<Notification>| async move {
                    let confirmed = remote.mark_notifications_read(id).await?;
                    Ok(merge_notifications(&sent, confirmed))
                },
            )
            .await
            .map_err(|e| self.inner.surface(e))
    }

    // --- Visitor operations ---

    /// Posts a comment and shows it at the top straight away.
    #[instrument(skip(self, name, message), fields(profile_id = %id))]
    pub async fn submit_comment(
        &self,
        id: &ProfileId,
        name: &str,
        message: &str,
    ) -> EngineResult<Comment> {
        let comment = NewComment::new(name, message).map_err(|e| self.inner.surface(e.into()))?;
        let created = self
            .inner
            .caps
            .remote
            .submit_comment(id, &comment)
            .await
            .map_err(|e| self.inner.surface(e))?;

        let mut model = self.inner.model.write();
        if let Some(open) = model.profile.as_mut().filter(|p| &p.id == id) {
            prepend_local_comment(&mut open.comments, created.clone());
        }
        for listing in model.listings.iter_mut().filter(|p| &p.id == id) {
            prepend_local_comment(&mut listing.comments, created.clone());
        }
        Ok(created)
    }

    /// Rates a profile 1 to 5. Out-of-range values never reach the network.
    /// Displayed metrics are left for the next refresh to update.
    #[instrument(skip(self), fields(profile_id = %id))]
    pub async fn submit_rating(&self, id: &ProfileId, value: i64) -> EngineResult<()> {
        let rating = Rating::new(value).map_err(|e| self.inner.surface(e.into()))?;
        self.inner
            .caps
            .remote
            .submit_rating(id, rating)
            .await
            .map_err(|e| self.inner.surface(e))
    }

    // --- Locale, location and currency ---

    pub async fn accept_age_gate(&self) -> EngineResult<FlowState> {
        self.inner
            .prefs
            .accept_age_gate()
            .await
            .map_err(|e| self.inner.surface(e.into()))?;
        self.inner.model.write().age_gate_accepted = true;
        self.run_location_flow().await
    }

    /// A manual choice wins over detection and stops the location flow.
    #[instrument(skip(self))]
    pub async fn set_locale_manually(&self, locale: Locale) -> EngineResult<()> {
        self.inner
            .prefs
            .set_manual_locale(locale)
            .await
            .map_err(|e| self.inner.surface(e.into()))?;
        self.flow.lock().await.disable();

        let mut model = self.inner.model.write();
        model.locale = locale;
        model.locale_manual = true;
        model.location_prompt_visible = false;
        Ok(())
    }

    pub async fn run_location_flow(&self) -> EngineResult<FlowState> {
        let mut flow = self.flow.lock().await;
        let step = flow
            .evaluate(&self.inner.prefs, self.inner.caps.geolocation.as_ref())
            .await
            .map_err(|e| self.inner.surface(e))?;
        let state = flow.state();
        drop(flow);

        if state != FlowState::Unasked {
            self.inner.model.write().age_gate_accepted = true;
        }
        if state == FlowState::Disabled {
            self.restore_manual_locale().await?;
        }
        self.handle_step(step).await;
        Ok(state)
    }

    /// The user's answer to the location prompt.
    pub async fn respond_to_location_prompt(&self, allow: bool) -> EngineResult<FlowState> {
        let mut flow = self.flow.lock().await;
        let step = flow
            .respond(&self.inner.prefs, self.inner.caps.geolocation.as_ref(), allow)
            .await
            .map_err(|e| self.inner.surface(e))?;
        let state = flow.state();
        drop(flow);

        self.handle_step(step).await;
        Ok(state)
    }

    /// Forgets the stored location answer so the next run asks again.
    pub async fn reset_location_consent(&self) -> EngineResult<()> {
        self.inner
            .prefs
            .clear_geolocation()
            .await
            .map_err(|e| self.inner.surface(e.into()))?;
        *self.flow.lock().await = LocationFlow::new(self.inner.config.position_options());

        let mut model = self.inner.model.write();
        model.geo_permission = GeoPermission::Unset;
        model.location_prompt_visible = false;
        Ok(())
    }

    async fn restore_manual_locale(&self) -> EngineResult<()> {
        let stored = self
            .inner
            .prefs
            .manual_locale()
            .await
            .map_err(|e| self.inner.surface(e.into()))?;
        if let Some(locale) = stored {
            let mut model = self.inner.model.write();
            model.locale = locale;
            model.locale_manual = true;
        }
        Ok(())
    }

    async fn handle_step(&self, step: FlowStep) {
        match step {
            FlowStep::Idle => {}
            FlowStep::ShowPrompt => self.inner.model.write().location_prompt_visible = true,
            FlowStep::Finished(permission) => {
                let mut model = self.inner.model.write();
                model.location_prompt_visible = false;
                model.geo_permission = permission;
            }
            FlowStep::Located(coordinate) => {
                {
                    let mut model = self.inner.model.write();
                    model.location_prompt_visible = false;
                    model.geo_permission = GeoPermission::Granted;
                    model.device_location = Some(coordinate);
                }
                self.apply_device_location(&coordinate).await;
            }
        }
    }

    /// Derives locale and currency from the device position. A failed lookup
    /// keeps whatever was there before.
    async fn apply_device_location(&self, coordinate: &ValidatedCoordinate) {
        let Some(place) = self.inner.resolver.resolve(coordinate).await else {
            debug!("no country for device position; keeping locale and currency");
            return;
        };
        let currency = resolve_display_currency(None, Some(&place.country_code));

        let mut model = self.inner.model.write();
        if !model.locale_manual {
            if let Some(locale) = locale_for_place(&place) {
                if model.locale != locale {
                    info!(%locale, country = %place.country_code, "locale detected");
                    model.locale = locale;
                }
            }
        }
        model.device_currency = Some(currency);
        model.device_place = Some(place);
    }

    /// Display currency for a loaded profile.
    #[instrument(skip(self), fields(profile_id = %id))]
    pub async fn resolve_profile_currency(&self, id: &ProfileId) -> EngineResult<CurrencyResolution> {
        let slot = ProfileSlot {
            model: &self.inner.model,
            id,
        };
        let profile = slot.read().ok_or_else(|| {
            self.inner
                .surface(AppError::keyed(ErrorKind::NotFound, MessageKey::NotFound))
        })?;
        // A prior value only stands in for the same profile.
        let prior = self
            .inner
            .model
            .read()
            .profile_currency
            .as_ref()
            .filter(|c| &c.profile_id == id)
            .map(|c| c.resolution.clone());

        let resolved = self
            .inner
            .resolver
            .profile_currency(&profile, prior.as_ref())
            .await;
        self.inner.model.write().profile_currency = Some(ProfileCurrency {
            profile_id: id.clone(),
            resolution: resolved.clone(),
        });
        Ok(resolved)
    }

    /// Best-effort place search. Failures read as no match.
    pub async fn search_location(&self, query: &str) -> Option<ForwardPlace> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        self.inner.resolver.search(query).await
    }

    // --- View ---

    /// Clears the surfaced error if it is still the one numbered `seq`.
    pub fn dismiss_error(&self, seq: u64) {
        let mut model = self.inner.model.write();
        if model.active_error.as_ref().is_some_and(|e| e.seq == seq) {
            model.clear_error();
        }
    }

    pub fn view(&self, now: UnixTimeMs) -> ViewModel {
        ViewModel::build(&self.inner.model.read(), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::MemoryKvStore;
    use crate::model::Presence;
    use crate::testing::{FakeGeocoder, FakeGeolocation, FakeRemoteService};

    struct Harness {
        engine: SyncEngine,
        remote: Arc<FakeRemoteService>,
        geocoder: Arc<FakeGeocoder>,
        geolocation: Arc<FakeGeolocation>,
    }

    fn harness(profiles: Vec<Profile>, geolocation: FakeGeolocation) -> Harness {
        let remote = Arc::new(FakeRemoteService::with_profiles(profiles));
        let geocoder = Arc::new(FakeGeocoder::new());
        let geolocation = Arc::new(geolocation);
        let caps = Capabilities::new(
            remote.clone(),
            geocoder.clone(),
            geolocation.clone(),
            Arc::new(MemoryKvStore::new()),
        );
        Harness {
            engine: SyncEngine::new(caps, SyncConfig::default()),
            remote,
            geocoder,
            geolocation,
        }
    }

    fn owner() -> Profile {
        let mut p = Profile::new("p1", "Ana");
        p.email = Some("ana@example.com".into());
        p.presence = Some(Presence::Offline);
        p
    }

    #[tokio::test]
    async fn test_toggle_presence_confirms_server_value() {
        let h = harness(vec![owner()], FakeGeolocation::prompting());
        h.engine.load_profile_by_email(" ANA@example.com ").await.unwrap();

        let updated = h.engine.toggle_presence(&ProfileId::new("p1"), true).await.unwrap();
        assert_eq!(updated.presence, Some(Presence::Online));
        assert!(updated.presence_expires_at.is_some());
        assert!(updated.updated_at.is_some());

        let view = h.engine.view(UnixTimeMs::now());
        assert!(view.profile.unwrap().card.online);
        assert!(view.error.is_none());
    }

    #[tokio::test]
    async fn test_failed_update_rolls_back_and_surfaces_once() {
        let h = harness(vec![owner()], FakeGeolocation::prompting());
        h.engine.load_profile_by_email("ana@example.com").await.unwrap();
        h.remote.set_fail_writes(true);

        let patch = ProfilePatch {
            bio: Some("new bio".into()),
            ..ProfilePatch::default()
        };
        let err = h
            .engine
            .update_profile(&ProfileId::new("p1"), patch)
            .await
            .unwrap_err();

        assert_eq!(err.code, "NETWORK_ERROR");
        assert_eq!(err.seq, 1);
        let view = h.engine.view(UnixTimeMs::now());
        assert_eq!(view.profile.unwrap().bio, "");
        assert_eq!(view.error, Some(err));
    }

    #[tokio::test]
    async fn test_unknown_email_is_not_found() {
        let h = harness(vec![owner()], FakeGeolocation::prompting());
        let err = h.engine.load_profile_by_email("nobody@example.com").await.unwrap_err();
        assert_eq!(err.code, "NOT_FOUND");
        assert_eq!(err.message, translate(MessageKey::NotFound, Locale::En));
    }

    #[tokio::test]
    async fn test_invalid_comment_skips_network() {
        let h = harness(vec![owner()], FakeGeolocation::prompting());
        let err = h
            .engine
            .submit_comment(&ProfileId::new("p1"), "  ", "hello")
            .await
            .unwrap_err();
        assert_eq!(err.code, "VALIDATION_ERROR");
        assert_eq!(h.remote.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_comment_is_prepended_on_open_profile() {
        let h = harness(vec![owner()], FakeGeolocation::prompting());
        h.engine.load_profile_by_email("ana@example.com").await.unwrap();

        let created = h
            .engine
            .submit_comment(&ProfileId::new("p1"), "Rita", " lovely ")
            .await
            .unwrap();
        assert_eq!(created.message, "lovely");

        let comments = h.engine.view(UnixTimeMs::now()).profile.unwrap().comments;
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].id, created.id);
    }

    #[tokio::test]
    async fn test_mark_notifications_read_rolls_back() {
        let h = harness(vec![owner()], FakeGeolocation::prompting());
        let id = ProfileId::new("p1");
        h.engine.inner.model.write().notifications = vec![Notification {
            id: crate::model::NotificationId::new("n1"),
            kind: "comment".into(),
            title: "New comment".into(),
            body: String::new(),
            read: false,
            created_at: UnixTimeMs(0),
        }];
        h.remote.set_fail_writes(true);

        assert!(h.engine.mark_notifications_read(&id).await.is_err());
        assert_eq!(h.engine.view(UnixTimeMs(0)).unread_notifications, 1);
    }

    #[tokio::test]
    async fn test_located_device_sets_locale_and_currency() {
        let coord = ValidatedCoordinate::new(38.72, -9.14).unwrap();
        let h = harness(vec![], FakeGeolocation::granted(coord));
        h.geocoder.set_country("PT");

        let state = h.engine.accept_age_gate().await.unwrap();
        assert_eq!(
            state,
            FlowState::Resolved {
                permission: GeoPermission::Granted
            }
        );
        assert_eq!(h.engine.locale(), Locale::PtPt);
        assert_eq!(h.engine.view(UnixTimeMs(0)).display_currency, "EUR");
        assert_eq!(h.geolocation.position_calls(), 1);
    }

    #[tokio::test]
    async fn test_geocode_failure_keeps_prior_locale() {
        let coord = ValidatedCoordinate::new(38.72, -9.14).unwrap();
        let h = harness(vec![], FakeGeolocation::granted(coord));
        h.geocoder.set_failing(true);

        h.engine.accept_age_gate().await.unwrap();
        assert_eq!(h.engine.locale(), Locale::En);
        let view = h.engine.view(UnixTimeMs(0));
        assert_eq!(view.display_currency, "USD");
        assert!(view.error.is_none());
    }

    #[tokio::test]
    async fn test_manual_locale_disables_detection() {
        let h = harness(vec![], FakeGeolocation::prompting());
        h.engine.set_locale_manually(Locale::De).await.unwrap();

        let state = h.engine.accept_age_gate().await.unwrap();
        assert_eq!(state, FlowState::Disabled);
        assert_eq!(h.engine.locale(), Locale::De);
        assert_eq!(h.geolocation.query_calls(), 0);
        assert!(!h.engine.view(UnixTimeMs(0)).location_prompt_visible);
    }

    #[tokio::test]
    async fn test_prompt_then_allow() {
        let coord = ValidatedCoordinate::new(-23.55, -46.63).unwrap();
        let h = harness(vec![], FakeGeolocation::prompting());
        h.geolocation.set_position_result(Ok(coord));
        h.geocoder.set_country("BR");

        assert_eq!(h.engine.accept_age_gate().await.unwrap(), FlowState::PromptVisible);
        assert!(h.engine.view(UnixTimeMs(0)).location_prompt_visible);

        h.engine.respond_to_location_prompt(true).await.unwrap();
        let view = h.engine.view(UnixTimeMs(0));
        assert!(!view.location_prompt_visible);
        assert_eq!(view.locale, "pt-BR");
        assert_eq!(view.display_currency, "BRL");
    }

    #[tokio::test]
    async fn test_resolve_profile_currency() {
        let mut p = owner();
        p.location = Some(ValidatedCoordinate::new(19.43, -99.13).unwrap());
        let h = harness(vec![p], FakeGeolocation::prompting());
        h.geocoder.set_country("MX");
        h.engine.load_profile_by_email("ana@example.com").await.unwrap();

        let resolved = h
            .engine
            .resolve_profile_currency(&ProfileId::new("p1"))
            .await
            .unwrap();
        assert_eq!(resolved.code, "MXN");
        assert_eq!(h.engine.view(UnixTimeMs(0)).display_currency, "MXN");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lookup_keeps_prior_currency_only_for_same_profile() {
        let mut a = owner();
        a.location = Some(ValidatedCoordinate::new(19.43, -99.13).unwrap());
        let mut b = Profile::new("p2", "Bia");
        b.location = Some(ValidatedCoordinate::new(-33.92, 18.42).unwrap());
        let h = harness(vec![a, b], FakeGeolocation::prompting());
        h.geocoder.set_country("MX");
        h.engine.load_profile_by_email("ana@example.com").await.unwrap();
        h.engine.watch_listings();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let a_currency = h
            .engine
            .resolve_profile_currency(&ProfileId::new("p1"))
            .await
            .unwrap();
        assert_eq!(a_currency.code, "MXN");

        h.geocoder.set_failing(true);
        let b_currency = h
            .engine
            .resolve_profile_currency(&ProfileId::new("p2"))
            .await
            .unwrap();
        assert_eq!(b_currency, CurrencyResolution::fallback());

        let a_again = h
            .engine
            .resolve_profile_currency(&ProfileId::new("p1"))
            .await
            .unwrap();
        assert_eq!(a_again.code, "MXN");
        h.engine.shutdown();
    }

    #[tokio::test]
    async fn test_blank_search_skips_geocoder() {
        let h = harness(vec![], FakeGeolocation::prompting());
        assert!(h.engine.search_location("   ").await.is_none());
        assert_eq!(h.geocoder.forward_calls(), 0);
    }

    #[tokio::test]
    async fn test_dismiss_error_only_clears_matching_seq() {
        let h = harness(vec![], FakeGeolocation::prompting());
        let first = h.engine.submit_rating(&ProfileId::new("p1"), 9).await.unwrap_err();
        let second = h.engine.submit_rating(&ProfileId::new("p1"), 0).await.unwrap_err();
        assert!(second.seq > first.seq);

        h.engine.dismiss_error(first.seq);
        assert_eq!(h.engine.view(UnixTimeMs(0)).error, Some(second.clone()));
        h.engine.dismiss_error(second.seq);
        assert!(h.engine.view(UnixTimeMs(0)).error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_is_inline_only() {
        let h = harness(vec![owner()], FakeGeolocation::prompting());
        h.remote.set_fail_reads(true);
        h.engine.watch_listings();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let view = h.engine.view(UnixTimeMs(0));
        assert!(view.error.is_none());
        assert_eq!(view.stream_errors.len(), 1);
        assert_eq!(view.stream_errors[0].stream, StreamSlot::Listings);

        h.remote.set_fail_reads(false);
        tokio::time::sleep(Duration::from_secs(15)).await;
        let view = h.engine.view(UnixTimeMs(0));
        assert!(view.stream_errors.is_empty());
        assert_eq!(view.listings.len(), 1);
        h.engine.shutdown();
    }
}
