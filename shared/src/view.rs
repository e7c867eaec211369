//! Engine state and the view projection handed to shells.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::capabilities::GeoPlace;
use crate::currency::CurrencyResolution;
use crate::error::UserFacingError;
use crate::i18n::{translate, Locale, MessageKey};
use crate::model::{
    Comment, MetricsSnapshot, Notification, Price, Profile, ProfileId, UnixTimeMs,
    ValidatedCoordinate,
};
use crate::preferences::GeoPermission;
use crate::reconcile::unread_count;

/// One polled data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSlot {
    Listings,
    Profile,
    Metrics,
    Notifications,
}

impl StreamSlot {
    pub const ALL: [StreamSlot; 4] = [
        StreamSlot::Listings,
        StreamSlot::Profile,
        StreamSlot::Metrics,
        StreamSlot::Notifications,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StreamSlot::Listings => "listings",
            StreamSlot::Profile => "profile",
            StreamSlot::Metrics => "metrics",
            StreamSlot::Notifications => "notifications",
        }
    }
}

/// Display currency resolved for one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileCurrency {
    pub profile_id: ProfileId,
    pub resolution: CurrencyResolution,
}

#[derive(Debug, Clone, Default)]
pub struct Model {
    pub locale: Locale,
    pub locale_manual: bool,
    pub age_gate_accepted: bool,
    /// Ordered online first.
    pub listings: Vec<Profile>,
    /// The single open profile.
    pub profile: Option<Profile>,
    pub metrics: Option<MetricsSnapshot>,
    pub notifications: Vec<Notification>,
    pub device_location: Option<ValidatedCoordinate>,
    pub device_place: Option<GeoPlace>,
    pub device_currency: Option<CurrencyResolution>,
    pub profile_currency: Option<ProfileCurrency>,
    pub location_prompt_visible: bool,
    pub geo_permission: GeoPermission,
    /// Inline transient messages from background refreshes.
    pub stream_errors: BTreeMap<StreamSlot, String>,
    pub active_error: Option<UserFacingError>,
}

impl Model {
    pub fn new(locale: Locale) -> Self {
        Self {
            locale,
            ..Self::default()
        }
    }

    pub fn clear_error(&mut self) {
        self.active_error = None;
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProfileCard {
    pub id: String,
    pub name: String,
    pub online: bool,
    pub presence_label: String,
    pub presence_expires_at: Option<UnixTimeMs>,
    pub cover_photo: Option<String>,
    pub price_from: Option<f64>,
}

impl ProfileCard {
    fn build(profile: &Profile, now: UnixTimeMs, locale: Locale) -> Self {
        let online = profile.effective_online(now);
        let label = if online {
            MessageKey::PresenceOnline
        } else {
            MessageKey::PresenceOffline
        };
        Self {
            id: profile.id.to_string(),
            name: profile.name.clone(),
            online,
            presence_label: translate(label, locale).to_string(),
            presence_expires_at: profile.presence_expires_at,
            cover_photo: profile.photos.first().cloned(),
            price_from: profile
                .prices
                .iter()
                .map(|p| p.amount)
                .filter(|a| a.is_finite())
                .reduce(f64::min),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProfileDetail {
    pub card: ProfileCard,
    pub bio: String,
    pub services: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub prices: Vec<Price>,
    pub photos: Vec<String>,
    pub comments: Vec<Comment>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StreamErrorView {
    pub stream: StreamSlot,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewModel {
    pub locale: String,
    pub age_gate_accepted: bool,
    pub listings: Vec<ProfileCard>,
    pub profile: Option<ProfileDetail>,
    pub metrics: Option<MetricsSnapshot>,
    pub notifications: Vec<Notification>,
    pub unread_notifications: usize,
    pub display_currency: String,
    pub location_prompt_visible: bool,
    pub stream_errors: Vec<StreamErrorView>,
    pub error: Option<UserFacingError>,
}

impl ViewModel {
    /// Projects `model` as seen at `now`. Presence expiry is evaluated here,
    /// never stored.
    pub fn build(model: &Model, now: UnixTimeMs) -> Self {
        let locale = model.locale;
        let display_currency = model
            .profile_currency
            .as_ref()
            .map(|c| &c.resolution)
            .or(model.device_currency.as_ref())
            .cloned()
            .unwrap_or_else(CurrencyResolution::fallback);

        Self {
            locale: locale.as_tag().to_string(),
            age_gate_accepted: model.age_gate_accepted,
            listings: model
                .listings
                .iter()
                .map(|p| ProfileCard::build(p, now, locale))
                .collect(),
            profile: model.profile.as_ref().map(|p| ProfileDetail {
                card: ProfileCard::build(p, now, locale),
                bio: p.bio.clone(),
                services: p.services.clone(),
                attributes: p.attributes.clone(),
                prices: p.prices.clone(),
                photos: p.photos.clone(),
                comments: p.comments.clone(),
            }),
            metrics: model.metrics.clone(),
            notifications: model.notifications.clone(),
            unread_notifications: unread_count(&model.notifications),
            display_currency: display_currency.code,
            location_prompt_visible: model.location_prompt_visible,
            stream_errors: model
                .stream_errors
                .iter()
                .map(|(stream, message)| StreamErrorView {
                    stream: *stream,
                    message: message.clone(),
                })
                .collect(),
            error: model.active_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::CurrencySource;
    use crate::model::Presence;

    #[test]
    fn test_expired_presence_renders_offline() {
        let mut model = Model::new(Locale::En);
        let mut p = Profile::new("p1", "Ana");
        p.presence = Some(Presence::Online);
        p.presence_expires_at = Some(UnixTimeMs(1_000));
        model.listings.push(p);

        let before = ViewModel::build(&model, UnixTimeMs(999));
        assert!(before.listings[0].online);

        let after = ViewModel::build(&model, UnixTimeMs(1_000));
        assert!(!after.listings[0].online);
        assert_eq!(after.listings[0].presence_expires_at, Some(UnixTimeMs(1_000)));
    }

    #[test]
    fn test_presence_label_is_translated() {
        let mut model = Model::new(Locale::PtBr);
        model.listings.push(Profile::new("p1", "Ana"));
        let view = ViewModel::build(&model, UnixTimeMs(0));
        assert_eq!(
            view.listings[0].presence_label,
            translate(MessageKey::PresenceOnline, Locale::PtBr)
        );
        assert_eq!(view.locale, "pt-BR");
    }

    #[test]
    fn test_profile_currency_wins_over_device_currency() {
        let mut model = Model::new(Locale::En);
        assert_eq!(ViewModel::build(&model, UnixTimeMs(0)).display_currency, "USD");

        model.device_currency = Some(CurrencyResolution {
            code: "BRL".into(),
            source: CurrencySource::Coordinates,
        });
        assert_eq!(ViewModel::build(&model, UnixTimeMs(0)).display_currency, "BRL");

        model.profile_currency = Some(ProfileCurrency {
            profile_id: ProfileId::new("p1"),
            resolution: CurrencyResolution {
                code: "EUR".into(),
                source: CurrencySource::Explicit,
            },
        });
        assert_eq!(ViewModel::build(&model, UnixTimeMs(0)).display_currency, "EUR");
    }

    #[test]
    fn test_cheapest_price_is_shown() {
        let mut model = Model::new(Locale::En);
        let mut p = Profile::new("p1", "Ana");
        p.prices = vec![
            Price {
                label: "1h".into(),
                amount: 200.0,
            },
            Price {
                label: "30m".into(),
                amount: 120.0,
            },
        ];
        model.listings.push(p);
        assert_eq!(ViewModel::build(&model, UnixTimeMs(0)).listings[0].price_from, Some(120.0));
    }
}
