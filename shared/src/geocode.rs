//! Reverse geocoding with failure absorption, plus locale and currency
//! derivation from the resulting country.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::capabilities::{ForwardPlace, GeoPlace, Geocoder};
use crate::currency::{resolve_display_currency, CurrencyResolution, CurrencySource};
use crate::i18n::{locale_for_country, Locale};
use crate::model::{Profile, ValidatedCoordinate};

pub const DEFAULT_CACHE_SIZE: usize = 256;

pub struct ReverseGeocodeResolver {
    geocoder: Arc<dyn Geocoder>,
    cache: Mutex<LruCache<(i32, i32), GeoPlace>>,
}

impl ReverseGeocodeResolver {
    pub fn new(geocoder: Arc<dyn Geocoder>, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            geocoder,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Country (and city, when known) at `coordinate`, or `None` on any
    /// failure. Successful lookups are cached per ~100 m cell.
    #[instrument(skip(self))]
    pub async fn resolve(&self, coordinate: &ValidatedCoordinate) -> Option<GeoPlace> {
        let cell = coordinate.cell();
        let cached = self.cache.lock().get(&cell).cloned();
        if cached.is_some() {
            return cached;
        }

        match self.geocoder.reverse(coordinate).await {
            Ok(place) => {
                self.cache.lock().put(cell, place.clone());
                Some(place)
            }
            Err(e) => {
                debug!(error = %e, "reverse geocode failed");
                None
            }
        }
    }

    pub async fn resolve_country(&self, coordinate: &ValidatedCoordinate) -> Option<String> {
        self.resolve(coordinate).await.map(|p| p.country_code)
    }

    /// Forward lookup for a typed place name. Failures read as no match.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str) -> Option<ForwardPlace> {
        match self.geocoder.forward(query).await {
            Ok(found) => found,
            Err(e) => {
                debug!(error = %e, "forward geocode failed");
                None
            }
        }
    }

    /// Display currency for `profile`. When the profile has coordinates but
    /// the lookup fails, `prior` is kept if there is one.
    pub async fn profile_currency(
        &self,
        profile: &Profile,
        prior: Option<&CurrencyResolution>,
    ) -> CurrencyResolution {
        let explicit = resolve_display_currency(profile.currency.as_deref(), None);
        if explicit.source == CurrencySource::Explicit {
            return explicit;
        }
        let Some(location) = profile.location else {
            return CurrencyResolution::fallback();
        };
        match self.resolve_country(&location).await {
            Some(country) => resolve_display_currency(None, Some(&country)),
            None => prior.cloned().unwrap_or_else(CurrencyResolution::fallback),
        }
    }
}

/// Locale implied by a resolved place, if the country is mapped.
pub fn locale_for_place(place: &GeoPlace) -> Option<Locale> {
    locale_for_country(&place.country_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGeocoder;

    fn at(lat: f64, lon: f64) -> ValidatedCoordinate {
        ValidatedCoordinate::new(lat, lon).unwrap()
    }

    #[tokio::test]
    async fn test_failure_yields_none() {
        let geocoder = Arc::new(FakeGeocoder::new());
        geocoder.set_failing(true);
        let resolver = ReverseGeocodeResolver::new(geocoder, 8);

        assert_eq!(resolver.resolve_country(&at(1.0, 1.0)).await, None);
    }

    #[tokio::test]
    async fn test_lookups_are_cached_per_cell() {
        let geocoder = Arc::new(FakeGeocoder::new());
        geocoder.set_country("BR");
        let resolver = ReverseGeocodeResolver::new(geocoder.clone(), 8);

        assert_eq!(
            resolver.resolve_country(&at(-23.5501, -46.6331)).await.as_deref(),
            Some("BR")
        );
        assert_eq!(
            resolver.resolve_country(&at(-23.5502, -46.6332)).await.as_deref(),
            Some("BR")
        );
        assert_eq!(geocoder.reverse_calls(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let geocoder = Arc::new(FakeGeocoder::new());
        geocoder.set_country("PT");
        geocoder.set_failing(true);
        let resolver = ReverseGeocodeResolver::new(geocoder.clone(), 8);

        assert_eq!(resolver.resolve_country(&at(38.7, -9.1)).await, None);
        geocoder.set_failing(false);
        assert_eq!(
            resolver.resolve_country(&at(38.7, -9.1)).await.as_deref(),
            Some("PT")
        );
    }

    #[tokio::test]
    async fn test_profile_currency_precedence() {
        let geocoder = Arc::new(FakeGeocoder::new());
        geocoder.set_country("MX");
        let resolver = ReverseGeocodeResolver::new(geocoder.clone(), 8);

        let mut profile = Profile::new("p1", "Ana");
        assert_eq!(
            resolver.profile_currency(&profile, None).await,
            CurrencyResolution::fallback()
        );

        profile.location = Some(at(19.43, -99.13));
        let by_coords = resolver.profile_currency(&profile, None).await;
        assert_eq!(by_coords.code, "MXN");
        assert_eq!(by_coords.source, CurrencySource::Coordinates);

        profile.currency = Some("eur".into());
        let explicit = resolver.profile_currency(&profile, None).await;
        assert_eq!(explicit.code, "EUR");
        assert_eq!(explicit.source, CurrencySource::Explicit);
    }

    #[tokio::test]
    async fn test_profile_currency_keeps_prior_on_failure() {
        let geocoder = Arc::new(FakeGeocoder::new());
        geocoder.set_failing(true);
        let resolver = ReverseGeocodeResolver::new(geocoder, 8);

        let mut profile = Profile::new("p1", "Ana");
        profile.location = Some(at(19.43, -99.13));
        let prior = CurrencyResolution {
            code: "MXN".into(),
            source: CurrencySource::Coordinates,
        };

        assert_eq!(resolver.profile_currency(&profile, Some(&prior)).await, prior);
    }

    #[tokio::test]
    async fn test_search_swallows_errors() {
        let geocoder = Arc::new(FakeGeocoder::new());
        geocoder.set_failing(true);
        let resolver = ReverseGeocodeResolver::new(geocoder, 8);
        assert!(resolver.search("Porto").await.is_none());
    }

    #[test]
    fn test_locale_for_place() {
        let place = GeoPlace {
            country_code: "BR".into(),
            city: None,
        };
        assert_eq!(locale_for_place(&place), Some(Locale::PtBr));
    }
}
