//! `sync-probe` -- watches the live listings feed and logs what a shell
//! would render.
//!
//! Reads `profile-sync.toml` from the working directory and `PROFILE_SYNC_*`
//! overrides from the environment. Runs until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use profile_sync::capabilities::http::{HttpGeocoder, HttpRemoteService, ValidatedUrl};
use profile_sync::capabilities::{
    Capabilities, KeyValueStore, MemoryKvStore, SqliteKvStore, UnsupportedGeolocation,
};
use profile_sync::telemetry::{init_tracing, DEFAULT_DIRECTIVE};
use profile_sync::{load_config, StreamSlot, SyncConfig, SyncEngine, UnixTimeMs};

/// How often the reconciled view is logged.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

fn build_capabilities(config: &SyncConfig) -> Result<Capabilities, Box<dyn std::error::Error>> {
    let api_url = if config.api.allow_private_hosts {
        ValidatedUrl::new(config.api.base_url.clone())?
    } else {
        ValidatedUrl::public(config.api.base_url.clone())?
    };
    let geocoder_url = ValidatedUrl::public(config.geocoder.base_url.clone())?;

    let remote = HttpRemoteService::new(api_url, config.request_timeout(), &config.api.user_agent)?;
    let geocoder =
        HttpGeocoder::new(geocoder_url, config.request_timeout(), &config.api.user_agent)?;

    let store: Arc<dyn KeyValueStore> = match &config.storage.path {
        Some(path) => Arc::new(SqliteKvStore::open(path)?),
        None => Arc::new(MemoryKvStore::new()),
    };

    Ok(Capabilities::new(
        Arc::new(remote),
        Arc::new(geocoder),
        Arc::new(UnsupportedGeolocation),
        store,
    ))
}

#[tokio::main]
async fn main() {
    init_tracing(DEFAULT_DIRECTIVE);

    let config = load_config().unwrap_or_else(|e| {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    });

    let caps = build_capabilities(&config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to set up adapters");
        std::process::exit(1);
    });

    tracing::info!(
        api = %config.api.base_url,
        listings_ms = config.polling.listings_ms,
        "Starting sync-probe",
    );

    let engine = SyncEngine::new(caps, config);
    if let Err(e) = engine.run_location_flow().await {
        tracing::warn!(message = %e.message, "location flow unavailable");
    }
    engine.watch_listings();

    let mut report = tokio::time::interval(REPORT_INTERVAL);
    loop {
        tokio::select! {
            _ = report.tick() => {
                let view = engine.view(UnixTimeMs::now());
                let online = view.listings.iter().filter(|c| c.online).count();
                tracing::info!(
                    listings = view.listings.len(),
                    online,
                    locale = %view.locale,
                    currency = %view.display_currency,
                    "view",
                );
                for error in &view.stream_errors {
                    tracing::warn!(stream = error.stream.as_str(), message = %error.message, "refresh failing");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    engine.unwatch(StreamSlot::Listings);
    engine.shutdown();
}
