//! Fixed-interval polling with teardown safety.
//!
//! Every tick dispatches a fetch without waiting for the previous one, so
//! fetches may overlap. Each dispatch carries a sequence number and a result
//! older than the last applied one is dropped. Results and errors are only
//! delivered while the poller is live; [`Poller::stop`] (also run on drop)
//! waits for a handler that is already running and guarantees none runs
//! afterwards. In-flight network calls are not cancelled, only ignored.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::i18n::Locale;

pub type FetchFuture<T> = BoxFuture<'static, AppResult<T>>;

/// Shortest interval a poller will tick at.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

type ResultHandler<T> = Arc<dyn Fn(T) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(String) + Send + Sync>;
type Translator = Arc<dyn Fn(&AppError) -> String + Send + Sync>;

#[derive(Default)]
struct Gate {
    last_applied: u64,
}

struct Shared {
    name: String,
    live: AtomicBool,
    next_seq: AtomicU64,
    gate: Mutex<Gate>,
}

impl Shared {
    /// Runs `deliver` under the gate if the poller is still live and `seq`
    /// is not older than what was already applied.
    fn deliver(&self, seq: u64, advance: bool, deliver: impl FnOnce()) {
        let mut gate = self.gate.lock();
        if !self.live.load(Ordering::Acquire) {
            debug!(poller = %self.name, seq, "discarding result after stop");
            return;
        }
        if seq < gate.last_applied {
            debug!(poller = %self.name, seq, last = gate.last_applied, "discarding stale result");
            return;
        }
        if advance {
            gate.last_applied = seq;
        }
        deliver();
    }
}

pub struct PollerBuilder {
    name: String,
    interval: Duration,
    on_error: Option<ErrorHandler>,
    translator: Translator,
}

impl PollerBuilder {
    /// Receives the translated message for every failed fetch.
    #[must_use]
    pub fn on_error(mut self, handler: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn translator(
        mut self,
        translate: impl Fn(&AppError) -> String + Send + Sync + 'static,
    ) -> Self {
        self.translator = Arc::new(translate);
        self
    }

    /// Starts polling on the current tokio runtime. The first fetch is
    /// dispatched immediately.
    #[allow(clippy::cast_possible_truncation)]
    pub fn spawn<T, F>(self, fetch: F, on_result: impl Fn(T) + Send + Sync + 'static) -> Poller
    where
        T: Send + 'static,
        F: Fn() -> FetchFuture<T> + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            name: self.name,
            live: AtomicBool::new(true),
            next_seq: AtomicU64::new(0),
            gate: Mutex::new(Gate::default()),
        });
        let on_result: ResultHandler<T> = Arc::new(on_result);
        let on_error = self.on_error;
        let translator = self.translator;
        let interval = self.interval;

        info!(poller = %shared.name, interval_ms = interval.as_millis() as u64, "poller started");

        let task = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if !shared.live.load(Ordering::Acquire) {
                        break;
                    }
                    let seq = shared.next_seq.fetch_add(1, Ordering::AcqRel) + 1;
                    let request = fetch();

                    let shared = Arc::clone(&shared);
                    let on_result = Arc::clone(&on_result);
                    let on_error = on_error.clone();
                    let translator = Arc::clone(&translator);
                    tokio::spawn(async move {
                        match request.await {
                            Ok(value) => shared.deliver(seq, true, || on_result(value)),
                            Err(e) => {
                                warn!(poller = %shared.name, seq, error = %e, "poll failed");
                                if let Some(on_error) = on_error {
                                    shared.deliver(seq, false, || on_error(translator(&e)));
                                }
                            }
                        }
                    });
                }
            })
        };

        Poller {
            shared,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Handle to a running poll loop. Dropping it stops the loop.
pub struct Poller {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    /// Intervals below [`MIN_INTERVAL`] are raised to it.
    pub fn builder(name: impl Into<String>, interval: Duration) -> PollerBuilder {
        let name = name.into();
        if interval < MIN_INTERVAL {
            warn!(poller = %name, ?interval, "interval below minimum; clamping");
        }
        PollerBuilder {
            name,
            interval: interval.max(MIN_INTERVAL),
            on_error: None,
            translator: Arc::new(|e: &AppError| e.user_facing_message(Locale::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_running(&self) -> bool {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Stops the loop. Idempotent. Must not be called from inside this
    /// poller's own handlers.
    pub fn stop(&self) {
        if self.shared.live.swap(false, Ordering::AcqRel) {
            info!(poller = %self.shared.name, "poller stopped");
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        // Wait out a handler that passed the liveness check before the swap.
        drop(self.shared.gate.lock());
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}
