//! Apply-now, confirm-later writes with exact rollback.
//!
//! Mutations on the same key are single-flight: a second mutation waits for
//! the first to settle before taking its own snapshot.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::error::{AppError, AppResult, ErrorKind};

/// Where the optimistic value lives.
pub trait OptimisticSlot<T>: Send + Sync {
    fn read(&self) -> Option<T>;

    fn write(&self, value: T);
}

pub struct OptimisticController<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K> Default for OptimisticController<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> OptimisticController<K>
where
    K: Eq + Hash + Clone + Display + Send + Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a mutation for `key` is running or queued.
    pub fn is_pending(&self, key: &K) -> bool {
        self.locks.lock().contains_key(key)
    }

    /// Snapshots the slot, applies `patch` locally, then awaits `write` with
    /// the patched value. On success the slot holds the server's value; on
    /// failure it holds the snapshot again and the error is returned.
    ///
    /// Dropping the returned future before the write settles also restores
    /// the snapshot and releases `key`.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn apply<T, S, P, W, Fut>(
        &self,
        key: K,
        slot: &S,
        patch: P,
        write: W,
    ) -> AppResult<T>
    where
        T: Clone + Send,
        S: OptimisticSlot<T> + ?Sized,
        P: FnOnce(&mut T),
        W: FnOnce(T) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let pending = PendingKey::register(self, key);
        let _turn = pending.lock.lock().await;
        let result = Self::run(slot, patch, write).await;

        match &result {
            Ok(_) => info!("optimistic write confirmed"),
            Err(e) => warn!(error = %e, "optimistic write failed; rolled back"),
        }
        result
    }

    async fn run<T, S, P, W, Fut>(slot: &S, patch: P, write: W) -> AppResult<T>
    where
        T: Clone + Send,
        S: OptimisticSlot<T> + ?Sized,
        P: FnOnce(&mut T),
        W: FnOnce(T) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let snapshot = slot
            .read()
            .ok_or_else(|| AppError::new(ErrorKind::NotFound, "").with_internal("nothing to mutate"))?;

        let mut optimistic = snapshot.clone();
        patch(&mut optimistic);
        let rollback = Rollback::arm(slot, snapshot);
        slot.write(optimistic.clone());

        match write(optimistic).await {
            Ok(confirmed) => {
                rollback.disarm();
                slot.write(confirmed.clone());
                Ok(confirmed)
            }
            Err(e) => {
                rollback.restore();
                Err(e)
            }
        }
    }
}

/// Marks a key pending for as long as it lives, queued or running.
struct PendingKey<'a, K>
where
    K: Eq + Hash,
{
    controller: &'a OptimisticController<K>,
    key: K,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a, K> PendingKey<'a, K>
where
    K: Eq + Hash + Clone,
{
    fn register(controller: &'a OptimisticController<K>, key: K) -> Self {
        let lock = Arc::clone(controller.locks.lock().entry(key.clone()).or_default());
        Self {
            controller,
            key,
            lock,
        }
    }
}

impl<K> Drop for PendingKey<'_, K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let mut locks = self.controller.locks.lock();
        // The map entry plus this handle: nobody else is queued.
        if locks
            .get(&self.key)
            .is_some_and(|l| Arc::strong_count(l) == 2)
        {
            locks.remove(&self.key);
        }
    }
}

/// Puts the snapshot back unless the write was confirmed.
struct Rollback<'s, T, S>
where
    S: OptimisticSlot<T> + ?Sized,
{
    slot: &'s S,
    snapshot: Option<T>,
}

impl<'s, T, S> Rollback<'s, T, S>
where
    S: OptimisticSlot<T> + ?Sized,
{
    fn arm(slot: &'s S, snapshot: T) -> Self {
        Self {
            slot,
            snapshot: Some(snapshot),
        }
    }

    fn disarm(mut self) {
        self.snapshot = None;
    }

    fn restore(mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.slot.write(snapshot);
        }
    }
}

impl<T, S> Drop for Rollback<'_, T, S>
where
    S: OptimisticSlot<T> + ?Sized,
{
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            warn!("optimistic write abandoned; rolled back");
            self.slot.write(snapshot);
        }
    }
}
