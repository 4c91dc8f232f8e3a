//! Single-value cache with a time-to-live

use std::future::Future;

use tokio::{sync::Mutex, time::Duration, time::Instant};

/// Caches one value for `ttl`
///
/// The lock is held while fetching, so concurrent misses share one fetch.
#[derive(Debug)]
pub struct TimedCache<T> {
    ttl: Duration,
    slot: Mutex<Option<(T, Instant)>>,
}

impl<T: Clone> TimedCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached value, or fetch and cache a new one when stale
    ///
    /// A failed fetch leaves the cache empty.
    pub async fn get_or_fetch<F, Fut, E>(&self, fetch: F) -> Result<CacheLookup<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some((value, fetched_at)) = slot.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(CacheLookup::Hit(value.clone()));
            }
        }

        *slot = None;
        let value = fetch().await?;
        *slot = Some((value.clone(), Instant::now()));
        Ok(CacheLookup::Miss(value))
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

/// Value returned by [`TimedCache::get_or_fetch`], tagged with its origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<T> {
    Hit(T),
    Miss(T),
}

impl<T> CacheLookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Hit(value) | Self::Miss(value) => value,
        }
    }
}
