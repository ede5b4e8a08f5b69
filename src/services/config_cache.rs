use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::models::{BlockedDate, BookingTimeRule};
use crate::store::{Store, StoreResult};

/// Rules and blocked dates as the validator sees them.
#[derive(Debug, Default)]
pub struct ConfigSnapshot {
    pub rules: Vec<BookingTimeRule>,
    pub blocks: Vec<BlockedDate>,
}

/// Loaded lazily, held until an admin write calls [`ConfigCache::invalidate`].
/// A load that races an invalidation is served once but never stored.
pub struct ConfigCache {
    store: Arc<dyn Store>,
    snapshot: RwLock<Option<Arc<ConfigSnapshot>>>,
    generation: AtomicU64,
}

impl ConfigCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn snapshot(&self) -> StoreResult<Arc<ConfigSnapshot>> {
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let snapshot = Arc::new(ConfigSnapshot {
            rules: self.store.list_rules().await?,
            blocks: self.store.list_blocked_dates().await?,
        });
        tracing::debug!(
            rules = snapshot.rules.len(),
            blocks = snapshot.blocks.len(),
            "loaded booking configuration"
        );

        let mut slot = self.snapshot.write().unwrap_or_else(|p| p.into_inner());
        if self.generation.load(Ordering::SeqCst) == generation {
            *slot = Some(snapshot.clone());
        }
        Ok(snapshot)
    }

    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut slot = self.snapshot.write().unwrap_or_else(|p| p.into_inner());
        *slot = None;
    }

    fn current(&self) -> Option<Arc<ConfigSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}
