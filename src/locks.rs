//! Single-writer-per-key discipline for shared stores.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async mutex per key. Holding the guard serializes every
/// writer touching that key; different keys proceed concurrently.
#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop slots nobody holds or waits on.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }
}
