use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use haas_core::HardwareKindId;

/// One async lock per hardware kind.
///
/// Everything that reads a kind's capacity and writes it back holds that
/// kind's guard for the whole read-decide-commit sequence. Operations on
/// different kinds never wait on each other.
#[derive(Debug, Default)]
pub struct KindLocks {
    locks: Mutex<HashMap<HardwareKindId, Arc<AsyncMutex<()>>>>,
}

impl KindLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, kind_id: &HardwareKindId) -> OwnedMutexGuard<()> {
        let lock = {
            // The map only ever grows; a poisoned guard still holds a usable map.
            let mut locks = match self.locks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(locks.entry(kind_id.clone()).or_default())
        };
        lock.lock_owned().await
    }
}
