//! Interruption registry for running imports
//!
//! An interruption is the "please stop at the next row boundary" signal: a
//! run that sees it pauses to `queued`/`queued_undo` with its position saved,
//! it never ends in an error state. Runs register for their whole duration
//! and are removed again by `RunGuard` on drop.

use std::collections::HashMap;
use std::sync::Arc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Global interruption registry singleton
pub static INTERRUPTS: Lazy<InterruptRegistry> = Lazy::new(InterruptRegistry::default);

/// RAII guard held while an import runs. Dropping it deregisters the run.
pub struct RunGuard {
    import_id: Uuid,
    token: CancellationToken,
    registry: InterruptRegistry,
}

impl RunGuard {
    /// Checked once per row by the import and undo loops
    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.import_id);
    }
}

/// Thread-safe registry of active runs and their interruption tokens
#[derive(Clone, Default)]
pub struct InterruptRegistry {
    runs: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl InterruptRegistry {
    /// Register a run. Keep the returned guard alive while processing.
    pub fn register(&self, import_id: Uuid) -> RunGuard {
        let token = CancellationToken::new();
        self.runs.lock().insert(import_id, token.clone());
        RunGuard {
            import_id,
            token,
            registry: self.clone(),
        }
    }

    /// Interrupt one run. Returns `false` when it is not running here.
    pub fn interrupt(&self, import_id: &Uuid) -> bool {
        match self.runs.lock().get(import_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Interrupt every active run (process shutdown). Returns how many.
    pub fn interrupt_all(&self) -> usize {
        let runs = self.runs.lock();
        for token in runs.values() {
            token.cancel();
        }
        runs.len()
    }

    /// Called automatically by `RunGuard::drop`
    pub fn remove(&self, import_id: &Uuid) {
        self.runs.lock().remove(import_id);
    }

    #[cfg(test)]
    fn contains(&self, import_id: &Uuid) -> bool {
        self.runs.lock().contains_key(import_id)
    }
}
