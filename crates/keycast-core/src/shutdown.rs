//! Cooperative shutdown
//!
//! The flag only ever goes from `false` to `true`. Capture backends whose wait
//! primitive cannot time out register an [`Interrupter`] that tears the wait
//! down from the triggering thread; every interrupter runs exactly once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Action that forces a blocked capture wait to return.
pub struct Interrupter {
    name: &'static str,
    action: Box<dyn FnOnce() + Send>,
}

impl Interrupter {
    pub fn new(name: &'static str, action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            name,
            action: Box::new(action),
        }
    }

    fn run(self) {
        tracing::debug!("Running shutdown interrupter: {}", self.name);
        (self.action)();
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter").field("name", &self.name).finish()
    }
}

#[derive(Default)]
struct Inner {
    triggered: AtomicBool,
    interrupters: Mutex<Vec<Interrupter>>,
}

/// Shared, cloneable shutdown signal.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Flip the flag and run the registered interrupters.
    ///
    /// Returns `true` for the call that actually triggered; later calls do
    /// nothing and return `false`.
    pub fn trigger(&self) -> bool {
        let pending = {
            let mut interrupters = self
                .inner
                .interrupters
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.inner.triggered.swap(true, Ordering::SeqCst) {
                return false;
            }
            std::mem::take(&mut *interrupters)
        };

        tracing::info!("Shutdown requested");
        for interrupter in pending {
            interrupter.run();
        }
        true
    }

    /// Register an interrupter. Runs it immediately if shutdown already
    /// happened.
    pub fn register(&self, interrupter: Interrupter) {
        {
            let mut interrupters = self
                .inner
                .interrupters
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !self.is_triggered() {
                interrupters.push(interrupter);
                return;
            }
        }
        interrupter.run();
    }
}

impl fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shutdown")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}
