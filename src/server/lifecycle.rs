//! Setup and teardown hooks run around the server's lifetime.
//!
//! Setup hooks run in registration order during `bind()`; the first one that
//! returns `false` (or panics) aborts the bind. Destruct hooks run during
//! `serve()` once every worker has stopped; a failing one is logged and the
//! rest still run.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::{Result, RpcError};
use crate::worker::panic_message;

/// A setup or destruct hook. Returns `false` on failure.
pub type LifecycleHook = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct LifecycleHooks {
    setup: Vec<LifecycleHook>,
    destruct: Vec<LifecycleHook>,
}

impl LifecycleHooks {
    pub(crate) fn add_setup(&mut self, hook: LifecycleHook) {
        self.setup.push(hook);
    }

    pub(crate) fn add_destruct(&mut self, hook: LifecycleHook) {
        self.destruct.push(hook);
    }

    /// Run every setup hook, stopping at the first failure.
    pub(crate) fn run_setup(&self) -> Result<()> {
        for (index, hook) in self.setup.iter().enumerate() {
            if !run_hook("setup", index, hook) {
                return Err(RpcError::Config(format!("Setup hook {} failed", index)));
            }
        }
        debug!(hooks = self.setup.len(), "Setup hooks finished");
        Ok(())
    }

    /// Run every destruct hook. Returns how many failed.
    pub(crate) fn run_destruct(&self) -> usize {
        let failed = self
            .destruct
            .iter()
            .enumerate()
            .filter(|(index, hook)| !run_hook("destruct", *index, hook))
            .count();
        debug!(hooks = self.destruct.len(), failed, "Destruct hooks finished");
        failed
    }
}

fn run_hook(kind: &'static str, index: usize, hook: &LifecycleHook) -> bool {
    match catch_unwind(AssertUnwindSafe(|| (**hook)())) {
        Ok(true) => true,
        Ok(false) => {
            warn!(kind, index, "Lifecycle hook failed");
            false
        }
        Err(panic) => {
            error!(kind, index, panic = panic_message(panic.as_ref()), "Lifecycle hook panicked");
            false
        }
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("setup", &self.setup.len())
            .field("destruct", &self.destruct.len())
            .finish()
    }
}
