//! Process-exit cleanup hooks
//!
//! Archives own temporary backing files that must be removed even when the
//! process exits without closing them. Rust does not drop statics at exit,
//! so archives register a cleanup hook with an [`ExitHooks`] capability.
//! [`process_hooks`] returns the process-wide registry, wired to `atexit`.
//!
//! [`HookRegistry::run`] detaches every hook from the registry before it
//! invokes any of them, so a running hook can call back into the registry
//! (for example to deregister) without deadlocking.
//!
//! Hooks run from `atexit`, after thread-local storage has been destroyed.
//! Nothing on that path may log through `tracing`.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

pub type ExitHook = Box<dyn FnOnce() + Send>;

/// Registration handle returned by [`ExitHooks::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookToken(u64);

/// Capability to run cleanup callbacks at process exit
pub trait ExitHooks: Send + Sync {
    fn register(&self, hook: ExitHook) -> HookToken;

    /// Remove a hook; returns false if it already ran or was removed
    fn deregister(&self, token: HookToken) -> bool;

    /// True while the registered hooks are being executed
    fn is_running(&self) -> bool;
}

#[derive(Default)]
struct HookState {
    next_id: u64,
    hooks: BTreeMap<HookToken, ExitHook>,
}

/// In-process hook list, run once in registration order
#[derive(Default)]
pub struct HookRegistry {
    state: Mutex<HookState>,
    running: AtomicBool,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run and drop every registered hook
    ///
    /// Hooks registered while this runs are kept for the next call. A
    /// panicking hook does not stop the others; the first panic is resumed
    /// once all of them have run.
    pub fn run(&self) {
        let hooks = std::mem::take(&mut self.state.lock().hooks);
        if hooks.is_empty() {
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        let _running = RunningGuard(&self.running);

        let mut first_panic = None;
        for (_, hook) in hooks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
                first_panic.get_or_insert(payload);
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Clears the running flag even when a hook panic unwinds through `run`
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ExitHooks for HookRegistry {
    fn register(&self, hook: ExitHook) -> HookToken {
        let mut state = self.state.lock();
        let token = HookToken(state.next_id);
        state.next_id += 1;
        state.hooks.insert(token, hook);
        token
    }

    fn deregister(&self, token: HookToken) -> bool {
        self.state.lock().hooks.remove(&token).is_some()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

static PROCESS_HOOKS: Lazy<Arc<HookRegistry>> = Lazy::new(|| Arc::new(HookRegistry::new()));
static INSTALL_ATEXIT: Once = Once::new();

extern "C" fn run_process_hooks() {
    // Unwinding out of an extern "C" fn aborts the process
    let _ = panic::catch_unwind(|| PROCESS_HOOKS.run());
}

/// The process-wide registry, run by `atexit` on normal termination
pub fn process_hooks() -> Arc<dyn ExitHooks> {
    INSTALL_ATEXIT.call_once(|| {
        // SAFETY: `run_process_hooks` is a plain extern "C" fn with no
        // arguments and stays valid for the life of the process.
        let rc = unsafe { libc::atexit(run_process_hooks) };
        if rc != 0 {
            tracing::warn!("atexit registration failed ({}); exit cleanup disabled", rc);
        }
    });
    PROCESS_HOOKS.clone()
}
