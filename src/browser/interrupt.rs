//! Process-wide interrupt handling for live browser sessions.
//!
//! Tokio keeps OS signal handlers installed for the life of the process once
//! anything listens, so a single listener owns Ctrl-C and SIGTERM. Sessions
//! register a cleanup with it; on a signal every registered cleanup runs to
//! completion before the process exits, and with nothing registered the
//! process exits straight away.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use once_cell::sync::Lazy;
use tokio::task::JoinHandle;

/// Exit status used when an interrupt tears the sessions down (128 + SIGINT).
pub const INTERRUPT_EXIT_CODE: i32 = 130;

type Cleanup = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

static SESSIONS: Lazy<Arc<SessionRegistry>> = Lazy::new(|| Arc::new(SessionRegistry::default()));

static LISTENER: Lazy<Mutex<Option<JoinHandle<()>>>> = Lazy::new(|| Mutex::new(None));

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    sessions: Vec<(u64, String, Cleanup)>,
}

/// Cleanups of the sessions currently alive.
#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn register<F, Fut>(self: &Arc<Self>, label: impl Into<String>, cleanup: F) -> InterruptGuard
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = state.next_id;
        let cleanup: Cleanup = Box::new(move || cleanup().boxed());
        state.sessions.push((id, label.into(), cleanup));

        InterruptGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    pub fn active(&self) -> usize {
        lock(&self.state).sessions.len()
    }

    fn contains(&self, id: u64) -> bool {
        lock(&self.state).sessions.iter().any(|(session, _, _)| *session == id)
    }

    fn deregister(&self, id: u64) {
        lock(&self.state).sessions.retain(|(session, _, _)| *session != id);
    }

    /// Drain every registered cleanup and wait for all of them. Returns how
    /// many ran.
    pub async fn run_cleanups(&self) -> usize {
        let pending = std::mem::take(&mut lock(&self.state).sessions);
        let count = pending.len();

        let cleanups = pending.into_iter().map(|(_, label, cleanup)| {
            log::warn!("interrupt received, tearing down {}", label);
            cleanup()
        });
        join_all(cleanups).await;
        count
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("active", &self.active())
            .finish()
    }
}

/// Keeps a session's cleanup registered with the interrupt listener.
///
/// Dropping the guard deregisters it.
#[derive(Debug)]
pub struct InterruptGuard {
    registry: Arc<SessionRegistry>,
    id: u64,
}

impl InterruptGuard {
    /// Register `cleanup` with the process-wide listener, starting the
    /// listener on first use.
    pub fn install<F, Fut>(label: impl Into<String>, cleanup: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        ensure_listener();
        SESSIONS.register(label, cleanup)
    }

    pub fn is_armed(&self) -> bool {
        self.registry.contains(self.id)
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

/// The listener dies with the runtime that spawned it, so it is restarted
/// when a later runtime registers a session.
fn ensure_listener() {
    let mut listener = lock(&*LISTENER);
    if listener.as_ref().is_none_or(JoinHandle::is_finished) {
        let registry = Arc::clone(&*SESSIONS);
        *listener = Some(tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            let cleaned = registry.run_cleanups().await;
            log::info!("cleaned up {} browser session(s) after interrupt", cleaned);
            std::process::exit(INTERRUPT_EXIT_CODE);
        }));
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::warn!("unable to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                log::warn!("unable to listen for SIGTERM: {}", err);
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
