//! Run-wide cleanup coordination
//!
//! Cleanup hooks (stop dev servers, release ports, ...) are registered here
//! and executed by a single pass, whether the run ends normally, a signal
//! arrives, or the run body panics. Concurrent and repeated calls to
//! [`ShutdownCoordinator::shutdown`] wait for that one pass and never rerun it.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

pub struct ShutdownCoordinator {
    next_id: AtomicU64,
    hooks: Mutex<Vec<(HookId, String, Hook)>>,
    done: OnceCell<()>,
    cancel: CancellationToken,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            hooks: Mutex::new(Vec::new()),
            done: OnceCell::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelled at the start of the shutdown pass
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register a cleanup hook. Hooks run in reverse registration order.
    pub fn register<F, Fut>(&self, name: impl Into<String>, hook: F) -> HookId
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        debug!(hook = %name, "Registered cleanup hook");
        self.hooks
            .lock()
            .push((id, name, Box::new(move || hook().boxed())));
        id
    }

    /// Remove a hook that has not run yet
    pub fn unregister(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.lock();
        let before = hooks.len();
        hooks.retain(|(hook_id, _, _)| *hook_id != id);
        hooks.len() != before
    }

    pub fn pending(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn has_run(&self) -> bool {
        self.done.initialized()
    }

    /// Run the cleanup pass. Returns true for the call that performed it.
    pub async fn shutdown(&self) -> bool {
        let performed = AtomicBool::new(false);
        let flag = &performed;
        self.done
            .get_or_init(|| async move {
                flag.store(true, Ordering::SeqCst);
                self.run_hooks().await;
            })
            .await;
        performed.load(Ordering::SeqCst)
    }

    async fn run_hooks(&self) {
        self.cancel.cancel();

        let hooks: Vec<(HookId, String, Hook)> = std::mem::take(&mut *self.hooks.lock());
        info!(event = "shutdown.begin", hooks = hooks.len(), "shutdown.begin");

        for (_, name, hook) in hooks.into_iter().rev() {
            debug!(hook = %name, "Running cleanup hook");
            if AssertUnwindSafe(hook()).catch_unwind().await.is_err() {
                error!(hook = %name, "Cleanup hook panicked");
            }
        }

        info!(event = "shutdown.complete", "shutdown.complete");
    }

    /// Listen for SIGINT, SIGTERM, and SIGHUP (ctrl-c on other platforms).
    ///
    /// The first signal runs the shutdown pass and exits the process with
    /// `128 + signal`. Dropping the guard stops listening.
    pub fn listen_for_signals(self: &Arc<Self>) -> SignalGuard {
        let coordinator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let signo = wait_for_signal().await;
            warn!(signal = signo, "Received signal, cleaning up");
            coordinator.shutdown().await;
            std::process::exit(128 + signo);
        });
        SignalGuard { handle }
    }
}

/// Keeps the signal listener alive
pub struct SignalGuard {
    handle: JoinHandle<()>,
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> i32 {
    use nix::sys::signal::Signal;
    use tokio::signal::unix::{signal, SignalKind};

    async fn recv(kind: SignalKind) {
        match signal(kind) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for signal: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }

    tokio::select! {
        _ = ctrl_c() => Signal::SIGINT as i32,
        _ = recv(SignalKind::terminate()) => Signal::SIGTERM as i32,
        _ = recv(SignalKind::hangup()) => Signal::SIGHUP as i32,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> i32 {
    ctrl_c().await;
    2
}
