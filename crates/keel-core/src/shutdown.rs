//! Graceful shutdown coordination
//!
//! The dispatch loop and every worker pool take a token from the
//! controller. Work already handed to a reconciler registers a
//! [`TaskGuard`], and `shutdown` waits (bounded) for those guards to drop.
//!
//! ```ignore
//! let shutdown = ShutdownController::new();
//! let token = shutdown.token();
//! tokio::spawn(async move { dispatcher.run(token).await });
//! shutdown.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default drain timeout in seconds
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Shutdown phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// No new events are pulled
    Stopping,
    /// Waiting for in-flight reconciliations
    Draining,
    /// Drain timeout hit, remaining work abandoned
    Terminating,
    /// Done
    Terminated,
}

impl ShutdownPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Stopping,
            2 => Self::Draining,
            3 => Self::Terminating,
            _ => Self::Terminated,
        }
    }
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Draining => write!(f, "Draining"),
            Self::Terminating => write!(f, "Terminating"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Coordinates cooperative shutdown of the dispatch loop and worker pools
pub struct ShutdownController {
    cancel_token: CancellationToken,
    phase_tx: broadcast::Sender<ShutdownPhase>,
    phase: AtomicU8,
    initiated: AtomicBool,
    active_tasks: AtomicU32,
    drain_timeout: Duration,
}

impl ShutdownController {
    /// Create a controller with the default drain timeout
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS))
    }

    /// Create a controller with a custom drain timeout
    #[must_use]
    pub fn with_timeout(drain_timeout: Duration) -> Arc<Self> {
        let (phase_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            cancel_token: CancellationToken::new(),
            phase_tx,
            phase: AtomicU8::new(ShutdownPhase::Running as u8),
            initiated: AtomicBool::new(false),
            active_tasks: AtomicU32::new(0),
            drain_timeout,
        })
    }

    /// Token that fires when shutdown starts
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Subscribe to phase changes
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.phase_tx.subscribe()
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Whether shutdown has been initiated
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Track a unit of in-flight work until the guard drops
    pub fn register_task(self: &Arc<Self>) -> TaskGuard {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            controller: Arc::clone(self),
        }
    }

    /// Number of in-flight tasks
    #[must_use]
    pub fn active_task_count(&self) -> u32 {
        self.active_tasks.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
        let _ = self.phase_tx.send(phase);
        info!(phase = %phase, "Shutdown phase changed");
    }

    /// Stop pulling new work, then wait for in-flight tasks up to the
    /// drain timeout. Calling it twice is a no-op.
    pub async fn shutdown(&self) {
        if self
            .initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already initiated");
            return;
        }

        self.set_phase(ShutdownPhase::Stopping);
        self.cancel_token.cancel();
        self.set_phase(ShutdownPhase::Draining);

        let drain_start = tokio::time::Instant::now();
        let check_interval = Duration::from_millis(100);

        loop {
            let active = self.active_task_count();
            if active == 0 {
                info!("All in-flight work completed");
                break;
            }

            if drain_start.elapsed() >= self.drain_timeout {
                warn!(
                    active_tasks = active,
                    timeout_secs = self.drain_timeout.as_secs(),
                    "Drain timeout exceeded, abandoning in-flight work"
                );
                self.set_phase(ShutdownPhase::Terminating);
                break;
            }

            debug!(active_tasks = active, "Waiting for in-flight work...");
            tokio::time::sleep(check_interval).await;
        }

        self.set_phase(ShutdownPhase::Terminated);
    }
}

/// Decrements the in-flight count when dropped
pub struct TaskGuard {
    controller: Arc<ShutdownController>,
}

impl TaskGuard {
    /// Whether shutdown was requested while this task ran
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.controller.cancel_token.is_cancelled()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.controller.active_tasks.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wait for Ctrl+C or SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
