//! Signal-driven shutdown control.
//!
//! `Running -> GracefulStop -> ForcedExit`, never back. The first interrupt
//! stops new dispatch while active courses finish; the second abandons
//! everything and exits the process after a short grace delay so buffered
//! output can flush.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::error;

use crate::events::{EventBus, ForgeEvent};

/// Process exit code used for a forced exit (128 + SIGINT).
pub const FORCED_EXIT_CODE: i32 = 130;

/// Default delay between a forced-exit request and process termination.
pub const DEFAULT_FORCE_EXIT_GRACE: Duration = Duration::from_millis(500);

/// Shutdown state as seen after a signal is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    GracefulStop,
    ForcedExit,
}

/// Shared shutdown flags.
///
/// Written only by the signal handler, read by every worker before each
/// queue pull. Share it as `Arc<ShutdownController>`.
#[derive(Debug, Default)]
pub struct ShutdownController {
    shutting_down: AtomicBool,
    force_exit: AtomicBool,
}

impl ShutdownController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// True once the first interrupt has been recorded.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// True once the second interrupt has been recorded.
    pub fn force_exit(&self) -> bool {
        self.force_exit.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> ShutdownPhase {
        if self.force_exit() {
            ShutdownPhase::ForcedExit
        } else if self.is_shutting_down() {
            ShutdownPhase::GracefulStop
        } else {
            ShutdownPhase::Running
        }
    }

    /// Records one interrupt and returns the phase it moved to.
    ///
    /// The first call moves to `GracefulStop`; every later call moves to (or
    /// stays in) `ForcedExit`.
    pub fn signal(&self) -> ShutdownPhase {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            self.force_exit.store(true, Ordering::SeqCst);
            ShutdownPhase::ForcedExit
        } else {
            ShutdownPhase::GracefulStop
        }
    }

    /// Requests a graceful stop without going through a signal.
    pub fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }
}

/// Spawns the Ctrl-C listener.
///
/// Each interrupt is fed to [`ShutdownController::signal`] and announced on
/// the bus. On `ForcedExit` the process exits with [`FORCED_EXIT_CODE`] after
/// `grace`.
pub fn install_signal_handler(
    controller: Arc<ShutdownController>,
    bus: Arc<EventBus>,
    grace: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }

            match controller.signal() {
                ShutdownPhase::GracefulStop => bus.publish(ForgeEvent::ShutdownRequested),
                ShutdownPhase::ForcedExit => {
                    bus.publish(ForgeEvent::ForceExit);
                    tokio::time::sleep(grace).await;
                    std::process::exit(FORCED_EXIT_CODE);
                }
                ShutdownPhase::Running => {}
            }
        }
    })
}
