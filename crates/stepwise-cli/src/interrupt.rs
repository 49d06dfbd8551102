//! Ctrl-C handling: cancel the running query, or exit when idle

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Exit status used when Ctrl-C ends the process
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Routes Ctrl-C to whichever query is running.
///
/// The listener is installed once for the whole process, since registering
/// a tokio signal handler replaces the default SIGINT behaviour for good.
#[derive(Clone, Default)]
pub struct Interrupts {
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl Interrupts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the process-wide Ctrl-C listener
    pub fn install(&self) {
        let interrupts = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !interrupts.interrupt() {
                    eprintln!();
                    std::process::exit(INTERRUPTED_EXIT_CODE);
                }
            }
        });
    }

    /// Token for a new query; Ctrl-C cancels it until [`Interrupts::end`]
    pub fn begin(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        *self.active.lock() = Some(cancel.clone());
        cancel
    }

    /// The query is over; Ctrl-C exits again
    pub fn end(&self) {
        *self.active.lock() = None;
    }

    /// Cancel the running query.
    ///
    /// Returns `false` when nothing is running. A second interrupt during
    /// the same query also returns `false`.
    pub fn interrupt(&self) -> bool {
        match self.active.lock().take() {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }
}
