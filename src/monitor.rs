//! Progress and cancellation probe threaded through the engines.

use crate::error::ComputeError;

/// Observer a long-running engine consults between algorithm steps.
///
/// Engines call [`ComputeMonitor::is_cancelled`] at coarse checkpoints (one
/// power-iteration round, one correlation row) and report a completion
/// fraction in `[0, 1]` at a few milestones. Both calls must be cheap.
pub trait ComputeMonitor: Sync {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn report_progress(&self, _fraction: f64) {}
}

/// Monitor used by the synchronous entry points: never cancels, drops progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unmonitored;

impl ComputeMonitor for Unmonitored {}

/// Returns `Err(Interrupted)` once the monitor has been cancelled.
#[inline]
pub(crate) fn checkpoint(monitor: &dyn ComputeMonitor) -> Result<(), ComputeError> {
    if monitor.is_cancelled() {
        Err(ComputeError::Interrupted)
    } else {
        Ok(())
    }
}
