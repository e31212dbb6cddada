//! Reconciliation loop driver
//!
//! Two states, no terminal: a pass runs, the loop idles for the configured
//! interval, the next pass starts from scratch. The transition out of
//! `Reconciling` is unconditional; however many per-relationship operations
//! failed inside the pass, the loop keeps its cadence and the failures are
//! re-derived from live state next time around.

use std::time::Duration;
use tracing::{debug, info};

use crate::reconciler::{PassSummary, Reconciler};

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Running one full pass
    Reconciling,
    /// Waiting out the idle interval before the next pass
    Idle,
}

/// Drives [`Reconciler`] passes forever.
pub struct LoopDriver {
    reconciler: Reconciler,
    idle_wait: Duration,
    state: LoopState,
    passes: u64,
}

impl LoopDriver {
    pub fn new(reconciler: Reconciler, idle_wait: Duration) -> Self {
        Self {
            reconciler,
            idle_wait,
            state: LoopState::Reconciling,
            passes: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Completed passes so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Run exactly one state transition: a full pass, or one idle wait.
    ///
    /// Returns the pass summary when the transition was a pass.
    pub async fn step(&mut self) -> Option<PassSummary> {
        match self.state {
            LoopState::Reconciling => {
                self.passes += 1;
                let summary = self.reconciler.run_pass().await;
                info!(pass = self.passes, summary = %summary, "pass complete");
                self.state = LoopState::Idle;
                Some(summary)
            }
            LoopState::Idle => {
                debug!(wait_secs = self.idle_wait.as_secs(), "idling");
                tokio::time::sleep(self.idle_wait).await;
                self.state = LoopState::Reconciling;
                None
            }
        }
    }

    /// Run until the process is terminated externally.
    pub async fn run(&mut self) {
        loop {
            self.step().await;
        }
    }
}
