//! Preemption monitor
//!
//! Listens to the ledger's accepted-solution stream and forwards every
//! foreign solve to the round orchestrator as a [`SolutionNotice`]. Whether a
//! notice ends the running round is decided by the orchestrator, which alone
//! knows the active challenge number.

use crate::events::MinerEvent;
use crate::ledger::{Ledger, SolutionStream};
use crate::{Result, SolverIdentity};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Notices buffered for the orchestrator
pub const NOTICE_BUFFER: usize = 64;

/// Another solver's accepted solution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolutionNotice {
    pub solver: SolverIdentity,
    pub challenge_number: u64,
}

/// Channel from the monitor to the orchestrator
pub fn channel() -> (mpsc::Sender<SolutionNotice>, mpsc::Receiver<SolutionNotice>) {
    mpsc::channel(NOTICE_BUFFER)
}

/// Forwards foreign solves from the ledger to the orchestrator
pub struct PreemptionMonitor {
    ledger: Arc<dyn Ledger>,
    identity: SolverIdentity,
    notices: mpsc::Sender<SolutionNotice>,
    events: Option<mpsc::Sender<MinerEvent>>,
}

impl PreemptionMonitor {
    /// Create a new monitor for `identity`
    pub fn new(
        ledger: Arc<dyn Ledger>,
        identity: SolverIdentity,
        notices: mpsc::Sender<SolutionNotice>,
        events: Option<mpsc::Sender<MinerEvent>>,
    ) -> Self {
        Self {
            ledger,
            identity,
            notices,
            events,
        }
    }

    /// Subscribe, then forward in a background task until `shutdown`.
    ///
    /// Returns once the subscription is live, so no solve that happens after
    /// this call is missed.
    pub async fn start(self, shutdown: CancellationToken) -> Result<JoinHandle<()>> {
        let stream = self.ledger.subscribe().await?;
        info!("Watching {} ledger for foreign solutions", self.ledger.name());
        Ok(tokio::spawn(self.forward(stream, shutdown)))
    }

    async fn forward(self, mut stream: SolutionStream, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = stream.next() => event,
            };

            let Some(event) = event else {
                warn!("Solution stream ended");
                break;
            };

            if let Some(events) = &self.events {
                let _ = events.try_send(MinerEvent::NetworkSolution {
                    solver: event.solver,
                    challenge_number: event.challenge_number,
                });
            }

            if event.solver == self.identity {
                debug!("Own solution for #{} confirmed", event.challenge_number);
                continue;
            }

            let notice = SolutionNotice {
                solver: event.solver,
                challenge_number: event.challenge_number,
            };
            if self.notices.send(notice).await.is_err() {
                debug!("Orchestrator gone, stopping monitor");
                break;
            }
        }
    }
}
