// ABOUTME: Fan-in of per-host workers into one outcome per selected host.
// ABOUTME: Panicking or vanished workers become Failed outcomes instead of taking the run down.

use super::error::HostError;
use super::result::HostOutcome;
use crate::types::HostName;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinSet;

/// Run a worker, turning a panic into a Failed outcome for its host.
pub(super) async fn guarded<F>(host: HostName, worker: F) -> HostOutcome
where
    F: Future<Output = HostOutcome>,
{
    match AssertUnwindSafe(worker).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::error!(host = %host, "worker panicked");
            let error = HostError::Panicked { host: host.clone() };
            HostOutcome::failed(host, error)
        }
    }
}

/// Collects exactly one outcome per host, in selection order.
pub(super) struct FanIn {
    hosts: Vec<HostName>,
    outcomes: Vec<Option<HostOutcome>>,
    tasks: JoinSet<(usize, HostOutcome)>,
}

impl FanIn {
    pub(super) fn new(hosts: &[HostName]) -> Self {
        Self {
            hosts: hosts.to_vec(),
            outcomes: hosts.iter().map(|_| None).collect(),
            tasks: JoinSet::new(),
        }
    }

    pub(super) fn spawn<F>(&mut self, index: usize, worker: F)
    where
        F: Future<Output = HostOutcome> + Send + 'static,
    {
        let host = self.hosts[index].clone();
        self.tasks
            .spawn(async move { (index, guarded(host, worker).await) });
    }

    /// Store an outcome produced inline, for sequential runs.
    pub(super) fn record(&mut self, index: usize, outcome: HostOutcome) {
        self.outcomes[index] = Some(outcome);
    }

    pub(super) async fn wait(mut self) -> Vec<HostOutcome> {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => self.outcomes[index] = Some(outcome),
                Err(e) => tracing::error!(error = %e, "worker task failed to join"),
            }
        }

        self.outcomes
            .into_iter()
            .zip(self.hosts)
            .map(|(outcome, host)| {
                outcome.unwrap_or_else(|| {
                    let error = HostError::Lost { host: host.clone() };
                    HostOutcome::failed(host, error)
                })
            })
            .collect()
    }
}
