// ABOUTME: Drives one host through connect, optional forwarding, the operation and teardown.
// ABOUTME: Errors stay inside the host's outcome; writers are always closed before returning.

use super::error::{
    ConnectSnafu, ExecSnafu, ForwardSnafu, HostError, ShellSnafu, TransferSetupSnafu,
};
use super::operation::{ForwardSet, Operation};
use super::result::{HostOutcome, HostState, StateTracker};
use super::session::{Connector, RemoteSession, SessionIo};
use crate::diagnostics::Warning;
use crate::transfer::{Direction, ProgressObserver, Transfer, TransferReport};
use crate::types::HostName;
use chrono::Utc;
use snafu::ResultExt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared, read-only inputs for every host worker in a run.
#[derive(Clone)]
pub(super) struct WorkerContext {
    pub connector: Arc<dyn Connector>,
    pub operation: Arc<Operation>,
    pub forwards: Option<ForwardSet>,
    pub observer: Arc<dyn ProgressObserver>,
    /// Downloads land in `<destination>/<host>/` when several hosts are selected.
    pub per_host_downloads: bool,
    pub cancel: watch::Receiver<bool>,
}

#[derive(Default)]
struct Completion {
    exit_code: Option<u32>,
    transfer: Option<TransferReport>,
}

/// Resolves once the run is cancelled. Never resolves if the sender is gone.
pub(super) async fn cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn or_cancelled<T>(
    host: &HostName,
    cancel: &watch::Receiver<bool>,
    work: impl Future<Output = Result<T, HostError>>,
) -> Result<T, HostError> {
    tokio::select! {
        biased;
        () = cancelled(cancel.clone()) => Err(HostError::Cancelled { host: host.clone() }),
        result = work => result,
    }
}

pub(super) async fn run_host(host: HostName, ctx: WorkerContext, mut io: SessionIo) -> HostOutcome {
    let mut tracker = StateTracker::new(&host);
    let mut warnings = Vec::new();
    let mut report = None;

    let result = drive(&host, &ctx, &mut io, &mut tracker, &mut warnings, &mut report).await;

    let (state, completion, error) = match result {
        Ok(completion) => (HostState::Completed, completion, None),
        Err(e) => {
            tracing::warn!(host = %host, stage = ?e.stage(), error = %e, "host failed");
            (HostState::Failed, Completion::default(), Some(e))
        }
    };
    tracker.enter(state);

    let SessionIo { stdout, stderr, .. } = io;
    stdout.close().await;
    stderr.close().await;
    tracker.enter(HostState::Closed);

    HostOutcome {
        host,
        state,
        exit_code: completion.exit_code,
        error,
        transitions: tracker.into_transitions(),
        transfer: completion.transfer.or(report),
        warnings,
        finished_at: Utc::now(),
    }
}

async fn drive(
    host: &HostName,
    ctx: &WorkerContext,
    io: &mut SessionIo,
    tracker: &mut StateTracker,
    warnings: &mut Vec<Warning>,
    report: &mut Option<TransferReport>,
) -> Result<Completion, HostError> {
    tracker.enter(HostState::Connecting);
    let connect = async {
        ctx.connector
            .connect(host)
            .await
            .context(ConnectSnafu { host: host.clone() })
    };
    let mut session = or_cancelled(host, &ctx.cancel, connect).await?;
    tracker.enter(HostState::Authenticated);

    let result = operate(host, ctx, session.as_mut(), io, tracker, report).await;

    if let Err(e) = session.close().await {
        let warning = Warning::ssh_disconnect(format!("{host}: {e}"));
        tracing::warn!(host = %host, error = %e, "disconnect failed");
        warnings.push(warning);
    }

    result
}

async fn operate(
    host: &HostName,
    ctx: &WorkerContext,
    session: &mut dyn RemoteSession,
    io: &mut SessionIo,
    tracker: &mut StateTracker,
    report: &mut Option<TransferReport>,
) -> Result<Completion, HostError> {
    if let Some(forwards) = &ctx.forwards
        && !forwards.is_empty()
    {
        session
            .forward(&forwards.local, &forwards.remote, ctx.cancel.clone())
            .await
            .context(ForwardSnafu { host: host.clone() })?;
    }

    tracker.enter(HostState::Executing);

    match ctx.operation.as_ref() {
        Operation::Exec { command } => {
            let code = session
                .exec(command, io)
                .await
                .context(ExecSnafu { host: host.clone() })?;
            tracing::debug!(host = %host, exit_code = code, "command finished");
            Ok(Completion {
                exit_code: Some(code),
                transfer: None,
            })
        }
        Operation::Shell => {
            let code = session
                .shell(io)
                .await
                .context(ShellSnafu { host: host.clone() })?;
            Ok(Completion {
                exit_code: Some(code),
                transfer: None,
            })
        }
        Operation::Transfer(plan) => {
            let fs = session
                .filesystem()
                .await
                .context(TransferSetupSnafu { host: host.clone() })?;
            let transfer = Transfer {
                fs: fs.as_ref(),
                host,
                observer: Arc::clone(&ctx.observer),
            };

            let work = async {
                let done = match plan.direction {
                    Direction::Upload => transfer.put(plan).await,
                    Direction::Download => {
                        let mut destination = PathBuf::from(&plan.destination);
                        if ctx.per_host_downloads {
                            destination.push(host.as_str());
                        }
                        transfer.get(plan, &destination).await
                    }
                };
                Ok(done)
            };
            let done = or_cancelled(host, &ctx.cancel, work).await?;

            if done.is_success() {
                Ok(Completion {
                    exit_code: None,
                    transfer: Some(done),
                })
            } else {
                let failed = done.failed();
                let total = done.total();
                *report = Some(done);
                Err(HostError::Transfer {
                    host: host.clone(),
                    failed,
                    total,
                })
            }
        }
    }
}
