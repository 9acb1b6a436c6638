// ABOUTME: Command module aggregator for the herd CLI.
// ABOUTME: Shared setup for host runs: credentials, cancellation and the orchestrator.

mod check;
mod copy;
mod list;
mod run;
mod shell;

pub use check::check;
pub use copy::copy;
pub use list::list;
pub use run::run;
pub use shell::shell;

use herd::auth::{CredentialRegistry, KeyMaterializer, default_prompter};
use herd::config::{Config, ForwardRule};
use herd::diagnostics::{Diagnostics, Warning};
use herd::error::Result;
use herd::orchestrator::{
    ForwardSet, LocalIo, Operation, Orchestrator, RunOptions, SshConnector,
};
use herd::output::{MultiplexerConfig, Output, WriteMode};
use herd::terminal;
use herd::types::HostName;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

/// Forward rules given on the command line.
pub struct Forwards {
    pub local: Vec<ForwardRule>,
    pub remote: Vec<ForwardRule>,
}

impl Forwards {
    /// Command-line rules win; otherwise a lone host's configured rules apply.
    fn resolve(self, config: &Config, hosts: &[HostName]) -> ForwardSet {
        if !self.local.is_empty() || !self.remote.is_empty() {
            return ForwardSet {
                local: self.local,
                remote: self.remote,
            };
        }
        match hosts {
            [only] => config
                .hosts
                .get(only)
                .map(|profile| ForwardSet {
                    local: profile.local_forwards.clone(),
                    remote: profile.remote_forwards.clone(),
                })
                .unwrap_or_default(),
            _ => ForwardSet::default(),
        }
    }
}

/// Raise the returned signal on SIGINT or SIGTERM.
fn cancel_on_signal() -> watch::Receiver<bool> {
    use tokio::signal::unix::{SignalKind, signal};

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
        tracing::info!("interrupted, cancelling hosts");
        let _ = tx.send(true);
        // Keep the sender alive so receivers do not see the channel close.
        std::future::pending::<()>().await;
    });
    rx
}

/// Materialize credentials, run `operation` on every host and report the outcome.
async fn execute(
    config: Config,
    hosts: &[HostName],
    operation: Operation,
    options: RunOptions,
    output: &Output,
) -> Result<i32> {
    let registry = CredentialRegistry::new(Arc::new(KeyMaterializer::new(default_prompter())));
    let auth_sets = registry.build(hosts, &config).await?;

    let mut diagnostics = Diagnostics::new();
    let mut reported = HashSet::new();
    for set in auth_sets.values() {
        for (key, error) in set.failures() {
            if reported.insert(key.clone()) {
                diagnostics.warn(Warning::credential_unavailable(format!("{key}: {error}")));
            }
        }
    }
    for warning in diagnostics.warnings() {
        output.warning(warning);
    }

    let mux = MultiplexerConfig::new(config.output.prompt.clone(), WriteMode::Lines)
        .color(config.output.color && terminal::stdout_is_terminal());
    let connector = Arc::new(SshConnector::new(Arc::new(config), auth_sets));
    let orchestrator = Orchestrator::new(connector, mux, cancel_on_signal()).options(options);

    let mut local = LocalIo::stdio();
    if operation.is_interactive(hosts.len()) && local.stdin_is_tty {
        local.resize = terminal::watch_resize();
    }

    let result = orchestrator.run(hosts, operation, local).await?;
    output.summary(&result);
    Ok(result.exit_code())
}
