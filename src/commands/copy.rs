// ABOUTME: Copy command implementation.
// ABOUTME: Uploads to or downloads from every selected host; "remote:" marks the remote side.

use super::execute;
use herd::config::Config;
use herd::error::{Error, Result};
use herd::orchestrator::{Operation, RunOptions};
use herd::output::Output;
use herd::transfer::{Direction, TransferPlan};

const REMOTE_PREFIX: &str = "remote:";

pub async fn copy(
    config: Config,
    hosts: &[String],
    preserve: bool,
    paths: &[String],
    output: &Output,
) -> Result<i32> {
    let selected = config.select(hosts)?;
    let plan = plan(paths, preserve)?;

    output.progress(&format!(
        "copying {} path(s) {} {} host(s)",
        plan.sources.len(),
        match plan.direction {
            Direction::Upload => "to",
            Direction::Download => "from",
        },
        selected.len()
    ));
    execute(config, &selected, Operation::Transfer(plan), RunOptions::default(), output).await
}

/// Split `paths` into sources and destination and work out the direction.
fn plan(paths: &[String], preserve: bool) -> Result<TransferPlan> {
    let Some((destination, sources)) = paths.split_last() else {
        return Err(Error::InvalidConfig("copy needs a source and a destination".to_string()));
    };
    if sources.is_empty() {
        return Err(Error::InvalidConfig("copy needs a source and a destination".to_string()));
    }

    let remote_sources = sources.iter().filter(|s| s.starts_with(REMOTE_PREFIX)).count();

    let (direction, sources, destination) = match destination.strip_prefix(REMOTE_PREFIX) {
        Some(remote) if remote_sources == 0 => (Direction::Upload, sources.to_vec(), remote.to_string()),
        None if remote_sources == sources.len() => (
            Direction::Download,
            sources
                .iter()
                .map(|s| s.trim_start_matches(REMOTE_PREFIX).to_string())
                .collect(),
            destination.clone(),
        ),
        _ => {
            return Err(Error::InvalidConfig(format!(
                "exactly one side of a copy must be {REMOTE_PREFIX}<path>"
            )));
        }
    };

    Ok(TransferPlan {
        direction,
        sources,
        destination,
        preserve,
    })
}
