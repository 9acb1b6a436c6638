// ABOUTME: Run command implementation.
// ABOUTME: Executes one command on every selected host, sequentially or in parallel.

use super::{Forwards, execute};
use herd::config::Config;
use herd::error::Result;
use herd::orchestrator::{Operation, RunOptions};
use herd::output::Output;

pub async fn run(
    config: Config,
    hosts: &[String],
    parallel: bool,
    forwards: Forwards,
    command: &[String],
    output: &Output,
) -> Result<i32> {
    let selected = config.select(hosts)?;
    let options = RunOptions {
        parallel,
        forwards: forwards.resolve(&config, &selected),
        ..RunOptions::default()
    };

    output.progress(&format!(
        "running on {} host(s){}",
        selected.len(),
        if parallel && selected.len() > 1 { " in parallel" } else { "" }
    ));
    execute(config, &selected, Operation::exec(command), options, output).await
}
