// ABOUTME: Shell command implementation.
// ABOUTME: Opens an interactive login shell on exactly one host.

use super::{Forwards, execute};
use herd::config::Config;
use herd::error::Result;
use herd::orchestrator::{Operation, RunOptions};
use herd::output::Output;

pub async fn shell(config: Config, host: &str, forwards: Forwards, output: &Output) -> Result<i32> {
    let selected = config.select(&[host.to_string()])?;
    let options = RunOptions {
        forwards: forwards.resolve(&config, &selected),
        ..RunOptions::default()
    };
    execute(config, &selected, Operation::Shell, options, output).await
}
