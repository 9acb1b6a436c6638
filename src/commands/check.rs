// ABOUTME: Check command implementation.
// ABOUTME: Validates the configuration and prints each host's resolved route.

use herd::config::Config;
use herd::error::Result;
use herd::output::Output;
use herd::route::resolve_route;

/// Validate the named hosts (all of them when none are named) and show their routes.
pub fn check(config: &Config, hosts: &[String], output: &Output) -> Result<i32> {
    let selected = if hosts.is_empty() {
        config.validate()?;
        config.hosts.keys().cloned().collect()
    } else {
        config.select(hosts)?
    };

    for host in &selected {
        let route = resolve_route(host.as_str(), config)?;
        output.line(&format!("{host}: {route}"));
    }
    output.progress(&format!("configuration ok ({} hosts)", selected.len()));
    Ok(0)
}
