// ABOUTME: List command implementation.
// ABOUTME: Prints every configured host with its login target and note.

use herd::config::Config;
use herd::output::Output;

pub fn list(config: &Config, output: &Output) {
    let width = config
        .hosts
        .keys()
        .map(|name| name.as_str().len())
        .max()
        .unwrap_or(0);

    for (name, profile) in &config.hosts {
        let target = format!("{}@{}:{}", profile.login_user(), profile.addr, profile.port);
        match &profile.note {
            Some(note) => output.line(&format!("{name:<width$}  {target}  {note}")),
            None => output.line(&format!("{name:<width$}  {target}")),
        }
    }
}
