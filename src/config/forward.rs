// ABOUTME: Port forwarding rules in "[bind_address:]port:host:hostport" form.
// ABOUTME: Shared by local (-L) and remote (-R) forwarding.

use std::fmt;

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRule {
    pub bind_address: String,
    pub bind_port: u16,
    pub target_host: String,
    pub target_port: u16,
}

impl ForwardRule {
    pub fn parse(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.trim().split(':').collect();

        let (bind_address, rest) = match parts.len() {
            3 => (DEFAULT_BIND_ADDRESS, &parts[..]),
            4 => (parts[0], &parts[1..]),
            _ => {
                return Err(format!(
                    "invalid forward rule {s:?}: expected [bind_address:]port:host:hostport"
                ));
            }
        };

        let bind_port = parse_port(rest[0], s)?;
        let target_host = rest[1];
        let target_port = parse_port(rest[2], s)?;

        if bind_address.is_empty() || target_host.is_empty() {
            return Err(format!("invalid forward rule {s:?}: empty host"));
        }

        Ok(ForwardRule {
            bind_address: bind_address.to_string(),
            bind_port,
            target_host: target_host.to_string(),
            target_port,
        })
    }
}

fn parse_port(value: &str, rule: &str) -> Result<u16, String> {
    value
        .parse::<u16>()
        .map_err(|_| format!("invalid port {value:?} in forward rule {rule:?}"))
}

impl fmt::Display for ForwardRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.bind_address, self.bind_port, self.target_host, self.target_port
        )
    }
}
