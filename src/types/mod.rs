// ABOUTME: Validated domain types shared across the crate.
// ABOUTME: Host names are the catalog keys used by routes, credentials and output labels.

mod host_name;

pub use host_name::{HostName, HostNameError};
