// ABOUTME: Library root for herd - exposes the engine for the binary and for testing.
// ABOUTME: The main binary is in main.rs.

pub mod auth;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod input;
pub mod orchestrator;
pub mod output;
pub mod route;
pub mod ssh;
pub mod terminal;
pub mod transfer;
pub mod types;
