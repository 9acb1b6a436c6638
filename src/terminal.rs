// ABOUTME: Local terminal handling: tty detection, raw mode and window size changes.
// ABOUTME: Raw mode is restored when the guard drops, including on early returns.

use crossterm::terminal;
use std::io::{self, IsTerminal};
use tokio::sync::mpsc;

pub const DEFAULT_SIZE: (u16, u16) = (80, 24);

pub fn stdin_is_terminal() -> bool {
    io::stdin().is_terminal()
}

pub fn stdout_is_terminal() -> bool {
    io::stdout().is_terminal()
}

/// Current (columns, rows), if stdout is a terminal.
pub fn size() -> Option<(u16, u16)> {
    if !stdout_is_terminal() {
        return None;
    }
    terminal::size().ok()
}

/// Puts the local terminal in raw mode until dropped.
pub struct RawModeGuard(());

impl RawModeGuard {
    pub fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self(()))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::warn!(error = %e, "failed to restore terminal mode");
        }
    }
}

/// Stream of new (columns, rows) values on SIGWINCH.
pub fn watch_resize() -> Option<mpsc::Receiver<(u16, u16)>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut winch = match signal(SignalKind::window_change()) {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(error = %e, "window size changes will not be forwarded");
            return None;
        }
    };
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        while winch.recv().await.is_some() {
            if let Some(size) = size()
                && tx.send(size).await.is_err()
            {
                break;
            }
        }
    });
    Some(rx)
}
