//! Controller-side library: supervises the hook host process and exposes
//! the poll-based consumption API.
//!
//! The interception itself happens in a separate `rundll32.exe`-hosted
//! process (the `hook` crate); this crate launches it, attaches the
//! shared segment, and drains scan-code events, lock-state changes and
//! forwarded host logs. Nothing here blocks: every poll is a handful of
//! atomic reads, meant to be driven from a short fixed-interval timer.

#[cfg(windows)]
mod controller;
#[cfg(windows)]
mod ipc;
#[cfg(windows)]
mod process;

use std::io;

use thiserror::Error;

#[cfg(windows)]
pub use controller::NumpadHook;
pub use shared::{keypad_position, HookStatus, KEYPAD_BACK_SCAN};

/// Errors surfaced by the controller API. Observer-installation failure
/// is deliberately not one of them: the host keeps running idle and the
/// condition is visible through [`HookStatus::installed`] instead.
#[derive(Debug, Error)]
pub enum HookError {
    /// The rundll32 host process could not be launched.
    #[error("failed to launch hook host: {0}")]
    Spawn(#[from] io::Error),
    /// The shared segment never appeared or could not be mapped.
    #[error("shared segment attach failed: {0}")]
    Attach(String),
    /// An operation that needs a running host was called without one.
    #[error("hook host is not running")]
    NotRunning,
}

/// Lifecycle of the supervised host process as seen from this side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}
