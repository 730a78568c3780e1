//! Hook host: a cdylib that installs the system-wide low-level keyboard
//! observer and publishes filtered keypad events through a named shared
//! segment.
//!
//! The library is loaded by `rundll32.exe` via the exported `start_entry`
//! so the observer runs in a separate, trusted process. The controlling
//! application (see the `launcher` crate) never gains suppression rights
//! of its own; it only attaches the segment and polls.

#[cfg(windows)]
mod host;
#[cfg(windows)]
mod ipc;
#[cfg(windows)]
mod tracing_layer;

#[cfg(windows)]
pub use ipc::HostSegment;
