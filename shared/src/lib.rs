//! Shared protocol definitions for the numpad hook host and its controller.
//!
//! Everything here is platform-neutral: the segment layout, the event ring
//! and lock-key mailbox disciplines, the suppression policy, and the log
//! frame codec. The `hook` and `launcher` crates add only the Win32
//! plumbing around these types, so the whole protocol is testable on any
//! host.

mod layout;
mod log_ring;
mod policy;

pub use layout::{ControlBlock, HookStatus};
pub use log_ring::{read_frame, write_frame, LogRingHeader};
pub use policy::{
    classify, is_keypad_nav, keypad_position, Decision, KeyEvent, KEYPAD_BACK_SCAN,
};

/// Shared memory region identifier.
/// Using Local\ namespace to avoid requiring administrator privileges.
pub const SHM_NAME: &str = "Local\\numpad-hook-ipc";

/// Size of the shared memory region (64KB).
pub const SHM_SIZE: usize = 64 * 1024;

/// Number of slots in the event ring. One slot is sacrificed to tell a
/// full ring from an empty one, so at most `EVENT_CAPACITY - 1` events
/// can be buffered.
pub const EVENT_CAPACITY: usize = 256;

/// Offset of the log ring header within the segment. The control block
/// lives at offset 0 and must fit below this.
pub const LOG_RING_OFFSET: usize = 2048;

/// Size of the log ring header with alignment padding.
/// `LogRingHeader` is 12 bytes but kept at 16 for future fields.
pub const LOG_HEADER_SIZE: usize = 16;

/// Byte capacity of the log ring data region (rest of the segment).
pub const LOG_RING_SIZE: usize = SHM_SIZE - LOG_RING_OFFSET - LOG_HEADER_SIZE;

/// Maximum serialized size of a single forwarded tracing event.
pub const MAX_LOG_FRAME: usize = 8 * 1024;

/// Cadence at which the host's watchdog timer samples the `running` flag
/// (milliseconds).
pub const RUNNING_POLL_MS: u32 = 200;

/// Cadence at which the host waits on the controller's process handle
/// (milliseconds).
pub const PARENT_POLL_MS: u32 = 100;

/// Segment-attach retry schedule on the controller side: up to
/// `ATTACH_ATTEMPTS` tries, `ATTACH_RETRY_MS` apart (1s total).
pub const ATTACH_ATTEMPTS: u32 = 100;
pub const ATTACH_RETRY_MS: u64 = 10;

/// How long the controller waits for the host process to exit after a
/// shutdown request before killing it (milliseconds).
pub const STOP_TIMEOUT_MS: u64 = 2000;

/// Host process exit codes. A missing entry point is reported by
/// rundll32 itself, before any of this code runs.
pub const EXIT_CLEAN: u32 = 0;
pub const EXIT_SEGMENT_FAILED: u32 = 1;
pub const EXIT_INSTALL_FAILED: u32 = 2;
