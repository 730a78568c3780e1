//! The [`NumpadHook`] controller handle.

use std::process::Child;

use shared::HookStatus;
use tracing::{info, warn};
use tracing_tunnel::TracingEventReceiver;

use crate::ipc::Segment;
use crate::process;
use crate::{HookError, HookState};

/// Handle to the hook host process and its shared segment.
///
/// Expected usage: call [`start`](Self::start), then drain
/// [`poll_event`](Self::poll_event) and
/// [`poll_lock_change`](Self::poll_lock_change) from a ~16ms timer,
/// pumping [`pump_logs`](Self::pump_logs) alongside. Dropping the handle
/// stops the host.
pub struct NumpadHook {
    state: HookState,
    child: Option<Child>,
    segment: Option<Segment>,
    logs: TracingEventReceiver,
}

impl NumpadHook {
    pub fn new() -> Self {
        Self {
            state: HookState::NotStarted,
            child: None,
            segment: None,
            logs: TracingEventReceiver::default(),
        }
    }

    pub fn state(&self) -> HookState {
        self.state
    }

    /// Launch the host process and attach the shared segment.
    ///
    /// Success means the segment exists; it does not guarantee the
    /// observer installed. Sample [`status`](Self::status) for that and
    /// surface a warning when `installed` stays false.
    pub fn start(&mut self) -> Result<(), HookError> {
        if self.state == HookState::Running {
            return Ok(());
        }
        self.state = HookState::Starting;

        let child = match process::spawn_host() {
            Ok(child) => child,
            Err(err) => {
                self.state = HookState::Stopped;
                return Err(err);
            }
        };
        info!(pid = child.id(), "hook host launched");

        match Segment::attach() {
            Ok(segment) => {
                self.child = Some(child);
                self.segment = Some(segment);
                self.state = HookState::Running;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "segment attach failed, reaping host");
                let mut child = child;
                let _ = child.kill();
                let _ = child.wait();
                self.state = HookState::Stopped;
                Err(HookError::Attach(err))
            }
        }
    }

    /// Request shutdown, wait a bounded time for the host to exit, and
    /// kill it if it lingers. Safe to call repeatedly; also runs on drop
    /// so a clean controller exit never leaves an orphaned host (a
    /// controller crash is covered by the host's parent-liveness watch).
    pub fn stop(&mut self) {
        if self.segment.is_none() && self.child.is_none() {
            self.state = HookState::Stopped;
            return;
        }
        self.state = HookState::Stopping;

        if let Some(segment) = &self.segment {
            segment.control().request_stop();
        }
        // Unmap before reaping so the host's teardown is the last user.
        self.segment = None;

        if let Some(child) = self.child.take() {
            process::reap(child);
        }
        self.state = HookState::Stopped;
        info!("hook host stopped");
    }

    fn control(&self) -> Result<&shared::ControlBlock, HookError> {
        self.segment
            .as_ref()
            .map(Segment::control)
            .ok_or(HookError::NotRunning)
    }

    /// Drain one scan code from the event ring, oldest first.
    pub fn poll_event(&self) -> Option<u32> {
        self.segment.as_ref().and_then(|s| s.control().dequeue())
    }

    /// Drain the lock mailbox: the post-toggle Num Lock state if it
    /// changed since the last call. Toggles between polls coalesce to
    /// the final state.
    pub fn poll_lock_change(&self) -> Option<bool> {
        self.segment
            .as_ref()
            .and_then(|s| s.control().take_lock_transition())
    }

    /// Idempotent snapshot of the current Num Lock state; independent of
    /// the mailbox. False while the host is down.
    pub fn numlock_on(&self) -> bool {
        self.segment
            .as_ref()
            .is_some_and(|s| s.control().numlock_on())
    }

    /// Toggle report-but-don't-suppress mode, effective on the next
    /// delivered key event.
    pub fn set_passthrough(&self, value: bool) -> Result<(), HookError> {
        self.control()?.set_passthrough(value);
        Ok(())
    }

    /// Diagnostic counters and the observer-installed flag.
    pub fn status(&self) -> Result<HookStatus, HookError> {
        Ok(self.control()?.status())
    }

    /// Replay any log events the host shipped over into this process's
    /// tracing subscriber.
    pub fn pump_logs(&mut self) {
        let Some(segment) = &self.segment else { return };
        while let Some(event) = segment.read_log_event() {
            if let Err(err) = self.logs.try_receive(event) {
                warn!(%err, "received invalid tracing event from hook host");
            }
        }
    }
}

impl Default for NumpadHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NumpadHook {
    fn drop(&mut self) {
        self.stop();
    }
}
