//! Fixed cross-process control block: event ring, lock mailbox, flags.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::EVENT_CAPACITY;

/// Control block at offset 0 of the shared segment.
///
/// Field order and sizes are fixed for the lifetime of the protocol; both
/// processes map the same `#[repr(C)]` record and there is no version
/// negotiation, so any layout change requires updating host and controller
/// together. Every field has exactly one writer: the hook host owns
/// `write_index`, the slots, the lock fields, the counters and the
/// installed flag; the controller owns `read_index`, `passthrough` and the
/// clearing of `running` and `lock_changed`.
#[repr(C)]
pub struct ControlBlock {
    /// Event ring producer cursor, advanced only by the hook host.
    write_index: AtomicU32,
    /// Event ring consumer cursor, advanced only by the controller.
    read_index: AtomicU32,
    /// Scan-code slots.
    events: [AtomicU32; EVENT_CAPACITY],
    /// Lock mailbox flag, set by the host on each Num Lock toggle and
    /// cleared by the controller when it drains the mailbox. A single
    /// slot, not a queue: rapid toggles coalesce to the latest state.
    lock_changed: AtomicU32,
    /// Latest post-toggle Num Lock state (1 = on).
    lock_new_state: AtomicU32,
    /// When nonzero the host classifies but never suppresses.
    passthrough: AtomicU32,
    /// Current best-known Num Lock state (1 = off), maintained outside
    /// the mailbox so state queries stay idempotent.
    lock_is_off: AtomicU32,
    /// Set at creation; the controller clears it to request shutdown.
    /// Monotonic: never set back to 1 for a given segment instance.
    running: AtomicU32,
    /// Every observed key-down/key-up.
    keys_seen: AtomicU32,
    /// Every suppressed event, including ring-full drops.
    suppressed: AtomicU32,
    /// Cluster-member key-downs.
    cluster_seen: AtomicU32,
    /// 1 once the low-level keyboard hook is registered with the OS.
    hook_installed: AtomicU32,
}

/// Diagnostic snapshot of the host-maintained status fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookStatus {
    pub installed: bool,
    pub keys_seen: u32,
    pub suppressed: u32,
    pub cluster_seen: u32,
}

impl ControlBlock {
    /// A zeroed, not-running block. Real instances live in mapped shared
    /// memory and are set up with [`ControlBlock::init`]; this exists for
    /// in-process use and tests.
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: AtomicU32 = AtomicU32::new(0);
        Self {
            write_index: ZERO,
            read_index: ZERO,
            events: [ZERO; EVENT_CAPACITY],
            lock_changed: ZERO,
            lock_new_state: ZERO,
            passthrough: ZERO,
            lock_is_off: ZERO,
            running: ZERO,
            keys_seen: ZERO,
            suppressed: ZERO,
            cluster_seen: ZERO,
            hook_installed: ZERO,
        }
    }

    /// Reset every field and mark the segment live. Called once by the
    /// host right after mapping, before the controller can observe it.
    pub fn init(&self, numlock_on: bool) {
        self.write_index.store(0, Ordering::SeqCst);
        self.read_index.store(0, Ordering::SeqCst);
        for slot in &self.events {
            slot.store(0, Ordering::Relaxed);
        }
        self.lock_changed.store(0, Ordering::SeqCst);
        self.lock_new_state.store(0, Ordering::SeqCst);
        self.passthrough.store(0, Ordering::SeqCst);
        self.keys_seen.store(0, Ordering::Relaxed);
        self.suppressed.store(0, Ordering::Relaxed);
        self.cluster_seen.store(0, Ordering::Relaxed);
        self.hook_installed.store(0, Ordering::SeqCst);
        self.lock_is_off
            .store(u32::from(!numlock_on), Ordering::SeqCst);
        self.running.store(1, Ordering::SeqCst);
    }

    // -- event ring (single producer / single consumer) -----------------

    /// Producer side. Never blocks; returns false and drops the event if
    /// advancing the write cursor would collide with the read cursor.
    ///
    /// The slot is written before the cursor is published with a release
    /// store, so a consumer that observes the new cursor also observes
    /// the slot contents.
    pub fn enqueue(&self, scan_code: u32) -> bool {
        let write = self.write_index.load(Ordering::Relaxed);
        let next = (write + 1) % EVENT_CAPACITY as u32;
        if next == self.read_index.load(Ordering::Acquire) {
            return false; // ring full, never overwrite unread data
        }
        self.events[write as usize].store(scan_code, Ordering::Relaxed);
        self.write_index.store(next, Ordering::Release);
        true
    }

    /// Consumer side. Never blocks; `None` when the ring is empty.
    pub fn dequeue(&self) -> Option<u32> {
        let read = self.read_index.load(Ordering::Relaxed);
        if read == self.write_index.load(Ordering::Acquire) {
            return None;
        }
        let scan_code = self.events[read as usize].load(Ordering::Relaxed);
        self.read_index
            .store((read + 1) % EVENT_CAPACITY as u32, Ordering::Release);
        Some(scan_code)
    }

    // -- lock-key mailbox ------------------------------------------------

    /// Publish a Num Lock transition: update the idempotent snapshot,
    /// then overwrite the mailbox with the post-toggle state.
    pub fn publish_lock_transition(&self, now_on: bool) {
        self.lock_is_off.store(u32::from(!now_on), Ordering::Release);
        self.lock_new_state.store(u32::from(now_on), Ordering::Release);
        self.lock_changed.store(1, Ordering::Release);
    }

    /// Drain the mailbox: the latest post-toggle state, or `None` if no
    /// toggle happened since the previous call.
    pub fn take_lock_transition(&self) -> Option<bool> {
        if self.lock_changed.swap(0, Ordering::AcqRel) != 0 {
            Some(self.lock_new_state.load(Ordering::Acquire) != 0)
        } else {
            None
        }
    }

    pub fn lock_is_off(&self) -> bool {
        self.lock_is_off.load(Ordering::Acquire) != 0
    }

    pub fn numlock_on(&self) -> bool {
        !self.lock_is_off()
    }

    // -- flags -----------------------------------------------------------

    pub fn set_passthrough(&self, value: bool) {
        self.passthrough.store(u32::from(value), Ordering::Release);
    }

    pub fn passthrough(&self) -> bool {
        self.passthrough.load(Ordering::Acquire) != 0
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) != 0
    }

    /// One-way shutdown request.
    pub fn request_stop(&self) {
        self.running.store(0, Ordering::Release);
    }

    pub fn set_hook_installed(&self, installed: bool) {
        self.hook_installed
            .store(u32::from(installed), Ordering::Release);
    }

    pub fn hook_installed(&self) -> bool {
        self.hook_installed.load(Ordering::Acquire) != 0
    }

    // -- diagnostics -----------------------------------------------------

    pub fn record_key(&self) {
        self.keys_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cluster(&self) {
        self.cluster_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status(&self) -> HookStatus {
        HookStatus {
            installed: self.hook_installed(),
            keys_seen: self.keys_seen.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            cluster_seen: self.cluster_seen.load(Ordering::Relaxed),
        }
    }
}

impl Default for ControlBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LOG_RING_OFFSET;
    use std::mem::{align_of, offset_of, size_of};

    #[test]
    fn layout_is_fixed() {
        assert_eq!(size_of::<ControlBlock>(), 1072);
        assert_eq!(align_of::<ControlBlock>(), 4);
        assert!(size_of::<ControlBlock>() <= LOG_RING_OFFSET);
        assert_eq!(offset_of!(ControlBlock, write_index), 0);
        assert_eq!(offset_of!(ControlBlock, read_index), 4);
        assert_eq!(offset_of!(ControlBlock, events), 8);
        assert_eq!(offset_of!(ControlBlock, lock_changed), 8 + 4 * EVENT_CAPACITY);
        assert_eq!(offset_of!(ControlBlock, hook_installed), size_of::<ControlBlock>() - 4);
    }

    #[test]
    fn ring_is_fifo_without_duplication() {
        let block = ControlBlock::new();
        block.init(false);
        for scan in [71, 72, 73, 75, 82] {
            assert!(block.enqueue(scan));
        }
        let drained: Vec<u32> = std::iter::from_fn(|| block.dequeue()).collect();
        assert_eq!(drained, vec![71, 72, 73, 75, 82]);
        assert_eq!(block.dequeue(), None);
    }

    #[test]
    fn ring_drops_newest_on_overflow() {
        let block = ControlBlock::new();
        block.init(false);

        let mut accepted = 0u32;
        for scan in 0..EVENT_CAPACITY as u32 + 1 {
            if block.enqueue(scan) {
                accepted += 1;
            }
        }
        // One slot is reserved to distinguish full from empty.
        assert_eq!(accepted, EVENT_CAPACITY as u32 - 1);

        // The accepted prefix survives intact and in order.
        for expected in 0..accepted {
            assert_eq!(block.dequeue(), Some(expected));
        }
        assert_eq!(block.dequeue(), None);

        // Draining makes room again.
        assert!(block.enqueue(99));
        assert_eq!(block.dequeue(), Some(99));
    }

    #[test]
    fn ring_interleaved_wraparound() {
        let block = ControlBlock::new();
        block.init(false);
        // Push the cursors around the ring several times.
        for round in 0..3 * EVENT_CAPACITY as u32 {
            assert!(block.enqueue(round));
            assert_eq!(block.dequeue(), Some(round));
        }
        assert_eq!(block.dequeue(), None);
    }

    #[test]
    fn lock_mailbox_coalesces_rapid_toggles() {
        let block = ControlBlock::new();
        block.init(true);
        assert!(block.numlock_on());

        block.publish_lock_transition(false);
        block.publish_lock_transition(true);
        // Two toggles between polls: only the final state is visible.
        assert_eq!(block.take_lock_transition(), Some(true));
        assert_eq!(block.take_lock_transition(), None);
        assert!(block.numlock_on());
    }

    #[test]
    fn lock_snapshot_is_idempotent() {
        let block = ControlBlock::new();
        block.init(true);
        block.publish_lock_transition(false);
        // Querying the snapshot does not drain the mailbox.
        assert!(block.lock_is_off());
        assert!(block.lock_is_off());
        assert_eq!(block.take_lock_transition(), Some(false));
        assert!(block.lock_is_off());
    }

    #[test]
    fn stop_request_is_observed() {
        let block = ControlBlock::new();
        block.init(false);
        assert!(block.is_running());
        block.request_stop();
        assert!(!block.is_running());
    }

    #[test]
    fn status_snapshot_reflects_counters() {
        let block = ControlBlock::new();
        block.init(false);
        block.set_hook_installed(true);
        block.record_key();
        block.record_key();
        block.record_cluster();
        block.record_suppressed();
        assert_eq!(
            block.status(),
            HookStatus {
                installed: true,
                keys_seen: 2,
                suppressed: 1,
                cluster_seen: 1,
            }
        );
    }

    #[test]
    fn init_resets_previous_traffic() {
        let block = ControlBlock::new();
        block.init(false);
        block.enqueue(71);
        block.record_key();
        block.publish_lock_transition(true);
        block.init(false);
        assert_eq!(block.dequeue(), None);
        assert_eq!(block.take_lock_transition(), None);
        assert_eq!(block.status().keys_seen, 0);
        assert!(block.lock_is_off());
    }
}
