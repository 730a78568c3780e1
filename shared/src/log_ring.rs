//! Byte-granular SPSC framing for log events forwarded out of the host.
//!
//! Frames are a little-endian `u32` length prefix followed by the
//! payload, written contiguously modulo the ring capacity with split
//! copies at the wrap point. The producer publishes `write_pos` only
//! after both copies land, so the consumer never observes a partial
//! frame.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::MAX_LOG_FRAME;

/// Ring header placed ahead of the log data region in the segment.
/// `capacity` is written once by the creator before the other side can
/// meaningfully poll; both readers treat a zero capacity as "not ready".
#[repr(C)]
pub struct LogRingHeader {
    pub write_pos: AtomicU32,
    pub read_pos: AtomicU32,
    pub capacity: u32,
}

impl LogRingHeader {
    pub const fn new(capacity: u32) -> Self {
        Self {
            write_pos: AtomicU32::new(0),
            read_pos: AtomicU32::new(0),
            capacity,
        }
    }
}

/// Copy `bytes` into the ring at `offset`, splitting at the wrap point.
unsafe fn copy_in(data: *mut u8, offset: usize, bytes: &[u8], capacity: usize) {
    let until_end = capacity - offset;
    if bytes.len() > until_end {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), data.add(offset), until_end);
        std::ptr::copy_nonoverlapping(
            bytes.as_ptr().add(until_end),
            data,
            bytes.len() - until_end,
        );
    } else {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), data.add(offset), bytes.len());
    }
}

/// Copy out of the ring at `offset` into `buffer`, splitting at the wrap
/// point.
unsafe fn copy_out(data: *const u8, offset: usize, buffer: &mut [u8], capacity: usize) {
    let until_end = capacity - offset;
    if buffer.len() > until_end {
        std::ptr::copy_nonoverlapping(data.add(offset), buffer.as_mut_ptr(), until_end);
        std::ptr::copy_nonoverlapping(
            data,
            buffer.as_mut_ptr().add(until_end),
            buffer.len() - until_end,
        );
    } else {
        std::ptr::copy_nonoverlapping(data.add(offset), buffer.as_mut_ptr(), buffer.len());
    }
}

/// Append one frame. Returns false (frame dropped) when the payload is
/// oversized or the ring lacks room; one byte of slack is kept so a
/// completely full ring is never mistaken for an empty one.
///
/// # Safety
/// `data` must point to `header.capacity` bytes that only this producer
/// writes, for the duration of the call.
pub unsafe fn write_frame(header: &LogRingHeader, data: *mut u8, payload: &[u8]) -> bool {
    let capacity = header.capacity as usize;
    if capacity == 0 || payload.len() > MAX_LOG_FRAME {
        return false;
    }

    let write_pos = header.write_pos.load(Ordering::Relaxed);
    let read_pos = header.read_pos.load(Ordering::Acquire);
    let total = 4 + payload.len();

    let available = if write_pos >= read_pos {
        capacity - (write_pos - read_pos) as usize
    } else {
        (read_pos - write_pos) as usize
    };
    if available <= total {
        return false;
    }

    let offset = write_pos as usize % capacity;
    copy_in(data, offset, &(payload.len() as u32).to_le_bytes(), capacity);
    copy_in(data, (offset + 4) % capacity, payload, capacity);

    header.write_pos.store(
        (write_pos as usize + total) as u32 % capacity as u32,
        Ordering::Release,
    );
    true
}

/// Remove and return one frame, or `None` when the ring is empty. A
/// corrupt length prefix is skipped so one bad frame cannot wedge the
/// consumer.
///
/// # Safety
/// `data` must point to `header.capacity` bytes valid for reads for the
/// duration of the call, with this side as the only consumer.
pub unsafe fn read_frame(header: &LogRingHeader, data: *const u8) -> Option<Vec<u8>> {
    let capacity = header.capacity as usize;
    if capacity == 0 {
        return None;
    }

    let read_pos = header.read_pos.load(Ordering::Relaxed);
    if read_pos == header.write_pos.load(Ordering::Acquire) {
        return None;
    }

    let offset = read_pos as usize % capacity;
    let mut len_bytes = [0u8; 4];
    copy_out(data, offset, &mut len_bytes, capacity);
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len == 0 || len > MAX_LOG_FRAME {
        header.read_pos.store(
            (read_pos as usize + 4) as u32 % capacity as u32,
            Ordering::Release,
        );
        return None;
    }

    let mut payload = vec![0u8; len];
    copy_out(data, (offset + 4) % capacity, &mut payload, capacity);

    header.read_pos.store(
        (read_pos as usize + 4 + len) as u32 % capacity as u32,
        Ordering::Release,
    );
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(capacity: usize) -> (LogRingHeader, Vec<u8>) {
        (LogRingHeader::new(capacity as u32), vec![0u8; capacity])
    }

    #[test]
    fn frames_round_trip_in_order() {
        let (header, mut data) = ring(256);
        for msg in [b"alpha".as_slice(), b"b".as_slice(), b"gamma-3".as_slice()] {
            assert!(unsafe { write_frame(&header, data.as_mut_ptr(), msg) });
        }
        for msg in [b"alpha".as_slice(), b"b".as_slice(), b"gamma-3".as_slice()] {
            assert_eq!(unsafe { read_frame(&header, data.as_ptr()) }.as_deref(), Some(msg));
        }
        assert_eq!(unsafe { read_frame(&header, data.as_ptr()) }, None);
    }

    #[test]
    fn frames_survive_wrap_around() {
        let (header, mut data) = ring(64);
        let payload = [0xabu8; 20];
        // 24 bytes per frame against a 64-byte ring forces repeated wraps.
        for _ in 0..20 {
            assert!(unsafe { write_frame(&header, data.as_mut_ptr(), &payload) });
            assert_eq!(
                unsafe { read_frame(&header, data.as_ptr()) }.as_deref(),
                Some(payload.as_slice())
            );
        }
    }

    #[test]
    fn full_ring_drops_frame() {
        let (header, mut data) = ring(64);
        let payload = [7u8; 24];
        assert!(unsafe { write_frame(&header, data.as_mut_ptr(), &payload) });
        assert!(unsafe { write_frame(&header, data.as_mut_ptr(), &payload) });
        // 2 * 28 bytes used; a third frame would cross the slack byte.
        assert!(!unsafe { write_frame(&header, data.as_mut_ptr(), &payload) });
        // Draining restores room.
        assert!(unsafe { read_frame(&header, data.as_ptr()) }.is_some());
        assert!(unsafe { write_frame(&header, data.as_mut_ptr(), &payload) });
    }

    #[test]
    fn oversized_frame_rejected() {
        let (header, mut data) = ring(256);
        let huge = vec![0u8; MAX_LOG_FRAME + 1];
        assert!(!unsafe { write_frame(&header, data.as_mut_ptr(), &huge) });
        assert_eq!(unsafe { read_frame(&header, data.as_ptr()) }, None);
    }

    #[test]
    fn corrupt_length_is_skipped() {
        let (header, data) = ring(64);
        // Pretend a frame exists, but the ring bytes are all zero: the
        // length prefix decodes to 0, which is invalid.
        header.write_pos.store(8, Ordering::SeqCst);
        assert_eq!(unsafe { read_frame(&header, data.as_ptr()) }, None);
        // The consumer skipped the bogus prefix instead of wedging.
        assert_eq!(header.read_pos.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn zero_capacity_is_not_ready() {
        let header = LogRingHeader::new(0);
        let mut data = [0u8; 1];
        assert!(!unsafe { write_frame(&header, data.as_mut_ptr(), b"x") });
        assert_eq!(unsafe { read_frame(&header, data.as_ptr()) }, None);
    }
}
