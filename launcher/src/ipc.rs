//! Controller side of the shared segment: attach with retry, typed views
//! of the control block, and the log-frame consumer.

use std::thread;
use std::time::Duration;

use shared::{
    ControlBlock, LogRingHeader, ATTACH_ATTEMPTS, ATTACH_RETRY_MS, LOG_HEADER_SIZE,
    LOG_RING_OFFSET, SHM_NAME, SHM_SIZE,
};
use tracing::{debug, warn};
use tracing_tunnel::TracingEvent;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Memory::{
    MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
    MEMORY_MAPPED_VIEW_ADDRESS,
};

/// Attached view of the host-created segment.
pub struct Segment {
    ptr: *mut u8,
    handle: HANDLE,
}

// SAFETY: the mapping stays valid for the lifetime of this type, all
// shared contents are accessed through atomics, and Windows section
// handles may be used from any thread.
unsafe impl Send for Segment {}

impl Segment {
    /// Open and map the named segment, retrying while the freshly
    /// spawned host is still creating it (up to ~1s).
    pub fn attach() -> Result<Self, String> {
        let name_wide: Vec<u16> = SHM_NAME.encode_utf16().chain(std::iter::once(0)).collect();

        let mut handle = None;
        for attempt in 0..ATTACH_ATTEMPTS {
            match unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS.0, false, PCWSTR(name_wide.as_ptr())) }
            {
                Ok(h) if !h.is_invalid() => {
                    debug!(attempt, "shared segment opened");
                    handle = Some(h);
                    break;
                }
                _ => thread::sleep(Duration::from_millis(ATTACH_RETRY_MS)),
            }
        }
        let handle = handle
            .ok_or_else(|| "segment never appeared; host process may have died".to_string())?;

        let ptr =
            unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, SHM_SIZE) }.Value as *mut u8;
        if ptr.is_null() {
            unsafe {
                let _ = CloseHandle(handle);
            }
            return Err("MapViewOfFile failed".to_string());
        }

        Ok(Self { ptr, handle })
    }

    pub fn control(&self) -> &ControlBlock {
        unsafe { &*(self.ptr as *const ControlBlock) }
    }

    fn log_header(&self) -> &LogRingHeader {
        unsafe { &*(self.ptr.add(LOG_RING_OFFSET) as *const LogRingHeader) }
    }

    fn log_data(&self) -> *const u8 {
        unsafe { self.ptr.add(LOG_RING_OFFSET + LOG_HEADER_SIZE) }
    }

    /// Pull one forwarded tracing event off the log ring, or `None` when
    /// it is empty. An undecodable frame is dropped with a warning; the
    /// ring itself already skipped it.
    pub fn read_log_event(&self) -> Option<TracingEvent> {
        let bytes = unsafe { shared::read_frame(self.log_header(), self.log_data()) }?;
        match serde_json::from_slice(&bytes) {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(error = %err, "failed to deserialize forwarded log event");
                None
            }
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        unsafe {
            let _ = UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                Value: self.ptr as *mut _,
            });
            let _ = CloseHandle(self.handle);
        }
    }
}
