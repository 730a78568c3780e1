//! Host side of the shared segment: creation, layout carving, and the
//! log-frame producer.

use std::sync::atomic::Ordering;

use shared::{
    ControlBlock, LogRingHeader, LOG_HEADER_SIZE, LOG_RING_OFFSET, LOG_RING_SIZE, SHM_NAME,
    SHM_SIZE,
};
use tracing_tunnel::TracingEvent;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
    MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};

/// Owning view of the segment created by this process. The control block
/// sits at offset 0, the log ring in the upper region; the controller
/// attaches to the same name and agrees on the layout at compile time.
pub struct HostSegment {
    ptr: *mut u8,
    handle: HANDLE,
}

// SAFETY: the mapping stays valid for the lifetime of this type, all
// shared contents are accessed through atomics, and Windows section
// handles may be used from any thread.
unsafe impl Send for HostSegment {}
unsafe impl Sync for HostSegment {}

impl HostSegment {
    /// Create and map the named segment. Windows hands the region back
    /// zero-filled; only the log ring capacity needs publishing here, the
    /// control block is initialized by the caller once the lock state is
    /// known.
    pub fn create() -> Result<Self, String> {
        unsafe {
            let name_wide: Vec<u16> = SHM_NAME.encode_utf16().chain(std::iter::once(0)).collect();

            let handle = CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                None,
                PAGE_READWRITE,
                0,
                SHM_SIZE as u32,
                PCWSTR(name_wide.as_ptr()),
            )
            .map_err(|e| format!("CreateFileMappingW failed: {e}"))?;

            if handle.is_invalid() {
                return Err("CreateFileMappingW returned invalid handle".to_string());
            }

            let ptr = MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, SHM_SIZE).Value as *mut u8;
            if ptr.is_null() {
                let _ = CloseHandle(handle);
                return Err("MapViewOfFile failed".to_string());
            }

            let log_header = ptr.add(LOG_RING_OFFSET) as *mut LogRingHeader;
            (*log_header).write_pos.store(0, Ordering::SeqCst);
            (*log_header).read_pos.store(0, Ordering::SeqCst);
            (*log_header).capacity = LOG_RING_SIZE as u32;

            Ok(Self { ptr, handle })
        }
    }

    pub fn control(&self) -> &ControlBlock {
        unsafe { &*(self.ptr as *const ControlBlock) }
    }

    fn log_header(&self) -> &LogRingHeader {
        unsafe { &*(self.ptr.add(LOG_RING_OFFSET) as *const LogRingHeader) }
    }

    fn log_data(&self) -> *mut u8 {
        unsafe { self.ptr.add(LOG_RING_OFFSET + LOG_HEADER_SIZE) }
    }

    /// Serialize and append one tracing event to the log ring. Returns
    /// false when the event was dropped (unserializable, oversized, or
    /// the controller is not draining).
    pub fn write_log_event(&self, event: &TracingEvent) -> bool {
        let Ok(bytes) = serde_json::to_vec(event) else {
            return false;
        };
        unsafe { shared::write_frame(self.log_header(), self.log_data(), &bytes) }
    }
}

impl Drop for HostSegment {
    fn drop(&mut self) {
        unsafe {
            let _ = UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                Value: self.ptr as *mut _,
            });
            let _ = CloseHandle(self.handle);
        }
    }
}
