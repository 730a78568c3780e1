//! Tracing subscriber that forwards the host's log events to the
//! controller through the segment's log ring.

use std::sync::Arc;

use tracing::subscriber;
use tracing_tunnel::TracingEventSender;

use crate::ipc::HostSegment;

/// Install a global subscriber that ships every event across the segment.
///
/// Best effort on both ends: if a subscriber is already set (a second
/// start in the same host process) the existing one is kept, and a full
/// log ring drops events rather than blocking the host.
pub fn install(segment: Arc<HostSegment>) {
    let sender = TracingEventSender::new(move |event| {
        let _ = segment.write_log_event(&event);
    });
    let _ = subscriber::set_global_default(sender);
}
