//! Spawning and reaping the rundll32-hosted hook process.

use std::os::windows::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

use shared::STOP_TIMEOUT_MS;
use tracing::{debug, info, warn};
use windows::Win32::System::Threading::CREATE_NO_WINDOW;

use crate::HookError;

/// Exported DLL function that runs the host until told to stop.
const HOST_ENTRY: &str = "start_entry";

/// Launch `rundll32.exe "<dll>",start_entry <our-pid>` with no window.
///
/// rundll32 is a trusted system-provided loader, so hosting the hook in
/// it works where a freshly compiled helper executable might be
/// quarantined by security tooling. Our PID travels on the command line
/// so the host can exit on its own if this process crashes.
pub fn spawn_host() -> Result<Child, HookError> {
    let dll = hook_dll_path();
    info!(path = %dll.display(), "launching hook host");

    let child = Command::new("rundll32.exe")
        .raw_arg(format!(
            "\"{}\",{} {}",
            dll.display(),
            HOST_ENTRY,
            std::process::id()
        ))
        .creation_flags(CREATE_NO_WINDOW.0)
        .spawn()?;
    Ok(child)
}

/// Wait up to the stop timeout for a clean exit, then kill. Called after
/// the running flag has been cleared, so a healthy host is already on
/// its way out.
pub fn reap(mut child: Child) {
    let deadline = Instant::now() + Duration::from_millis(STOP_TIMEOUT_MS);
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(code = ?status.code(), "hook host exited");
                return;
            }
            Ok(None) if Instant::now() < deadline => {
                thread::sleep(Duration::from_millis(20));
            }
            Ok(None) => {
                warn!("hook host ignored shutdown request, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return;
            }
            Err(err) => {
                warn!(error = %err, "failed to wait for hook host");
                let _ = child.kill();
                return;
            }
        }
    }
}

/// The hook DLL ships next to the controller executable.
fn hook_dll_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap_or_default();
    path.pop();
    path.push("hook.dll");
    path
}
