//! Observer installation, the classification callback, and the rundll32
//! lifecycle entry point.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicPtr, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use shared::{
    classify, is_keypad_nav, ControlBlock, Decision, KeyEvent, EXIT_CLEAN, EXIT_INSTALL_FAILED,
    EXIT_SEGMENT_FAILED, PARENT_POLL_MS, RUNNING_POLL_MS,
};
use tracing::{error, info};
use windows::core::{BOOL, PCSTR};
use windows::Win32::Foundation::{
    CloseHandle, HINSTANCE, HMODULE, HWND, LPARAM, LRESULT, WAIT_TIMEOUT, WPARAM,
};
use windows::Win32::System::LibraryLoader::DisableThreadLibraryCalls;
use windows::Win32::System::Threading::{
    ExitProcess, GetCurrentThreadId, OpenProcess, WaitForSingleObject, PROCESS_SYNCHRONIZE,
};
use windows::Win32::UI::Input::KeyboardAndMouse::{GetKeyState, VK_NUMLOCK};
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, KillTimer, PostQuitMessage,
    PostThreadMessageW, SetTimer, SetWindowsHookExW, TranslateMessage, UnhookWindowsHookEx,
    HHOOK, KBDLLHOOKSTRUCT, LLKHF_EXTENDED, LLKHF_INJECTED, MSG, WH_KEYBOARD_LL, WM_KEYDOWN,
    WM_KEYUP, WM_QUIT, WM_SYSKEYDOWN, WM_SYSKEYUP,
};

use crate::ipc::HostSegment;
use crate::tracing_layer;

static DLL_MODULE: AtomicIsize = AtomicIsize::new(0);
static HOOK_HANDLE: AtomicIsize = AtomicIsize::new(0);
static HOOK_THREAD_ID: AtomicU32 = AtomicU32::new(0);
/// Control block pointer for the hot path; null while the host is down.
static CONTROL: AtomicPtr<ControlBlock> = AtomicPtr::new(std::ptr::null_mut());
/// Whether the observer ever registered, kept past teardown for the exit
/// status.
static INSTALL_OK: AtomicBool = AtomicBool::new(false);
static HOST: Mutex<Option<HostState>> = Mutex::new(None);

struct HostState {
    segment: Arc<HostSegment>,
    thread: JoinHandle<()>,
}

/// # Safety
/// Called by the Windows DLL loader with valid parameters.
#[no_mangle]
pub unsafe extern "system" fn DllMain(
    dll_instance: HINSTANCE,
    reason: u32,
    _reserved: *const c_void,
) -> BOOL {
    match reason {
        1 => {
            // DLL_PROCESS_ATTACH
            DLL_MODULE.store(dll_instance.0 as isize, Ordering::Relaxed);
            let _ = DisableThreadLibraryCalls(HMODULE(dll_instance.0));
        }
        0 => {
            // DLL_PROCESS_DETACH: normally a no-op because start_entry
            // already tore down, but covers a forced unload.
            stop_hook();
        }
        _ => {}
    }
    BOOL::from(true)
}

/// Create the shared segment and spin up the observer thread. Returns
/// immediately; installation success is reported through the segment's
/// status flag, not the return value.
///
/// # Safety
/// Windows-API plumbing; must not be called concurrently with itself or
/// `stop_hook` from another thread.
#[no_mangle]
pub unsafe extern "system" fn start_hook() -> BOOL {
    let Ok(mut host) = HOST.lock() else {
        return BOOL::from(false);
    };
    if host.is_some() {
        return BOOL::from(true);
    }

    let segment = match HostSegment::create() {
        Ok(segment) => Arc::new(segment),
        // No subscriber yet, nowhere to log: the controller sees the
        // failure as a missing segment.
        Err(_) => return BOOL::from(false),
    };

    let numlock_on = (GetKeyState(VK_NUMLOCK.0 as i32) & 1) != 0;
    segment.control().init(numlock_on);

    // From here on this process's tracing output is forwarded to the
    // controller through the segment's log ring.
    tracing_layer::install(Arc::clone(&segment));

    CONTROL.store(
        segment.control() as *const ControlBlock as *mut ControlBlock,
        Ordering::Release,
    );

    let thread = std::thread::spawn(|| unsafe { hook_thread() });
    *host = Some(HostState { segment, thread });

    info!(numlock_on, "hook host started");
    BOOL::from(true)
}

/// Uninstall the observer, stop the message loop, and release the
/// segment. Idempotent.
///
/// # Safety
/// Windows-API plumbing; see `start_hook`.
#[no_mangle]
pub unsafe extern "system" fn stop_hook() {
    let state = {
        let Ok(mut host) = HOST.lock() else { return };
        host.take()
    };
    let Some(HostState { segment, thread }) = state else {
        return;
    };

    // The callback passes everything through once this is null.
    CONTROL.store(std::ptr::null_mut(), Ordering::Release);

    let thread_id = HOOK_THREAD_ID.swap(0, Ordering::AcqRel);
    if thread_id != 0 {
        let _ = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
    }
    let _ = thread.join();

    info!("hook host stopped");
    // The log forwarder may still hold a reference; the mapping is
    // released with the last one, at the latest on process exit.
    drop(segment);
}

/// Dedicated observer thread: owns the hook registration and the message
/// loop that Windows delivers callbacks through.
unsafe fn hook_thread() {
    HOOK_THREAD_ID.store(GetCurrentThreadId(), Ordering::Release);

    let module = HMODULE(DLL_MODULE.load(Ordering::Relaxed) as *mut c_void);
    let control = CONTROL.load(Ordering::Acquire);

    match SetWindowsHookExW(WH_KEYBOARD_LL, Some(hook_proc), Some(module.into()), 0) {
        Ok(hook) => {
            HOOK_HANDLE.store(hook.0 as isize, Ordering::Relaxed);
            INSTALL_OK.store(true, Ordering::Release);
            if let Some(control) = control.as_ref() {
                control.set_hook_installed(true);
            }
            info!("keyboard observer installed");
        }
        Err(err) => {
            // Not retried. The message loop still runs so the host
            // honors a stop request; the controller polls the status
            // flag and surfaces the failure.
            if let Some(control) = control.as_ref() {
                control.set_hook_installed(false);
            }
            error!(error = %err, "keyboard observer installation failed");
        }
    }

    let timer = SetTimer(None, 0, RUNNING_POLL_MS, Some(watchdog));

    let mut msg = MSG::default();
    while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
        let _ = TranslateMessage(&msg);
        DispatchMessageW(&msg);
    }

    let _ = KillTimer(None, timer);

    let hook = HOOK_HANDLE.swap(0, Ordering::Relaxed);
    if hook != 0 {
        let _ = UnhookWindowsHookEx(HHOOK(hook as *mut c_void));
        info!("keyboard observer removed");
    }
    if let Some(control) = CONTROL.load(Ordering::Acquire).as_ref() {
        control.set_hook_installed(false);
    }
}

/// Coarse watchdog: end the message loop once the controller clears the
/// running flag.
unsafe extern "system" fn watchdog(_hwnd: HWND, _msg: u32, _id: usize, _time: u32) {
    match CONTROL.load(Ordering::Acquire).as_ref() {
        Some(control) if control.is_running() => {}
        _ => PostQuitMessage(0),
    }
}

/// The low-level keyboard callback. Windows enforces a delivery timeout
/// and silently detaches slow callbacks, so this does nothing beyond a
/// handful of atomic operations: classify, count, enqueue, return.
///
/// # Safety
/// Dereferences lparam as KBDLLHOOKSTRUCT, per the hook contract.
unsafe extern "system" fn hook_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code >= 0 {
        if let Some(control) = CONTROL.load(Ordering::Acquire).as_ref() {
            let kb = *(lparam.0 as *const KBDLLHOOKSTRUCT);
            let msg = wparam.0 as u32;
            let pressed = msg == WM_KEYDOWN || msg == WM_SYSKEYDOWN;
            let released = msg == WM_KEYUP || msg == WM_SYSKEYUP;

            if pressed || released {
                control.record_key();

                if pressed && kb.vkCode == u32::from(VK_NUMLOCK.0) {
                    // GetKeyState still reports the pre-toggle state at
                    // this point; publish what the state will become.
                    let will_be_on = (GetKeyState(VK_NUMLOCK.0 as i32) & 1) == 0;
                    control.publish_lock_transition(will_be_on);
                }
                if pressed && is_keypad_nav(kb.scanCode) {
                    control.record_cluster();
                }

                let event = KeyEvent {
                    scan_code: kb.scanCode,
                    pressed,
                    injected: kb.flags.contains(LLKHF_INJECTED),
                    extended: kb.flags.contains(LLKHF_EXTENDED),
                };
                if let Decision::Suppress { enqueue } =
                    classify(event, control.passthrough(), control.lock_is_off())
                {
                    if enqueue {
                        // Ring full silently drops the press.
                        let _ = control.enqueue(event.scan_code);
                    }
                    control.record_suppressed();
                    return LRESULT(1);
                }
            }
        }
    }
    CallNextHookEx(None, code, wparam, lparam)
}

/// rundll32 entry point:
///
/// ```text
/// rundll32.exe hook.dll,start_entry <controller-pid>
/// ```
///
/// Runs the host until the controller clears the running flag or the
/// controller process exits, whichever comes first, then tears down and
/// exits with a status distinguishing clean shutdown from a failed
/// observer installation. The parent-liveness wait guarantees no orphaned
/// host survives a controller crash.
///
/// # Safety
/// Called by rundll32 with an ANSI command line.
#[no_mangle]
pub unsafe extern "system" fn start_entry(
    _hwnd: HWND,
    _hinst: HINSTANCE,
    cmd_line: PCSTR,
    _show: i32,
) {
    let parent = parse_parent_pid(cmd_line)
        .and_then(|pid| OpenProcess(PROCESS_SYNCHRONIZE, false, pid).ok());

    if !start_hook().as_bool() {
        if let Some(handle) = parent {
            let _ = CloseHandle(handle);
        }
        ExitProcess(EXIT_SEGMENT_FAILED);
    }

    loop {
        match CONTROL.load(Ordering::Acquire).as_ref() {
            Some(control) if control.is_running() => {}
            _ => break,
        }
        match parent {
            Some(handle) => {
                if WaitForSingleObject(handle, PARENT_POLL_MS) != WAIT_TIMEOUT {
                    info!("controller process exited, shutting down");
                    break;
                }
            }
            None => std::thread::sleep(Duration::from_millis(u64::from(PARENT_POLL_MS))),
        }
    }

    if let Some(handle) = parent {
        let _ = CloseHandle(handle);
    }

    // stop_hook joins the observer thread, so the flag is final here.
    stop_hook();
    let installed = INSTALL_OK.load(Ordering::Acquire);
    ExitProcess(if installed {
        EXIT_CLEAN
    } else {
        EXIT_INSTALL_FAILED
    });
}

fn parse_parent_pid(cmd_line: PCSTR) -> Option<u32> {
    if cmd_line.is_null() {
        return None;
    }
    let text = unsafe { cmd_line.to_string() }.ok()?;
    text.split_whitespace().next()?.parse().ok()
}
