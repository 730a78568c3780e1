//! Demo controller: starts the hook host and prints everything it
//! reports until Enter is pressed.

#[cfg(windows)]
fn main() {
    windows_main::run();
}

#[cfg(not(windows))]
fn main() {
    eprintln!("the numpad-hook launcher only runs on Windows");
}

#[cfg(windows)]
mod windows_main {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use launcher::{keypad_position, NumpadHook, KEYPAD_BACK_SCAN};
    use tracing::{error, info, Level};

    /// Drain cadence; comfortably ahead of human key-repeat rates.
    const POLL_INTERVAL: Duration = Duration::from_millis(16);
    const DIAG_INTERVAL: Duration = Duration::from_secs(3);

    pub fn run() {
        tracing_subscriber::fmt()
            .compact()
            .with_max_level(Level::DEBUG)
            .init();

        info!(
            git = env!("GIT_HASH"),
            built = env!("BUILD_TIMESTAMP"),
            "numpad-hook controller"
        );

        let mut hook = NumpadHook::new();
        if let Err(err) = hook.start() {
            error!(error = %err, "failed to start hook host");
            return;
        }
        info!(numlock_on = hook.numlock_on(), "hook host running");

        println!("\nKeypad keys are captured while Num Lock is off.");
        println!("Press Enter to exit and restore normal input...\n");

        let quit = Arc::new(AtomicBool::new(false));
        {
            let quit = Arc::clone(&quit);
            std::thread::spawn(move || {
                let mut line = String::new();
                let _ = std::io::stdin().read_line(&mut line);
                quit.store(true, Ordering::Release);
            });
        }

        let mut last_diag = Instant::now();
        while !quit.load(Ordering::Acquire) {
            while let Some(scan) = hook.poll_event() {
                match keypad_position(scan) {
                    Some((row, col)) => info!(scan, row, col, "keypad press"),
                    None if scan == KEYPAD_BACK_SCAN => info!(scan, "back key"),
                    None => info!(scan, "cluster press"),
                }
            }
            if let Some(on) = hook.poll_lock_change() {
                info!(numlock_on = on, "Num Lock toggled");
            }
            hook.pump_logs();

            if last_diag.elapsed() >= DIAG_INTERVAL {
                if let Ok(status) = hook.status() {
                    info!(
                        installed = status.installed,
                        keys_seen = status.keys_seen,
                        suppressed = status.suppressed,
                        cluster_seen = status.cluster_seen,
                        "hook diagnostics"
                    );
                }
                last_diag = Instant::now();
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        hook.stop();
        info!("shutdown complete");
    }
}
