//! Suppression policy for the keypad navigation cluster.
//!
//! The hook host recognizes exactly one small set of physical keys: the
//! numeric keypad's navigation cluster, identified by hardware scan code
//! so the decision is independent of how Num Lock remaps the keys
//! logically. The policy itself is a pure function so it can be exercised
//! without a keyboard or an OS hook.

/// Keypad 0 / Ins, reported to the controller as "back".
pub const KEYPAD_BACK_SCAN: u32 = 82;

/// True for the keypad navigation cluster: 7 8 9 / 4 5 6 / 1 2 3 / 0.
///
/// The arrow and Home/End copies of these keys carry the extended flag
/// and are excluded by [`classify`], not here.
pub fn is_keypad_nav(scan_code: u32) -> bool {
    matches!(scan_code, 71..=73 | 75..=77 | 79..=82)
}

/// Grid position of a cluster key as (row, column) on the 3x3 pad, row 0
/// at the top. [`KEYPAD_BACK_SCAN`] sits below the grid and maps to none.
pub fn keypad_position(scan_code: u32) -> Option<(u8, u8)> {
    let pos = match scan_code {
        71 => (0, 0),
        72 => (0, 1),
        73 => (0, 2),
        75 => (1, 0),
        76 => (1, 1),
        77 => (1, 2),
        79 => (2, 0),
        80 => (2, 1),
        81 => (2, 2),
        _ => return None,
    };
    Some(pos)
}

/// A single observed keyboard event, reduced to what the policy needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// Hardware scan code.
    pub scan_code: u32,
    /// Key-down (true) or key-up (false).
    pub pressed: bool,
    /// Software-synthesized event (LLKHF_INJECTED).
    pub injected: bool,
    /// Extended-key flag (LLKHF_EXTENDED).
    pub extended: bool,
}

/// What the hook callback should do with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Swallow the event so no other application sees it. When `enqueue`
    /// is set the scan code is also delivered through the event ring;
    /// key-ups are swallowed silently since only the press matters.
    Suppress { enqueue: bool },
    /// Hand the event to the next observer in the chain untouched.
    Forward,
}

/// Suppress iff the key is a cluster member, Num Lock is off, passthrough
/// is disabled, and the event is a real (non-injected), non-extended key.
pub fn classify(event: KeyEvent, passthrough: bool, lock_off: bool) -> Decision {
    if passthrough
        || !lock_off
        || event.injected
        || event.extended
        || !is_keypad_nav(event.scan_code)
    {
        return Decision::Forward;
    }
    Decision::Suppress {
        enqueue: event.pressed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_membership() {
        for scan in [71, 72, 73, 75, 76, 77, 79, 80, 81, 82] {
            assert!(is_keypad_nav(scan), "scan {scan} should be in the cluster");
        }
        // Neighbors outside the cluster: 7-row gap keys and beyond.
        for scan in [0, 69, 70, 74, 78, 83, 200] {
            assert!(!is_keypad_nav(scan), "scan {scan} should not be in the cluster");
        }
    }

    #[test]
    fn grid_positions() {
        assert_eq!(keypad_position(71), Some((0, 0)));
        assert_eq!(keypad_position(77), Some((1, 2)));
        assert_eq!(keypad_position(80), Some((2, 1)));
        assert_eq!(keypad_position(KEYPAD_BACK_SCAN), None);
        assert_eq!(keypad_position(74), None);
    }

    #[test]
    fn suppression_truth_table() {
        for member in [true, false] {
            for lock_off in [true, false] {
                for passthrough in [true, false] {
                    for injected in [true, false] {
                        for extended in [true, false] {
                            for pressed in [true, false] {
                                let event = KeyEvent {
                                    scan_code: if member { 76 } else { 30 },
                                    pressed,
                                    injected,
                                    extended,
                                };
                                let got = classify(event, passthrough, lock_off);
                                let suppress = member
                                    && lock_off
                                    && !passthrough
                                    && !injected
                                    && !extended;
                                let want = if suppress {
                                    Decision::Suppress { enqueue: pressed }
                                } else {
                                    Decision::Forward
                                };
                                assert_eq!(
                                    got, want,
                                    "member={member} lock_off={lock_off} \
                                     passthrough={passthrough} injected={injected} \
                                     extended={extended} pressed={pressed}"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn key_up_suppressed_without_enqueue() {
        let up = KeyEvent {
            scan_code: 71,
            pressed: false,
            injected: false,
            extended: false,
        };
        assert_eq!(classify(up, false, true), Decision::Suppress { enqueue: false });
    }
}
