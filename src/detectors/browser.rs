//! Browser focus and input detectors
//!
//! Focus loss and tab switches are reported on every occurrence, without debounce.
//! Resizes are collapsed with a short leading-edge window. High-risk key combinations
//! and context-menu requests are reported immediately and have their default action
//! suppressed.

use chrono::{DateTime, Utc};

use super::{BrowserDetector, BrowserVerdict};
use crate::config::BrowserConfig;
use crate::types::{BrowserEvent, BrowserEventKind, DetectorKind, SignalEvent, SignalKind};

/// Emits `tab_switch`, `window_blur` and `window_resize`
pub struct BrowserFocusDetector {
    resize_debounce_ms: i64,
    last_resize: Option<DateTime<Utc>>,
}

impl BrowserFocusDetector {
    pub fn new(config: &BrowserConfig) -> Self {
        Self {
            resize_debounce_ms: config.resize_debounce_ms,
            last_resize: None,
        }
    }
}

impl BrowserDetector for BrowserFocusDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::BrowserFocus
    }

    fn observe(&mut self, event: &BrowserEvent) -> BrowserVerdict {
        let signal = match &event.kind {
            BrowserEventKind::VisibilityChange { hidden: true } => SignalKind::TabSwitch,
            BrowserEventKind::WindowBlur => SignalKind::WindowBlur,
            BrowserEventKind::WindowResize { width, height } => {
                let within_window = self.last_resize.is_some_and(|last| {
                    (event.timestamp - last).num_milliseconds() < self.resize_debounce_ms
                });
                self.last_resize = Some(event.timestamp);
                if within_window {
                    return BrowserVerdict::none();
                }
                SignalKind::WindowResize {
                    width: *width,
                    height: *height,
                }
            }
            _ => return BrowserVerdict::none(),
        };
        BrowserVerdict::signal(SignalEvent::new(
            event.timestamp,
            DetectorKind::BrowserFocus,
            signal,
        ))
    }

    fn reset(&mut self) {
        self.last_resize = None;
    }
}

/// A modifier + key combination considered high risk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCombo {
    pub label: &'static str,
    pub key: &'static str,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

const fn combo(
    label: &'static str,
    key: &'static str,
    ctrl: bool,
    alt: bool,
    shift: bool,
    meta: bool,
) -> KeyCombo {
    KeyCombo {
        label,
        key,
        ctrl,
        alt,
        shift,
        meta,
    }
}

/// Developer tools, view-source, task switching and screen capture shortcuts.
///
/// Modifiers listed as `true` must be held; other modifiers are ignored, so
/// `Ctrl+Alt+Shift+I` still matches `Ctrl+Shift+I`.
pub const SUSPICIOUS_COMBOS: &[KeyCombo] = &[
    combo("F12", "F12", false, false, false, false),
    combo("F11", "F11", false, false, false, false),
    combo("PrintScreen", "PrintScreen", false, false, false, false),
    combo("Alt+Tab", "Tab", false, true, false, false),
    combo("Cmd+Tab", "Tab", false, false, false, true),
    combo("Ctrl+Shift+I", "I", true, false, true, false),
    combo("Cmd+Option+I", "I", false, true, false, true),
    combo("Ctrl+U", "U", true, false, false, false),
    combo("Cmd+U", "U", false, false, false, true),
    combo("Ctrl+Shift+C", "C", true, false, true, false),
    combo("Cmd+Option+C", "C", false, true, false, true),
];

/// Match a keydown against the suspicious combination table
pub fn match_combo(key: &str, ctrl: bool, alt: bool, shift: bool, meta: bool) -> Option<&'static KeyCombo> {
    SUSPICIOUS_COMBOS.iter().find(|c| {
        c.key.eq_ignore_ascii_case(key)
            && (!c.ctrl || ctrl)
            && (!c.alt || alt)
            && (!c.shift || shift)
            && (!c.meta || meta)
    })
}

/// Emits `suspicious_keypress` and `context_menu`
#[derive(Debug, Default)]
pub struct InputDetector;

impl InputDetector {
    pub fn new() -> Self {
        Self
    }
}

impl BrowserDetector for InputDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Input
    }

    fn observe(&mut self, event: &BrowserEvent) -> BrowserVerdict {
        let signal = match &event.kind {
            BrowserEventKind::KeyDown {
                key,
                ctrl,
                alt,
                shift,
                meta,
            } => match match_combo(key, *ctrl, *alt, *shift, *meta) {
                Some(found) => SignalKind::SuspiciousKeypress {
                    combo: found.label.to_string(),
                },
                None => return BrowserVerdict::none(),
            },
            BrowserEventKind::ContextMenu => SignalKind::ContextMenu,
            _ => return BrowserVerdict::none(),
        };
        BrowserVerdict {
            signals: vec![SignalEvent::new(event.timestamp, DetectorKind::Input, signal)],
            prevent_default: true,
        }
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(ms: i64, kind: BrowserEventKind) -> BrowserEvent {
        BrowserEvent::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::milliseconds(ms),
            kind,
        )
    }

    fn key(key: &str, ctrl: bool, alt: bool, shift: bool, meta: bool) -> BrowserEventKind {
        BrowserEventKind::KeyDown {
            key: key.to_string(),
            ctrl,
            alt,
            shift,
            meta,
        }
    }

    #[test]
    fn test_every_hide_is_a_tab_switch() {
        let mut detector = BrowserFocusDetector::new(&BrowserConfig::default());
        for ms in [0, 10, 20] {
            let verdict = detector.observe(&at(ms, BrowserEventKind::VisibilityChange { hidden: true }));
            assert_eq!(verdict.signals[0].signal, SignalKind::TabSwitch);
            assert!(!verdict.prevent_default);
        }
        let shown = detector.observe(&at(30, BrowserEventKind::VisibilityChange { hidden: false }));
        assert!(shown.signals.is_empty());
    }

    #[test]
    fn test_blur_and_focus() {
        let mut detector = BrowserFocusDetector::new(&BrowserConfig::default());
        assert_eq!(
            detector.observe(&at(0, BrowserEventKind::WindowBlur)).signals[0].signal,
            SignalKind::WindowBlur
        );
        assert!(detector
            .observe(&at(5, BrowserEventKind::WindowFocus))
            .signals
            .is_empty());
    }

    #[test]
    fn test_resize_debounce() {
        let mut detector = BrowserFocusDetector::new(&BrowserConfig::default());
        let resize = |w| BrowserEventKind::WindowResize {
            width: w,
            height: 800,
        };
        assert_eq!(detector.observe(&at(0, resize(1000))).signals.len(), 1);
        assert!(detector.observe(&at(100, resize(1010))).signals.is_empty());
        assert!(detector.observe(&at(350, resize(1020))).signals.is_empty());
        assert_eq!(detector.observe(&at(700, resize(1030))).signals.len(), 1);
    }

    #[test]
    fn test_suspicious_combos() {
        assert_eq!(match_combo("F12", false, false, false, false).unwrap().label, "F12");
        assert_eq!(match_combo("i", true, false, true, false).unwrap().label, "Ctrl+Shift+I");
        assert_eq!(match_combo("I", false, true, false, true).unwrap().label, "Cmd+Option+I");
        assert_eq!(match_combo("u", true, false, false, false).unwrap().label, "Ctrl+U");
        assert_eq!(match_combo("Tab", false, true, false, false).unwrap().label, "Alt+Tab");
        assert!(match_combo("Tab", false, false, false, false).is_none());
        assert!(match_combo("c", true, false, false, false).is_none());
        assert!(match_combo("a", true, false, false, false).is_none());
    }

    #[test]
    fn test_input_detector_prevents_default() {
        let mut detector = InputDetector::new();
        let verdict = detector.observe(&at(0, key("F12", false, false, false, false)));
        assert!(verdict.prevent_default);
        assert_eq!(
            verdict.signals[0].signal,
            SignalKind::SuspiciousKeypress {
                combo: "F12".to_string()
            }
        );

        let menu = detector.observe(&at(0, BrowserEventKind::ContextMenu));
        assert!(menu.prevent_default);
        assert_eq!(menu.signals[0].signal, SignalKind::ContextMenu);

        let typing = detector.observe(&at(0, key("a", false, false, false, false)));
        assert!(!typing.prevent_default);
        assert!(typing.signals.is_empty());
    }
}
