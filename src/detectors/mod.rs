//! Local signal detectors
//!
//! One detector per channel. Each consumes a single [`LandmarkFrame`] or [`BrowserEvent`]
//! and emits zero or more [`SignalEvent`]s. Detectors keep only their own debounce state
//! and never touch session metrics; counting is the aggregator's job.
//!
//! [`DetectorSet`] runs every detector in isolation: a detector that panics is reset and
//! retried up to the configured restart budget, then disabled for the rest of the session.
//! Each failure is reported as a `detector_degraded` advisory signal.

pub mod browser;
pub mod distance;
pub mod gaze;
pub mod hand;
pub mod head;
pub mod pose;
pub mod presence;

use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::MonitorConfig;
use crate::types::{BrowserEvent, DetectorKind, LandmarkFrame, SignalEvent, SignalKind};

pub use browser::{BrowserFocusDetector, InputDetector};
pub use distance::DistanceDetector;
pub use gaze::GazeDetector;
pub use hand::HandProximityDetector;
pub use head::HeadMovementDetector;
pub use pose::PoseOrientationDetector;
pub use presence::PersonPresenceDetector;

/// A detector fed by the landmark frame stream
pub trait FrameDetector: Send {
    fn kind(&self) -> DetectorKind;

    /// Inspect one frame and emit signals
    fn observe(&mut self, frame: &LandmarkFrame) -> Vec<SignalEvent>;

    /// Drop all local debounce state (used when the detector is restarted)
    fn reset(&mut self);
}

/// Result of a browser detector inspecting one event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowserVerdict {
    pub signals: Vec<SignalEvent>,
    /// The host should suppress the event's default action
    pub prevent_default: bool,
}

impl BrowserVerdict {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn signal(event: SignalEvent) -> Self {
        Self {
            signals: vec![event],
            prevent_default: false,
        }
    }
}

/// A detector fed by the browser / OS event stream
pub trait BrowserDetector: Send {
    fn kind(&self) -> DetectorKind;

    fn observe(&mut self, event: &BrowserEvent) -> BrowserVerdict;

    fn reset(&mut self);
}

struct Slot<D: ?Sized> {
    failures: u32,
    enabled: bool,
    detector: Box<D>,
}

impl<D: ?Sized> Slot<D> {
    fn new(detector: Box<D>) -> Self {
        Self {
            failures: 0,
            enabled: true,
            detector,
        }
    }
}

/// Every detector of a session, with per-detector failure isolation
pub struct DetectorSet {
    frame_detectors: Vec<Slot<dyn FrameDetector>>,
    browser_detectors: Vec<Slot<dyn BrowserDetector>>,
    max_restarts: u32,
}

impl DetectorSet {
    /// The standard detector line-up for a config
    pub fn new(config: &MonitorConfig) -> Self {
        let mut set = Self::for_frames(config);
        set.add_standard_browser_detectors(config);
        set
    }

    /// Only the landmark-frame detectors
    pub fn for_frames(config: &MonitorConfig) -> Self {
        let mut set = Self::empty(config.detectors.max_restarts);
        set.add_frame_detector(Box::new(PersonPresenceDetector::new(&config.presence)));
        set.add_frame_detector(Box::new(GazeDetector::new(&config.gaze)));
        set.add_frame_detector(Box::new(HeadMovementDetector::new(&config.head)));
        set.add_frame_detector(Box::new(HandProximityDetector::new(&config.hand)));
        set.add_frame_detector(Box::new(PoseOrientationDetector::new(&config.pose)));
        set.add_frame_detector(Box::new(DistanceDetector::new(&config.distance)));
        set
    }

    /// Only the browser event detectors
    pub fn for_browser(config: &MonitorConfig) -> Self {
        let mut set = Self::empty(config.detectors.max_restarts);
        set.add_standard_browser_detectors(config);
        set
    }

    fn add_standard_browser_detectors(&mut self, config: &MonitorConfig) {
        self.add_browser_detector(Box::new(BrowserFocusDetector::new(&config.browser)));
        self.add_browser_detector(Box::new(InputDetector::new()));
    }

    /// A set with no detectors
    pub fn empty(max_restarts: u32) -> Self {
        Self {
            frame_detectors: Vec::new(),
            browser_detectors: Vec::new(),
            max_restarts,
        }
    }

    pub fn add_frame_detector(&mut self, detector: Box<dyn FrameDetector>) {
        self.frame_detectors.push(Slot::new(detector));
    }

    pub fn add_browser_detector(&mut self, detector: Box<dyn BrowserDetector>) {
        self.browser_detectors.push(Slot::new(detector));
    }

    /// Kinds of the detectors still running
    pub fn active(&self) -> Vec<DetectorKind> {
        let frame = self
            .frame_detectors
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.detector.kind());
        let browser = self
            .browser_detectors
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.detector.kind());
        frame.chain(browser).collect()
    }

    /// Run every enabled frame detector over one frame
    pub fn observe_frame(&mut self, frame: &LandmarkFrame) -> Vec<SignalEvent> {
        let mut signals = Vec::new();
        let max_restarts = self.max_restarts;

        for slot in self.frame_detectors.iter_mut().filter(|s| s.enabled) {
            let detector = &mut slot.detector;
            match catch_unwind(AssertUnwindSafe(|| detector.observe(frame))) {
                Ok(mut emitted) => signals.append(&mut emitted),
                Err(panic) => {
                    let kind = slot.detector.kind();
                    let reason = panic_message(panic.as_ref());
                    signals.push(Self::record_failure(
                        &mut slot.failures,
                        &mut slot.enabled,
                        max_restarts,
                        kind,
                        reason,
                        frame.timestamp,
                    ));
                    if slot.enabled {
                        slot.detector.reset();
                    }
                }
            }
        }
        signals
    }

    /// Run every enabled browser detector over one event
    pub fn observe_browser(&mut self, event: &BrowserEvent) -> BrowserVerdict {
        let mut verdict = BrowserVerdict::none();
        let max_restarts = self.max_restarts;

        for slot in self.browser_detectors.iter_mut().filter(|s| s.enabled) {
            let detector = &mut slot.detector;
            match catch_unwind(AssertUnwindSafe(|| detector.observe(event))) {
                Ok(mut result) => {
                    verdict.signals.append(&mut result.signals);
                    verdict.prevent_default |= result.prevent_default;
                }
                Err(panic) => {
                    let kind = slot.detector.kind();
                    let reason = panic_message(panic.as_ref());
                    verdict.signals.push(Self::record_failure(
                        &mut slot.failures,
                        &mut slot.enabled,
                        max_restarts,
                        kind,
                        reason,
                        event.timestamp,
                    ));
                    if slot.enabled {
                        slot.detector.reset();
                    }
                }
            }
        }
        verdict
    }

    fn record_failure(
        failures: &mut u32,
        enabled: &mut bool,
        max_restarts: u32,
        kind: DetectorKind,
        reason: String,
        timestamp: DateTime<Utc>,
    ) -> SignalEvent {
        *failures += 1;
        let action = if *failures > max_restarts {
            *enabled = false;
            "disabled"
        } else {
            "restarted"
        };
        warn!(
            detector = kind.as_str(),
            failures = *failures,
            action,
            reason = %reason,
            "Detector failed"
        );
        SignalEvent::new(
            timestamp,
            DetectorKind::Monitor,
            SignalKind::DetectorDegraded {
                detector: kind,
                reason: format!("{reason} ({action})"),
            },
        )
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "detector panicked".to_string()
    }
}
