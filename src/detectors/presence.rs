//! Person presence detector
//!
//! Emits `no_face` once a run of empty frames outlasts the grace window, and
//! `multiple_persons` as soon as more than one face appears.

use chrono::{DateTime, Utc};

use super::FrameDetector;
use crate::config::PresenceConfig;
use crate::types::{DetectorKind, LandmarkFrame, SignalEvent, SignalKind};

pub struct PersonPresenceDetector {
    grace_ms: i64,
    /// Timestamp of the first frame of the current absence run
    absent_since: Option<DateTime<Utc>>,
    /// `no_face` already emitted for the current absence run
    absence_reported: bool,
    /// Currently inside a multi-person run
    crowd_active: bool,
}

impl PersonPresenceDetector {
    pub fn new(config: &PresenceConfig) -> Self {
        Self {
            grace_ms: config.grace_ms,
            absent_since: None,
            absence_reported: false,
            crowd_active: false,
        }
    }
}

impl FrameDetector for PersonPresenceDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Presence
    }

    fn observe(&mut self, frame: &LandmarkFrame) -> Vec<SignalEvent> {
        let ts = frame.timestamp;
        let face_count = frame.faces.len();
        let mut signals = Vec::new();

        if face_count == 0 {
            self.crowd_active = false;
            let since = *self.absent_since.get_or_insert(ts);
            let missing_for_ms = (ts - since).num_milliseconds();
            if !self.absence_reported && missing_for_ms >= self.grace_ms {
                self.absence_reported = true;
                signals.push(SignalEvent::new(
                    ts,
                    DetectorKind::Presence,
                    SignalKind::NoFace { missing_for_ms },
                ));
            }
            return signals;
        }

        self.absent_since = None;
        self.absence_reported = false;

        signals.push(SignalEvent::new(
            ts,
            DetectorKind::Presence,
            SignalKind::FacePresent { faces: face_count },
        ));

        if face_count > 1 {
            if !self.crowd_active {
                self.crowd_active = true;
                signals.push(SignalEvent::new(
                    ts,
                    DetectorKind::Presence,
                    SignalKind::MultiplePersons { faces: face_count },
                ));
            }
        } else {
            self.crowd_active = false;
        }

        signals
    }

    fn reset(&mut self) {
        self.absent_since = None;
        self.absence_reported = false;
        self.crowd_active = false;
    }
}
