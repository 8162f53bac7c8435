//! Gaze and eye-closure detector
//!
//! Streak policy: a look-away sample extends the streak, an eye-contact sample resets it,
//! an undetermined sample (partial mesh) leaves it untouched. When the streak reaches
//! `debounce_samples` the detector emits `poor_eye_contact` and starts a fresh streak.

use super::FrameDetector;
use crate::config::GazeConfig;
use crate::geometry::{gaze_offset, mean_eye_aspect_ratio};
use crate::types::{DetectorKind, LandmarkFrame, SignalEvent, SignalKind};

pub struct GazeDetector {
    offset_threshold: f64,
    debounce_samples: u32,
    closed_eye_ear: f64,
    streak: u32,
}

impl GazeDetector {
    pub fn new(config: &GazeConfig) -> Self {
        Self {
            offset_threshold: config.offset_threshold,
            debounce_samples: config.debounce_samples,
            closed_eye_ear: config.closed_eye_ear,
            streak: 0,
        }
    }

    /// Current consecutive look-away count
    pub fn streak(&self) -> u32 {
        self.streak
    }
}

impl FrameDetector for GazeDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Gaze
    }

    fn observe(&mut self, frame: &LandmarkFrame) -> Vec<SignalEvent> {
        let Some(face) = frame.primary_face() else {
            return Vec::new();
        };
        let ts = frame.timestamp;
        let mut signals = Vec::new();

        if let Some(offset) = gaze_offset(&face.mesh) {
            if offset.abs() > self.offset_threshold {
                self.streak += 1;
                signals.push(SignalEvent::new(
                    ts,
                    DetectorKind::Gaze,
                    SignalKind::LookAway {
                        offset,
                        streak: self.streak,
                    },
                ));
                if self.streak >= self.debounce_samples {
                    signals.push(SignalEvent::new(
                        ts,
                        DetectorKind::Gaze,
                        SignalKind::PoorEyeContact {
                            streak: self.streak,
                        },
                    ));
                    self.streak = 0;
                }
            } else {
                self.streak = 0;
                signals.push(SignalEvent::new(ts, DetectorKind::Gaze, SignalKind::EyeContact));
            }
        }

        if let Some(ear) = mean_eye_aspect_ratio(&face.mesh) {
            if ear < self.closed_eye_ear {
                signals.push(SignalEvent::new(
                    ts,
                    DetectorKind::Gaze,
                    SignalKind::EyesClosed { ear },
                ));
            }
        }

        signals
    }

    fn reset(&mut self) {
        self.streak = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::fixtures::face_mesh_with;
    use crate::types::DetectedFace;
    use chrono::{TimeZone, Utc};

    fn frame(nose_shift: f64, openness: f64) -> LandmarkFrame {
        LandmarkFrame {
            faces: vec![DetectedFace {
                bounding_box: None,
                mesh: face_mesh_with(nose_shift, openness),
            }],
            ..LandmarkFrame::empty(Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap())
        }
    }

    fn poor_eye_contact_count(signals: &[SignalEvent]) -> usize {
        signals
            .iter()
            .filter(|s| matches!(s.signal, SignalKind::PoorEyeContact { .. }))
            .count()
    }

    #[test]
    fn test_fires_on_tenth_consecutive_sample() {
        let mut detector = GazeDetector::new(&GazeConfig::default());
        let mut signals = Vec::new();
        for _ in 0..9 {
            signals.extend(detector.observe(&frame(0.4, 0.3)));
        }
        assert_eq!(poor_eye_contact_count(&signals), 0);
        assert_eq!(detector.streak(), 9);

        let tenth = detector.observe(&frame(0.4, 0.3));
        assert_eq!(poor_eye_contact_count(&tenth), 1);
        assert_eq!(detector.streak(), 0);
    }

    #[test]
    fn test_interrupted_streak_fires_once() {
        let mut detector = GazeDetector::new(&GazeConfig::default());
        let mut signals = Vec::new();
        for _ in 0..9 {
            signals.extend(detector.observe(&frame(0.4, 0.3)));
        }
        signals.extend(detector.observe(&frame(0.0, 0.3)));
        for _ in 0..10 {
            signals.extend(detector.observe(&frame(-0.4, 0.3)));
        }
        assert_eq!(poor_eye_contact_count(&signals), 1);
    }

    #[test]
    fn test_undetermined_sample_keeps_streak() {
        let mut detector = GazeDetector::new(&GazeConfig::default());
        detector.observe(&frame(0.4, 0.3));
        detector.observe(&frame(0.4, 0.3));

        let partial = LandmarkFrame {
            faces: vec![DetectedFace::default()],
            ..frame(0.0, 0.3)
        };
        assert!(detector.observe(&partial).is_empty());
        assert_eq!(detector.streak(), 2);
    }

    #[test]
    fn test_eye_contact_signal() {
        let mut detector = GazeDetector::new(&GazeConfig::default());
        let signals = detector.observe(&frame(0.1, 0.3));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal, SignalKind::EyeContact);
    }

    #[test]
    fn test_closed_eyes() {
        let mut detector = GazeDetector::new(&GazeConfig::default());
        let signals = detector.observe(&frame(0.0, 0.1));
        assert!(signals
            .iter()
            .any(|s| matches!(s.signal, SignalKind::EyesClosed { .. })));
    }

    #[test]
    fn test_no_face_no_signals() {
        let mut detector = GazeDetector::new(&GazeConfig::default());
        let empty = LandmarkFrame::empty(Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap());
        assert!(detector.observe(&empty).is_empty());
    }
}
