//! Body orientation detector

use super::FrameDetector;
use crate::config::PoseConfig;
use crate::geometry::shoulder_tilt;
use crate::types::{DetectorKind, LandmarkFrame, SignalEvent, SignalKind};

/// Emits `body_orientation` when the shoulder line tilts past the threshold
pub struct PoseOrientationDetector {
    shoulder_tilt: f64,
    tilted: bool,
}

impl PoseOrientationDetector {
    pub fn new(config: &PoseConfig) -> Self {
        Self {
            shoulder_tilt: config.shoulder_tilt,
            tilted: false,
        }
    }
}

impl FrameDetector for PoseOrientationDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::PoseOrientation
    }

    fn observe(&mut self, frame: &LandmarkFrame) -> Vec<SignalEvent> {
        let Some(tilt) = frame.pose.as_deref().and_then(shoulder_tilt) else {
            return Vec::new();
        };

        if tilt <= self.shoulder_tilt {
            self.tilted = false;
            return Vec::new();
        }
        if self.tilted {
            return Vec::new();
        }
        self.tilted = true;
        vec![SignalEvent::new(
            frame.timestamp,
            DetectorKind::PoseOrientation,
            SignalKind::BodyOrientation {
                shoulder_tilt: tilt,
            },
        )]
    }

    fn reset(&mut self) {
        self.tilted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::fixtures::pose_with;
    use chrono::{TimeZone, Utc};

    fn frame(left_y: f64, right_y: f64) -> LandmarkFrame {
        LandmarkFrame {
            pose: Some(pose_with(left_y, right_y)),
            ..LandmarkFrame::empty(Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap())
        }
    }

    #[test]
    fn test_level_shoulders() {
        let mut detector = PoseOrientationDetector::new(&PoseConfig::default());
        assert!(detector.observe(&frame(0.6, 0.58)).is_empty());
    }

    #[test]
    fn test_tilt_fires_on_rising_edge() {
        let mut detector = PoseOrientationDetector::new(&PoseConfig::default());
        let fired = detector.observe(&frame(0.7, 0.5));
        assert_eq!(fired.len(), 1);
        assert!(detector.observe(&frame(0.7, 0.5)).is_empty());
        detector.observe(&frame(0.6, 0.6));
        assert_eq!(detector.observe(&frame(0.5, 0.7)).len(), 1);
    }

    #[test]
    fn test_missing_pose() {
        let mut detector = PoseOrientationDetector::new(&PoseConfig::default());
        let empty = LandmarkFrame::empty(Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap());
        assert!(detector.observe(&empty).is_empty());
    }
}
