//! Head movement detector
//!
//! Counts frame-to-frame nose displacements above the threshold. When the count exceeds
//! the movement limit it emits `excessive_movement` and starts counting again from zero.

use super::FrameDetector;
use crate::config::HeadConfig;
use crate::geometry::{displacement, head_position};
use crate::types::{DetectorKind, LandmarkFrame, Point, SignalEvent, SignalKind};

pub struct HeadMovementDetector {
    displacement_threshold: f64,
    movement_limit: u32,
    previous: Option<Point>,
    movements: u32,
}

impl HeadMovementDetector {
    pub fn new(config: &HeadConfig) -> Self {
        Self {
            displacement_threshold: config.displacement_threshold,
            movement_limit: config.movement_limit,
            previous: None,
            movements: 0,
        }
    }
}

impl FrameDetector for HeadMovementDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::HeadMovement
    }

    fn observe(&mut self, frame: &LandmarkFrame) -> Vec<SignalEvent> {
        let Some(current) = frame.primary_face().and_then(|f| head_position(&f.mesh)) else {
            return Vec::new();
        };
        let Some(previous) = self.previous.replace(current) else {
            return Vec::new();
        };
        let Some(magnitude) = displacement(&previous, &current) else {
            return Vec::new();
        };
        if magnitude <= self.displacement_threshold {
            return Vec::new();
        }

        let ts = frame.timestamp;
        self.movements += 1;
        let mut signals = vec![SignalEvent::new(
            ts,
            DetectorKind::HeadMovement,
            SignalKind::HeadMovement { magnitude },
        )];

        if self.movements > self.movement_limit {
            signals.push(SignalEvent::new(
                ts,
                DetectorKind::HeadMovement,
                SignalKind::ExcessiveMovement {
                    movements: self.movements,
                },
            ));
            self.movements = 0;
        }
        signals
    }

    fn reset(&mut self) {
        self.previous = None;
        self.movements = 0;
    }
}
