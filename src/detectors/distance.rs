//! Camera distance detector
//!
//! Uses the primary face's bounding-box area as a distance proxy. Emits
//! `distance_violation` when the area leaves `[min_area, max_area]`, once per excursion.

use super::FrameDetector;
use crate::config::DistanceConfig;
use crate::geometry::face_area;
use crate::types::{DetectorKind, LandmarkFrame, SignalEvent, SignalKind};

pub struct DistanceDetector {
    min_area: f64,
    max_area: f64,
    out_of_band: bool,
}

impl DistanceDetector {
    pub fn new(config: &DistanceConfig) -> Self {
        Self {
            min_area: config.min_area,
            max_area: config.max_area,
            out_of_band: false,
        }
    }
}

impl FrameDetector for DistanceDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Distance
    }

    fn observe(&mut self, frame: &LandmarkFrame) -> Vec<SignalEvent> {
        let Some(area) = frame
            .primary_face()
            .and_then(|f| f.bounding_box.as_ref())
            .and_then(face_area)
        else {
            return Vec::new();
        };

        if (self.min_area..=self.max_area).contains(&area) {
            self.out_of_band = false;
            return Vec::new();
        }
        if self.out_of_band {
            return Vec::new();
        }
        self.out_of_band = true;
        vec![SignalEvent::new(
            frame.timestamp,
            DetectorKind::Distance,
            SignalKind::DistanceViolation { face_area: area },
        )]
    }

    fn reset(&mut self) {
        self.out_of_band = false;
    }
}
