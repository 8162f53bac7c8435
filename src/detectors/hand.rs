//! Hand proximity (phone usage) detector
//!
//! Fires `phone_usage` when any hand shows a pinched grip (thumb and index tips close
//! together) held in the upper band of the frame, the coarse "phone held to the ear" pose.
//! One signal per episode; re-armed once no hand matches.

use super::FrameDetector;
use crate::config::HandConfig;
use crate::geometry::{hand_proximity, HandProximity};
use crate::types::{DetectorKind, LandmarkFrame, SignalEvent, SignalKind};

pub struct HandProximityDetector {
    tip_distance: f64,
    upper_band: f64,
    episode_active: bool,
}

impl HandProximityDetector {
    pub fn new(config: &HandConfig) -> Self {
        Self {
            tip_distance: config.tip_distance,
            upper_band: config.upper_band,
            episode_active: false,
        }
    }

    fn is_phone_grip(&self, proximity: &HandProximity) -> bool {
        proximity.tip_distance < self.tip_distance && proximity.tip_height < self.upper_band
    }
}

impl FrameDetector for HandProximityDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::HandProximity
    }

    fn observe(&mut self, frame: &LandmarkFrame) -> Vec<SignalEvent> {
        let grip = frame
            .hands
            .iter()
            .filter_map(|hand| hand_proximity(hand))
            .find(|p| self.is_phone_grip(p));

        match grip {
            Some(proximity) if !self.episode_active => {
                self.episode_active = true;
                vec![SignalEvent::new(
                    frame.timestamp,
                    DetectorKind::HandProximity,
                    SignalKind::PhoneUsage {
                        tip_distance: proximity.tip_distance,
                        tip_height: proximity.tip_height,
                    },
                )]
            }
            Some(_) => Vec::new(),
            None => {
                self.episode_active = false;
                Vec::new()
            }
        }
    }

    fn reset(&mut self) {
        self.episode_active = false;
    }
}
