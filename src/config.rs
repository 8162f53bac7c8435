//! Monitoring configuration
//!
//! All thresholds, debounce windows, intervals and channel capacities live here.
//! Every field has a default, so a partial JSON document (or `{}`) is a valid config.

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, MonitorResult};

/// Person presence thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Consecutive absence required before `no_face` fires (ms)
    pub grace_ms: i64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self { grace_ms: 3000 }
    }
}

/// Gaze and eye thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    /// Absolute gaze offset above which a sample counts as looking away
    pub offset_threshold: f64,
    /// Consecutive look-away samples that fire `poor_eye_contact`
    pub debounce_samples: u32,
    /// Average eye aspect ratio under which the eyes count as closed
    pub closed_eye_ear: f64,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            offset_threshold: 0.3,
            debounce_samples: 10,
            closed_eye_ear: 0.2,
        }
    }
}

/// Head movement thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadConfig {
    /// Nose displacement between frames that counts as a movement
    pub displacement_threshold: f64,
    /// Movements tolerated before `excessive_movement` fires
    pub movement_limit: u32,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            displacement_threshold: 0.1,
            movement_limit: 50,
        }
    }
}

/// Hand / phone proximity heuristic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandConfig {
    /// Maximum thumb-to-index tip distance for a grip
    pub tip_distance: f64,
    /// Index tip must sit above this normalized height (upper frame band)
    pub upper_band: f64,
}

impl Default for HandConfig {
    fn default() -> Self {
        Self {
            tip_distance: 0.1,
            upper_band: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    /// Vertical shoulder offset above which the body counts as turned
    pub shoulder_tilt: f64,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self { shoulder_tilt: 0.1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceConfig {
    /// Smallest acceptable normalized face area (too far below this)
    pub min_area: f64,
    /// Largest acceptable normalized face area (too close above this)
    pub max_area: f64,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            min_area: 0.05,
            max_area: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Resize events closer together than this collapse into one
    pub resize_debounce_ms: i64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            resize_debounce_ms: 300,
        }
    }
}

/// External assessment cadence and failure budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    /// Seconds between scheduled submissions (10-30)
    pub interval_secs: u64,
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Delay before the single retry
    pub retry_backoff_ms: u64,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            timeout_ms: 10_000,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// High severity violations that escalate the session
    pub high_violation_limit: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            high_violation_limit: 3,
        }
    }
}

/// Aggregator inbound channel sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Frame batches buffered before new frames are dropped
    pub frame_capacity: usize,
    /// Priority (never dropped) message buffer
    pub priority_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            frame_capacity: 64,
            priority_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Restarts granted to a failing detector before it is disabled
    pub max_restarts: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { max_restarts: 1 }
    }
}

/// Complete monitoring configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub presence: PresenceConfig,
    pub gaze: GazeConfig,
    pub head: HeadConfig,
    pub hand: HandConfig,
    pub pose: PoseConfig,
    pub distance: DistanceConfig,
    pub browser: BrowserConfig,
    pub assessment: AssessmentConfig,
    pub escalation: EscalationConfig,
    pub channels: ChannelConfig,
    pub detectors: DetectorConfig,
}

impl MonitorConfig {
    /// Parse and validate a JSON config document
    pub fn from_json(json: &str) -> MonitorResult<Self> {
        let config: MonitorConfig = serde_json::from_str(json)
            .map_err(|e| MonitorError::InvalidConfig(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> MonitorResult<String> {
        serde_json::to_string_pretty(self).map_err(MonitorError::JsonError)
    }

    /// Check that every threshold is usable
    pub fn validate(&self) -> MonitorResult<()> {
        check_positive("gaze.offset_threshold", self.gaze.offset_threshold)?;
        check_positive("gaze.closed_eye_ear", self.gaze.closed_eye_ear)?;
        check_positive("head.displacement_threshold", self.head.displacement_threshold)?;
        check_positive("hand.tip_distance", self.hand.tip_distance)?;
        check_positive("hand.upper_band", self.hand.upper_band)?;
        check_positive("pose.shoulder_tilt", self.pose.shoulder_tilt)?;
        check_positive("distance.min_area", self.distance.min_area)?;
        check_positive("distance.max_area", self.distance.max_area)?;

        if self.distance.min_area >= self.distance.max_area {
            return Err(MonitorError::InvalidConfig(format!(
                "distance.min_area ({}) must be below distance.max_area ({})",
                self.distance.min_area, self.distance.max_area
            )));
        }
        if self.presence.grace_ms < 0 {
            return Err(MonitorError::InvalidConfig(
                "presence.grace_ms must not be negative".to_string(),
            ));
        }
        if self.browser.resize_debounce_ms < 0 {
            return Err(MonitorError::InvalidConfig(
                "browser.resize_debounce_ms must not be negative".to_string(),
            ));
        }
        if self.gaze.debounce_samples == 0 {
            return Err(MonitorError::InvalidConfig(
                "gaze.debounce_samples must be at least 1".to_string(),
            ));
        }
        if self.escalation.high_violation_limit == 0 {
            return Err(MonitorError::InvalidConfig(
                "escalation.high_violation_limit must be at least 1".to_string(),
            ));
        }
        if !(10..=30).contains(&self.assessment.interval_secs) {
            return Err(MonitorError::InvalidConfig(format!(
                "assessment.interval_secs must be within 10-30, got {}",
                self.assessment.interval_secs
            )));
        }
        if self.assessment.timeout_ms == 0 {
            return Err(MonitorError::InvalidConfig(
                "assessment.timeout_ms must be positive".to_string(),
            ));
        }
        if self.channels.frame_capacity == 0 || self.channels.priority_capacity == 0 {
            return Err(MonitorError::InvalidConfig(
                "channel capacities must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_positive(name: &str, value: f64) -> MonitorResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(MonitorError::InvalidConfig(format!(
            "{name} must be a positive number, got {value}"
        )))
    }
}
