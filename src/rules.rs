//! Violation rule engine
//!
//! Maps a signal event plus the current metrics to an optional violation verdict.
//! The engine holds only immutable thresholds; given identical inputs it always
//! returns the identical verdict.

use crate::config::MonitorConfig;
use crate::types::{BehaviorMetrics, Severity, SignalEvent, SignalKind, ViolationType};

/// A rule engine decision, before the aggregator assigns an id and snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct RuleVerdict {
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub description: String,
}

impl RuleVerdict {
    fn standard(violation_type: ViolationType, description: impl Into<String>) -> Self {
        Self {
            violation_type,
            severity: violation_type.default_severity(),
            description: description.into(),
        }
    }
}

/// Threshold policy for turning candidate signals into violations
#[derive(Debug, Clone)]
pub struct RuleEngine {
    grace_ms: i64,
    debounce_samples: u32,
    movement_limit: u32,
    tip_distance: f64,
    upper_band: f64,
    shoulder_tilt: f64,
    min_area: f64,
    max_area: f64,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(&MonitorConfig::default())
    }
}

impl RuleEngine {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            grace_ms: config.presence.grace_ms,
            debounce_samples: config.gaze.debounce_samples,
            movement_limit: config.head.movement_limit,
            tip_distance: config.hand.tip_distance,
            upper_band: config.hand.upper_band,
            shoulder_tilt: config.pose.shoulder_tilt,
            min_area: config.distance.min_area,
            max_area: config.distance.max_area,
        }
    }

    /// Decide whether `event` constitutes a violation.
    ///
    /// `metrics` are the counters *after* the event was counted. Observation signals
    /// never produce a verdict; candidate signals that do not meet the configured
    /// thresholds are discarded.
    pub fn evaluate(&self, event: &SignalEvent, metrics: &BehaviorMetrics) -> Option<RuleVerdict> {
        match &event.signal {
            SignalKind::FacePresent { .. }
            | SignalKind::EyeContact
            | SignalKind::LookAway { .. }
            | SignalKind::EyesClosed { .. }
            | SignalKind::HeadMovement { .. } => None,

            SignalKind::NoFace { missing_for_ms } => (*missing_for_ms >= self.grace_ms).then(|| {
                RuleVerdict::standard(
                    ViolationType::NoFace,
                    format!(
                        "Face not visible for {:.1}s",
                        *missing_for_ms as f64 / 1000.0
                    ),
                )
            }),

            SignalKind::MultiplePersons { faces } => (*faces > 1).then(|| {
                RuleVerdict::standard(
                    ViolationType::MultiplePersons,
                    format!("Multiple persons detected in frame ({faces} faces)"),
                )
            }),

            SignalKind::PoorEyeContact { streak } => (*streak >= self.debounce_samples).then(|| {
                RuleVerdict::standard(
                    ViolationType::PoorEyeContact,
                    format!("Consistently looking away from camera ({streak} consecutive samples)"),
                )
            }),

            SignalKind::ExcessiveMovement { movements } => (*movements > self.movement_limit
                && metrics.head_movement_events > u64::from(self.movement_limit))
            .then(|| {
                RuleVerdict::standard(
                    ViolationType::ExcessiveMovement,
                    format!(
                        "Excessive head movement detected ({} movements this session)",
                        metrics.head_movement_events
                    ),
                )
            }),

            SignalKind::PhoneUsage {
                tip_distance,
                tip_height,
            } => (*tip_distance < self.tip_distance && *tip_height < self.upper_band).then(|| {
                RuleVerdict::standard(ViolationType::PhoneUsage, "Possible phone usage detected")
            }),

            SignalKind::BodyOrientation { shoulder_tilt } => (*shoulder_tilt > self.shoulder_tilt)
                .then(|| {
                    RuleVerdict::standard(
                        ViolationType::BodyOrientation,
                        "Not facing the camera properly",
                    )
                }),

            SignalKind::DistanceViolation { face_area } => {
                if *face_area < self.min_area {
                    Some(RuleVerdict::standard(
                        ViolationType::DistanceViolation,
                        "Too far from camera",
                    ))
                } else if *face_area > self.max_area {
                    Some(RuleVerdict::standard(
                        ViolationType::DistanceViolation,
                        "Too close to camera",
                    ))
                } else {
                    None
                }
            }

            SignalKind::TabSwitch => Some(RuleVerdict::standard(
                ViolationType::TabSwitch,
                format!(
                    "User switched away from interview tab (switch #{})",
                    metrics.tab_switches
                ),
            )),

            SignalKind::WindowBlur => Some(RuleVerdict::standard(
                ViolationType::WindowBlur,
                "Window lost focus during interview",
            )),

            SignalKind::WindowResize { width, height } => Some(RuleVerdict::standard(
                ViolationType::WindowResize,
                format!("Window resized during interview ({width}x{height})"),
            )),

            SignalKind::SuspiciousKeypress { combo } => Some(RuleVerdict::standard(
                ViolationType::SuspiciousKeypress,
                format!("Suspicious key combination: {combo}"),
            )),

            SignalKind::ContextMenu => Some(RuleVerdict::standard(
                ViolationType::ContextMenu,
                "Right-click detected during interview",
            )),

            SignalKind::ExternalFinding {
                finding_type,
                description,
                severity,
            } => {
                let violation_type =
                    ViolationType::from_name(finding_type).unwrap_or(ViolationType::ExternalFinding);
                Some(RuleVerdict {
                    violation_type,
                    // Escalation is reserved for the scorer
                    severity: (*severity).min(Severity::High),
                    description: format!("External assessment: {description}"),
                })
            }

            SignalKind::DetectorDegraded { detector, reason } => Some(RuleVerdict::standard(
                ViolationType::DetectorDegraded,
                format!("Detector {} degraded: {reason}", detector.as_str()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DetectorKind;
    use chrono::{TimeZone, Utc};

    fn event(signal: SignalKind) -> SignalEvent {
        SignalEvent::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap(),
            DetectorKind::Monitor,
            signal,
        )
    }

    fn verdict(signal: SignalKind) -> Option<RuleVerdict> {
        RuleEngine::default().evaluate(&event(signal), &BehaviorMetrics::default())
    }

    #[test]
    fn test_observations_never_violate() {
        assert!(verdict(SignalKind::EyeContact).is_none());
        assert!(verdict(SignalKind::FacePresent { faces: 1 }).is_none());
        assert!(verdict(SignalKind::LookAway {
            offset: 0.5,
            streak: 3
        })
        .is_none());
        assert!(verdict(SignalKind::HeadMovement { magnitude: 0.4 }).is_none());
        assert!(verdict(SignalKind::EyesClosed { ear: 0.1 }).is_none());
    }

    #[test]
    fn test_severity_follows_table() {
        let cases = [
            (SignalKind::TabSwitch, Severity::High),
            (SignalKind::MultiplePersons { faces: 2 }, Severity::High),
            (
                SignalKind::SuspiciousKeypress {
                    combo: "F12".to_string(),
                },
                Severity::High,
            ),
            (SignalKind::WindowBlur, Severity::Medium),
            (SignalKind::ContextMenu, Severity::Medium),
            (
                SignalKind::NoFace {
                    missing_for_ms: 3000,
                },
                Severity::Medium,
            ),
            (SignalKind::PoorEyeContact { streak: 10 }, Severity::Medium),
            (
                SignalKind::WindowResize {
                    width: 800,
                    height: 600,
                },
                Severity::Low,
            ),
            (
                SignalKind::BodyOrientation {
                    shoulder_tilt: 0.2,
                },
                Severity::Low,
            ),
            (SignalKind::DistanceViolation { face_area: 0.01 }, Severity::Low),
        ];
        for (signal, expected) in cases {
            let v = verdict(signal.clone()).unwrap_or_else(|| panic!("{signal:?} produced nothing"));
            assert_eq!(v.severity, expected, "{signal:?}");
        }
    }

    #[test]
    fn test_below_threshold_candidates_discarded() {
        assert!(verdict(SignalKind::NoFace {
            missing_for_ms: 1000
        })
        .is_none());
        assert!(verdict(SignalKind::PoorEyeContact { streak: 4 }).is_none());
        assert!(verdict(SignalKind::DistanceViolation { face_area: 0.2 }).is_none());
        assert!(verdict(SignalKind::BodyOrientation {
            shoulder_tilt: 0.05
        })
        .is_none());
        assert!(verdict(SignalKind::PhoneUsage {
            tip_distance: 0.3,
            tip_height: 0.1
        })
        .is_none());
        assert!(verdict(SignalKind::MultiplePersons { faces: 1 }).is_none());
    }

    #[test]
    fn test_excessive_movement_checks_metrics() {
        let engine = RuleEngine::default();
        let signal = event(SignalKind::ExcessiveMovement { movements: 51 });

        assert!(engine.evaluate(&signal, &BehaviorMetrics::default()).is_none());

        let metrics = BehaviorMetrics {
            head_movement_events: 51,
            ..Default::default()
        };
        let v = engine.evaluate(&signal, &metrics).unwrap();
        assert_eq!(v.violation_type, ViolationType::ExcessiveMovement);
        assert!(v.description.contains("51"));
    }

    #[test]
    fn test_distance_descriptions() {
        assert_eq!(
            verdict(SignalKind::DistanceViolation { face_area: 0.01 })
                .unwrap()
                .description,
            "Too far from camera"
        );
        assert_eq!(
            verdict(SignalKind::DistanceViolation { face_area: 0.7 })
                .unwrap()
                .description,
            "Too close to camera"
        );
    }

    #[test]
    fn test_external_finding_mapping() {
        let mapped = verdict(SignalKind::ExternalFinding {
            finding_type: "multiple people".to_string(),
            description: "second person visible".to_string(),
            severity: Severity::High,
        })
        .unwrap();
        assert_eq!(mapped.violation_type, ViolationType::MultiplePersons);
        assert_eq!(mapped.severity, Severity::High);

        let generic = verdict(SignalKind::ExternalFinding {
            finding_type: "reading notes".to_string(),
            description: "eyes tracking off-screen text".to_string(),
            severity: Severity::Critical,
        })
        .unwrap();
        assert_eq!(generic.violation_type, ViolationType::ExternalFinding);
        assert_eq!(generic.severity, Severity::High);
    }

    #[test]
    fn test_idempotent() {
        let engine = RuleEngine::default();
        let metrics = BehaviorMetrics {
            tab_switches: 2,
            ..Default::default()
        };
        let e = event(SignalKind::TabSwitch);
        assert_eq!(engine.evaluate(&e, &metrics), engine.evaluate(&e, &metrics));
    }
}
