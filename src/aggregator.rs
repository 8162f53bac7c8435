//! Metrics aggregator
//!
//! The single writer of a session's [`BehaviorMetrics`] and violation log. Every signal
//! event goes through [`Aggregator::apply`] in arrival order:
//!
//! 1. update the counters the signal moves
//! 2. ask the rule engine for a verdict
//! 3. append the violation with a metrics snapshot and a session-local id
//! 4. re-score and step the escalation machine
//! 5. publish new violations on the [`ViolationBus`]
//!
//! The aggregator is synchronous; the async monitor wraps it in an actor task and the
//! replay pipeline drives it directly.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::assessment::findings_to_signals;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::report::{build_report, ReportInput, SessionReport};
use crate::rules::{RuleEngine, RuleVerdict};
use crate::scorer::{
    EscalationMachine, EscalationStep, IntegrityScore, SeverityCounts, ESCALATION_DESCRIPTION,
};
use crate::types::{
    BehaviorMetrics, DetectorKind, EscalationState, ExternalAssessment, Session, SessionState,
    Severity, SignalEvent, SignalKind, Violation, ViolationId, ViolationType,
};

/// Default number of violations a lagging subscriber may fall behind
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Live violation stream, fanned out to any number of subscribers
#[derive(Debug, Clone)]
pub struct ViolationBus {
    sender: broadcast::Sender<Violation>,
}

impl Default for ViolationBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl ViolationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Violation> {
        self.sender.subscribe()
    }

    /// Publish a violation (ignored when nobody is listening)
    pub fn publish(&self, violation: &Violation) {
        let _ = self.sender.send(violation.clone());
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Single-owner session state
pub struct Aggregator {
    session: Session,
    metrics: BehaviorMetrics,
    violations: Vec<Violation>,
    assessments: Vec<ExternalAssessment>,
    rules: RuleEngine,
    escalation: EscalationMachine,
    next_id: u64,
    stopped: bool,
    bus: Option<ViolationBus>,
}

impl Aggregator {
    pub fn new(session: Session, config: &MonitorConfig) -> Self {
        Self {
            session,
            metrics: BehaviorMetrics::default(),
            violations: Vec::new(),
            assessments: Vec::new(),
            rules: RuleEngine::new(config),
            escalation: EscalationMachine::new(config.escalation.high_violation_limit),
            next_id: 1,
            stopped: false,
            bus: None,
        }
    }

    /// Publish every recorded violation on `bus`
    pub fn with_bus(mut self, bus: ViolationBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn metrics(&self) -> &BehaviorMetrics {
        &self.metrics
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn assessments(&self) -> &[ExternalAssessment] {
        &self.assessments
    }

    pub fn escalation_state(&self) -> EscalationState {
        self.escalation.state()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Current integrity score, recomputed from the full violation log
    pub fn score(&self) -> u32 {
        IntegrityScore::from_violations(&self.violations).score
    }

    /// Process one signal event, returning the violations it produced
    pub fn apply(&mut self, event: SignalEvent) -> MonitorResult<Vec<Violation>> {
        if self.stopped {
            return Err(MonitorError::SessionStopped(self.session.session_id.clone()));
        }

        self.count(&event.signal);
        debug!(
            session_id = %self.session.session_id,
            source = event.source.as_str(),
            "Applied signal"
        );

        let Some(verdict) = self.rules.evaluate(&event, &self.metrics) else {
            return Ok(Vec::new());
        };

        let mut recorded = Vec::with_capacity(2);
        let violation = self.record(verdict, event.timestamp, event.source);
        let counts = SeverityCounts::from_violations(&self.violations);
        let step = self.escalation.observe(&violation, &counts);
        recorded.push(violation);

        match step {
            EscalationStep::Unchanged => {}
            EscalationStep::Flagged => {
                self.session.state = SessionState::Flagged;
                info!(session_id = %self.session.session_id, "Session flagged");
            }
            EscalationStep::Escalate => {
                self.session.state = SessionState::Escalated;
                info!(
                    session_id = %self.session.session_id,
                    high = counts.high,
                    "Session escalated for manual review"
                );
                recorded.push(self.record(
                    RuleVerdict {
                        violation_type: ViolationType::InterviewEscalation,
                        severity: Severity::Critical,
                        description: ESCALATION_DESCRIPTION.to_string(),
                    },
                    event.timestamp,
                    DetectorKind::Monitor,
                ));
            }
        }

        if let Some(bus) = &self.bus {
            for v in &recorded {
                bus.publish(v);
            }
        }
        Ok(recorded)
    }

    /// Append an external assessment and turn its findings into violations
    pub fn record_assessment(
        &mut self,
        assessment: ExternalAssessment,
    ) -> MonitorResult<Vec<Violation>> {
        if self.stopped {
            return Err(MonitorError::SessionStopped(self.session.session_id.clone()));
        }
        let signals = findings_to_signals(&assessment);
        self.assessments.push(assessment);

        let mut recorded = Vec::new();
        for signal in signals {
            recorded.extend(self.apply(signal)?);
        }
        Ok(recorded)
    }

    /// Mark the session as failed; the report will be salvaged from current state
    pub fn mark_failed(&mut self, reason: &str) {
        warn!(
            session_id = %self.session.session_id,
            reason,
            "Aggregator failed, session pending review"
        );
        self.session.state = SessionState::EscalatedPendingReview;
        self.stopped = true;
    }

    /// Build a report from the current state without stopping
    pub fn report(&self, ended_at: DateTime<Utc>, dropped_frames: u64) -> SessionReport {
        build_report(ReportInput {
            session: &self.session,
            ended_at,
            metrics: &self.metrics,
            violations: &self.violations,
            assessments: &self.assessments,
            escalation_state: self.escalation.state(),
            dropped_frames,
        })
    }

    /// Stop the session and freeze the final report. Further events are rejected.
    pub fn finish(&mut self, ended_at: DateTime<Utc>, dropped_frames: u64) -> SessionReport {
        self.stopped = true;
        self.session.ended_at = Some(ended_at);
        if matches!(self.session.state, SessionState::Normal | SessionState::Flagged) {
            self.session.state = SessionState::Completed;
        }
        info!(
            session_id = %self.session.session_id,
            violations = self.violations.len(),
            score = self.score(),
            "Session finished"
        );
        self.report(ended_at, dropped_frames)
    }

    fn record(
        &mut self,
        verdict: RuleVerdict,
        timestamp: DateTime<Utc>,
        source: DetectorKind,
    ) -> Violation {
        let violation = Violation {
            id: ViolationId(self.next_id),
            violation_type: verdict.violation_type,
            description: verdict.description,
            severity: verdict.severity,
            timestamp,
            source,
            metrics_snapshot: self.metrics.clone(),
        };
        self.next_id += 1;
        warn!(
            session_id = %self.session.session_id,
            id = %violation.id,
            violation = violation.violation_type.as_str(),
            severity = ?violation.severity,
            "Violation recorded"
        );
        self.violations.push(violation.clone());
        violation
    }

    fn count(&mut self, signal: &SignalKind) {
        let m = &mut self.metrics;
        match signal {
            SignalKind::FacePresent { faces } => {
                m.face_detections += 1;
                if *faces > 1 {
                    m.multiple_person_frames += 1;
                }
            }
            SignalKind::EyeContact => m.eye_contact_frames += 1,
            SignalKind::LookAway { streak, .. } => {
                m.look_away_frames += 1;
                m.look_away_streak = m.look_away_streak.max(u64::from(*streak));
            }
            SignalKind::EyesClosed { .. } => m.suspicious_activity_frames += 1,
            SignalKind::HeadMovement { .. } => m.head_movement_events += 1,
            SignalKind::PhoneUsage { .. } => m.phone_proximity_events += 1,
            SignalKind::TabSwitch => m.tab_switches += 1,
            SignalKind::WindowBlur => m.window_blurs += 1,
            SignalKind::WindowResize { .. } => m.window_resizes += 1,
            SignalKind::SuspiciousKeypress { .. } => m.suspicious_keypresses += 1,
            SignalKind::ContextMenu => m.context_menu_requests += 1,
            SignalKind::NoFace { .. }
            | SignalKind::MultiplePersons { .. }
            | SignalKind::PoorEyeContact { .. }
            | SignalKind::ExcessiveMovement { .. }
            | SignalKind::BodyOrientation { .. }
            | SignalKind::DistanceViolation { .. }
            | SignalKind::ExternalFinding { .. }
            | SignalKind::DetectorDegraded { .. } => {}
        }
    }
}
