//! Session report builder
//!
//! Freezes the violation log at stop and assembles the final artifact: score, severity
//! breakdown, per-type counts, the external assessment summary and recommendation strings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MonitorResult;
use crate::scorer::{IntegrityScore, SeverityCounts};
use crate::types::{
    BehaviorMetrics, EmotionalState, EscalationState, ExternalAssessment, EyeContactRating, Session,
    SessionState, Violation, ViolationType,
};
use crate::{ENGINE_VERSION, PRODUCER_NAME};

pub const MANUAL_REVIEW: &str = "Interview requires manual review due to multiple integrity violations";
pub const SECONDARY_VERIFICATION: &str =
    "Concerning behavior patterns - secondary verification recommended";
pub const ACCEPTABLE_WITH_MONITORING: &str =
    "Minor integrity concerns detected - acceptable with monitoring";
pub const MINIMAL_CONCERNS: &str = "Good integrity - minimal concerns";

pub const MULTIPLE_PERSONS_CALLOUT: &str = "Multiple persons detected - verify interview authenticity";
pub const TAB_SWITCH_CALLOUT: &str =
    "Excessive tab switching detected - possible external assistance";
pub const PHONE_CALLOUT: &str =
    "Potential phone usage detected - verify compliance with interview rules";

/// Tab switches above this count earn a call-out
const TAB_SWITCH_CALLOUT_THRESHOLD: u64 = 3;

/// Scored violation counts per severity, with unscored records counted apart.
///
/// `high`, `medium` and `low` reproduce the integrity score; `critical` counts the
/// escalation record and `advisories` the `detector_degraded` records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityBreakdown {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub critical: u32,
    pub advisories: u32,
}

impl SeverityBreakdown {
    pub fn from_violations(violations: &[Violation]) -> Self {
        let scored = SeverityCounts::from_violations(violations);
        let advisories = violations
            .iter()
            .filter(|v| v.violation_type == ViolationType::DetectorDegraded)
            .count() as u32;
        Self {
            high: scored.high,
            medium: scored.medium,
            low: scored.low,
            critical: SeverityCounts::tally(violations).critical,
            advisories,
        }
    }
}

/// Merged external assessment history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAssessmentSummary {
    pub samples: usize,
    /// Samples where the neutral default was substituted
    pub fallback_count: usize,
    pub average_attention_score: Option<f64>,
    pub dominant_emotional_state: Option<EmotionalState>,
    pub dominant_eye_contact: Option<EyeContactRating>,
}

impl ExternalAssessmentSummary {
    pub fn from_assessments(assessments: &[ExternalAssessment]) -> Self {
        if assessments.is_empty() {
            return Self::default();
        }
        let total: f64 = assessments.iter().map(|a| a.attention_score).sum();
        Self {
            samples: assessments.len(),
            fallback_count: assessments.iter().filter(|a| a.fallback).count(),
            average_attention_score: Some(total / assessments.len() as f64),
            dominant_emotional_state: most_frequent(assessments.iter().map(|a| a.emotional_state)),
            dominant_eye_contact: most_frequent(assessments.iter().map(|a| a.eye_contact)),
        }
    }
}

/// The final artifact of a monitored session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub producer: String,
    pub engine_version: String,
    pub session_id: String,
    pub subject_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_sec: f64,
    pub integrity_score: u32,
    pub total_violations: usize,
    pub breakdown: SeverityBreakdown,
    pub violations_by_type: BTreeMap<String, u32>,
    pub escalation_state: EscalationState,
    pub session_state: SessionState,
    pub behavior_metrics: BehaviorMetrics,
    pub violations: Vec<Violation>,
    pub external_assessment_summary: ExternalAssessmentSummary,
    pub recommendations: Vec<String>,
    /// Frames dropped before detection because the aggregator was behind
    pub dropped_frames: u64,
}

impl SessionReport {
    pub fn to_json(&self) -> MonitorResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_json_compact(&self) -> MonitorResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Everything the builder needs, borrowed from the aggregator at stop
pub struct ReportInput<'a> {
    pub session: &'a Session,
    pub ended_at: DateTime<Utc>,
    pub metrics: &'a BehaviorMetrics,
    pub violations: &'a [Violation],
    pub assessments: &'a [ExternalAssessment],
    pub escalation_state: EscalationState,
    pub dropped_frames: u64,
}

/// Assemble the final report
pub fn build_report(input: ReportInput<'_>) -> SessionReport {
    let score = IntegrityScore::from_violations(input.violations);

    let mut violations_by_type = BTreeMap::new();
    for v in input.violations {
        *violations_by_type
            .entry(v.violation_type.as_str().to_string())
            .or_insert(0u32) += 1;
    }

    let duration_ms = (input.ended_at - input.session.started_at)
        .num_milliseconds()
        .max(0);

    SessionReport {
        producer: PRODUCER_NAME.to_string(),
        engine_version: ENGINE_VERSION.to_string(),
        session_id: input.session.session_id.clone(),
        subject_id: input.session.subject_id.clone(),
        started_at: input.session.started_at,
        ended_at: input.ended_at,
        duration_sec: duration_ms as f64 / 1000.0,
        integrity_score: score.score,
        total_violations: input.violations.len(),
        breakdown: SeverityBreakdown::from_violations(input.violations),
        violations_by_type,
        escalation_state: input.escalation_state,
        session_state: input.session.state,
        behavior_metrics: input.metrics.clone(),
        violations: input.violations.to_vec(),
        external_assessment_summary: ExternalAssessmentSummary::from_assessments(input.assessments),
        recommendations: recommendations(score.score, input.metrics),
        dropped_frames: input.dropped_frames,
    }
}

/// Recommendation band for a score
pub fn score_band(score: u32) -> &'static str {
    match score {
        0..=49 => MANUAL_REVIEW,
        50..=69 => SECONDARY_VERIFICATION,
        70..=84 => ACCEPTABLE_WITH_MONITORING,
        _ => MINIMAL_CONCERNS,
    }
}

/// Band recommendation plus targeted call-outs
pub fn recommendations(score: u32, metrics: &BehaviorMetrics) -> Vec<String> {
    let mut out = vec![score_band(score).to_string()];
    if metrics.multiple_person_frames > 0 {
        out.push(MULTIPLE_PERSONS_CALLOUT.to_string());
    }
    if metrics.tab_switches > TAB_SWITCH_CALLOUT_THRESHOLD {
        out.push(TAB_SWITCH_CALLOUT.to_string());
    }
    if metrics.phone_proximity_events > 0 {
        out.push(PHONE_CALLOUT.to_string());
    }
    out
}

/// Most frequent value; ties go to the value seen first
fn most_frequent<T: PartialEq + Copy>(values: impl Iterator<Item = T>) -> Option<T> {
    let mut tally: Vec<(T, usize)> = Vec::new();
    for value in values {
        match tally.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => tally.push((value, 1)),
        }
    }
    let best = tally.iter().map(|(_, n)| *n).max()?;
    tally.into_iter().find(|(_, n)| *n == best).map(|(v, _)| v)
}
