//! Integrity scoring and escalation
//!
//! The score is a pure function of the scored violation counts:
//!
//! ```text
//! score = max(0, 100 - 20 * high - 10 * medium - 5 * low)
//! ```
//!
//! Escalation is a monotonic state machine: `Normal -> Flagged -> Escalated`. The
//! transition to `Escalated` happens at most once per session and is recorded as a
//! single critical `interview_escalation` violation.

use serde::{Deserialize, Serialize};

use crate::types::{EscalationState, Severity, Violation};

pub const HIGH_PENALTY: u32 = 20;
pub const MEDIUM_PENALTY: u32 = 10;
pub const LOW_PENALTY: u32 = 5;

pub const ESCALATION_DESCRIPTION: &str =
    "Interview flagged for manual review due to multiple violations";

/// Count of scored violations per severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub critical: u32,
}

impl SeverityCounts {
    /// Tally severities over every violation, scored or not
    pub fn tally<'a>(violations: impl IntoIterator<Item = &'a Violation>) -> Self {
        let mut counts = Self::default();
        for v in violations {
            counts.add(v.severity);
        }
        counts
    }

    /// Tally only violations that count toward the score
    pub fn from_violations<'a>(violations: impl IntoIterator<Item = &'a Violation>) -> Self {
        Self::tally(
            violations
                .into_iter()
                .filter(|v| v.violation_type.is_scored()),
        )
    }

    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Critical => self.critical += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.high + self.medium + self.low + self.critical
    }
}

/// Compute the integrity score (0-100)
pub fn integrity_score(counts: &SeverityCounts) -> u32 {
    let penalty = counts
        .high
        .saturating_mul(HIGH_PENALTY)
        .saturating_add(counts.medium.saturating_mul(MEDIUM_PENALTY))
        .saturating_add(counts.low.saturating_mul(LOW_PENALTY));
    100u32.saturating_sub(penalty)
}

/// Score plus the counts it was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityScore {
    pub score: u32,
    pub counts: SeverityCounts,
}

impl IntegrityScore {
    pub fn from_violations<'a>(violations: impl IntoIterator<Item = &'a Violation>) -> Self {
        let counts = SeverityCounts::from_violations(violations);
        Self {
            score: integrity_score(&counts),
            counts,
        }
    }
}

/// What the escalation machine decided after a new violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationStep {
    /// No state change
    Unchanged,
    /// Moved from normal to flagged
    Flagged,
    /// Moved to escalated; the caller must record one `interview_escalation`
    Escalate,
}

/// Monotonic escalation state machine
#[derive(Debug, Clone)]
pub struct EscalationMachine {
    state: EscalationState,
    high_limit: u32,
}

impl EscalationMachine {
    pub fn new(high_limit: u32) -> Self {
        Self {
            state: EscalationState::Normal,
            high_limit,
        }
    }

    pub fn state(&self) -> EscalationState {
        self.state
    }

    /// Feed a newly recorded violation and the scored counts including it
    pub fn observe(&mut self, violation: &Violation, counts: &SeverityCounts) -> EscalationStep {
        if !violation.violation_type.is_scored() {
            return EscalationStep::Unchanged;
        }

        if violation.severity == Severity::High
            && counts.high >= self.high_limit
            && self.state < EscalationState::Escalated
        {
            self.state = EscalationState::Escalated;
            return EscalationStep::Escalate;
        }

        if self.state == EscalationState::Normal {
            self.state = EscalationState::Flagged;
            return EscalationStep::Flagged;
        }

        EscalationStep::Unchanged
    }
}
