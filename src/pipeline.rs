//! Synchronous replay pipeline
//!
//! Runs the same detectors and aggregator as the async monitor over an ordered log of
//! session records, one NDJSON line per record. Given the same log and config, the
//! report is identical on every run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregator::Aggregator;
use crate::assessment::{neutral_assessment, parse_assessment};
use crate::config::MonitorConfig;
use crate::detectors::DetectorSet;
use crate::error::{MonitorError, MonitorResult};
use crate::report::SessionReport;
use crate::types::{
    BrowserEvent, ExternalAssessment, LandmarkFrame, Session, SignalEvent, Violation,
};

/// Session id used when a log carries no session header
pub const DEFAULT_SESSION_ID: &str = "replay";
/// Subject id used when a log carries no session header
pub const DEFAULT_SUBJECT_ID: &str = "anonymous";

/// Optional first record of a log, identifying the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub session_id: String,
    pub subject_id: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// A collaborator answer recorded in a log: raw text, or the answer object itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub assessment: Option<serde_json::Value>,
}

impl AssessmentRecord {
    /// Parse the recorded answer, substituting the neutral default when unusable
    pub fn resolve(&self) -> ExternalAssessment {
        let text = match (&self.response, &self.assessment) {
            (Some(text), _) => text.clone(),
            (None, Some(value)) => value.to_string(),
            (None, None) => String::new(),
        };
        parse_assessment(&text, self.timestamp).unwrap_or_else(|e| {
            debug!(error = %e, "Recorded assessment unusable, using neutral default");
            neutral_assessment(self.timestamp)
        })
    }
}

/// One record of a session log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum MonitorInput {
    Session(SessionHeader),
    Frame(LandmarkFrame),
    Browser(BrowserEvent),
    Assessment(AssessmentRecord),
    /// A pre-computed signal, bypassing the detectors
    Signal(SignalEvent),
}

impl MonitorInput {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            MonitorInput::Session(header) => header.started_at,
            MonitorInput::Frame(frame) => Some(frame.timestamp),
            MonitorInput::Browser(event) => Some(event.timestamp),
            MonitorInput::Assessment(record) => Some(record.timestamp),
            MonitorInput::Signal(signal) => Some(signal.timestamp),
        }
    }
}

/// Parse one NDJSON line
pub fn parse_input(line: &str) -> MonitorResult<MonitorInput> {
    serde_json::from_str(line.trim()).map_err(|e| MonitorError::ParseError(e.to_string()))
}

/// Stateful processor for one session log.
///
/// Records must arrive in timestamp order. The aggregator is created from the session
/// header, or from the first timestamped record when there is none.
pub struct IntegrityProcessor {
    config: MonitorConfig,
    detectors: DetectorSet,
    header: Option<SessionHeader>,
    aggregator: Option<Aggregator>,
    last_timestamp: Option<DateTime<Utc>>,
    prevented_events: u64,
}

impl Default for IntegrityProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrityProcessor {
    /// Create a processor with the default configuration
    pub fn new() -> Self {
        Self::build(MonitorConfig::default())
    }

    /// Create a processor with a validated configuration
    pub fn with_config(config: MonitorConfig) -> MonitorResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: MonitorConfig) -> Self {
        Self {
            detectors: DetectorSet::new(&config),
            config,
            header: None,
            aggregator: None,
            last_timestamp: None,
            prevented_events: 0,
        }
    }

    /// Process one record, returning the violations it produced
    pub fn process(&mut self, input: MonitorInput) -> MonitorResult<Vec<Violation>> {
        if let MonitorInput::Session(header) = input {
            if self.aggregator.is_some() || self.header.is_some() {
                return Err(MonitorError::InvalidInput(
                    "session header must be the first record".to_string(),
                ));
            }
            self.header = Some(header);
            return Ok(Vec::new());
        }

        let Some(timestamp) = input.timestamp() else {
            return Ok(Vec::new());
        };
        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                return Err(MonitorError::InvalidInput(format!(
                    "record at {timestamp} is older than the previous record at {last}"
                )));
            }
        }
        self.last_timestamp = Some(timestamp);

        let aggregator = aggregator_for(&mut self.aggregator, &self.header, &self.config, timestamp);
        match input {
            MonitorInput::Frame(frame) => {
                let signals = self.detectors.observe_frame(&frame);
                apply_all(aggregator, signals)
            }
            MonitorInput::Browser(event) => {
                let verdict = self.detectors.observe_browser(&event);
                if verdict.prevent_default {
                    self.prevented_events += 1;
                }
                apply_all(aggregator, verdict.signals)
            }
            MonitorInput::Assessment(record) => aggregator.record_assessment(record.resolve()),
            MonitorInput::Signal(signal) => aggregator.apply(signal),
            MonitorInput::Session(_) => Ok(Vec::new()),
        }
    }

    /// Parse and process one NDJSON line. Blank lines are ignored.
    pub fn process_line(&mut self, line: &str) -> MonitorResult<Vec<Violation>> {
        if line.trim().is_empty() {
            return Ok(Vec::new());
        }
        self.process(parse_input(line)?)
    }

    /// Events whose default action the detectors asked to suppress
    pub fn prevented_events(&self) -> u64 {
        self.prevented_events
    }

    /// Current report without ending the session
    pub fn report(&self) -> Option<SessionReport> {
        let aggregator = self.aggregator.as_ref()?;
        let ended_at = self.last_timestamp.unwrap_or(aggregator.session().started_at);
        Some(aggregator.report(ended_at, 0))
    }

    /// End the session at the last record's timestamp and build the final report
    pub fn finish(&mut self) -> MonitorResult<SessionReport> {
        let ended_at = match (self.last_timestamp, &self.header) {
            (Some(ts), _) => ts,
            (None, Some(SessionHeader {
                started_at: Some(ts),
                ..
            })) => *ts,
            _ => {
                return Err(MonitorError::InvalidInput(
                    "session log contains no timestamped records".to_string(),
                ))
            }
        };
        Ok(aggregator_for(&mut self.aggregator, &self.header, &self.config, ended_at)
            .finish(ended_at, 0))
    }
}

/// The session's aggregator, created on first use
fn aggregator_for<'a>(
    slot: &'a mut Option<Aggregator>,
    header: &Option<SessionHeader>,
    config: &MonitorConfig,
    first_timestamp: DateTime<Utc>,
) -> &'a mut Aggregator {
    slot.get_or_insert_with(|| {
        let session = match header {
            Some(h) => Session::new(
                h.session_id.clone(),
                h.subject_id.clone(),
                h.started_at.unwrap_or(first_timestamp),
            ),
            None => Session::new(
                DEFAULT_SESSION_ID.to_string(),
                DEFAULT_SUBJECT_ID.to_string(),
                first_timestamp,
            ),
        };
        Aggregator::new(session, config)
    })
}

fn apply_all(
    aggregator: &mut Aggregator,
    signals: Vec<SignalEvent>,
) -> MonitorResult<Vec<Violation>> {
    let mut recorded = Vec::new();
    for signal in signals {
        recorded.extend(aggregator.apply(signal)?);
    }
    Ok(recorded)
}

/// Replay a whole NDJSON session log (stateless, one-shot)
pub fn replay_session(ndjson: &str, config: &MonitorConfig) -> MonitorResult<SessionReport> {
    let mut processor = IntegrityProcessor::with_config(config.clone())?;
    for (index, line) in ndjson.lines().enumerate() {
        processor.process_line(line).map_err(|e| match e {
            MonitorError::ParseError(msg) => {
                MonitorError::ParseError(format!("line {}: {msg}", index + 1))
            }
            MonitorError::InvalidInput(msg) => {
                MonitorError::InvalidInput(format!("line {}: {msg}", index + 1))
            }
            other => other,
        })?;
    }
    processor.finish()
}

/// Replay pre-computed signals, bypassing the detectors
pub fn replay_signals(
    signals: impl IntoIterator<Item = SignalEvent>,
    config: &MonitorConfig,
) -> MonitorResult<SessionReport> {
    let mut processor = IntegrityProcessor::with_config(config.clone())?;
    for signal in signals {
        processor.process(MonitorInput::Signal(signal))?;
    }
    processor.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::fixtures::face_mesh_with;
    use crate::report::MINIMAL_CONCERNS;
    use crate::types::{
        BrowserEventKind, DetectedFace, DetectorKind, EscalationState, SignalKind, ViolationType,
    };
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn face_frame(ms: i64, nose_shift: f64) -> MonitorInput {
        MonitorInput::Frame(LandmarkFrame {
            faces: vec![DetectedFace {
                bounding_box: None,
                mesh: face_mesh_with(nose_shift, 0.3),
            }],
            ..LandmarkFrame::empty(at(ms))
        })
    }

    fn to_ndjson(records: &[MonitorInput]) -> String {
        records
            .iter()
            .map(|r| serde_json::to_string(r).unwrap())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn count(report: &SessionReport, violation_type: ViolationType) -> usize {
        report
            .violations
            .iter()
            .filter(|v| v.violation_type == violation_type)
            .count()
    }

    #[test]
    fn test_gaze_debounce_scenario() {
        // 9 look-away samples, 1 eye contact, 10 look-away samples
        let mut records = Vec::new();
        let mut ms = 0;
        for _ in 0..9 {
            records.push(face_frame(ms, 0.4));
            ms += 100;
        }
        records.push(face_frame(ms, 0.0));
        ms += 100;
        for _ in 0..10 {
            records.push(face_frame(ms, 0.4));
            ms += 100;
        }

        let report = replay_session(&to_ndjson(&records), &MonitorConfig::default()).unwrap();
        assert_eq!(count(&report, ViolationType::PoorEyeContact), 1);
        assert_eq!(report.behavior_metrics.look_away_frames, 19);
        assert_eq!(report.behavior_metrics.eye_contact_frames, 1);
        assert_eq!(report.behavior_metrics.look_away_streak, 10);
        assert_eq!(report.behavior_metrics.face_detections, 20);
    }

    #[test]
    fn test_zero_violation_session() {
        let records: Vec<MonitorInput> = (0..5).map(|i| face_frame(i * 100, 0.0)).collect();
        let report = replay_session(&to_ndjson(&records), &MonitorConfig::default()).unwrap();
        assert_eq!(report.integrity_score, 100);
        assert_eq!(report.escalation_state, EscalationState::Normal);
        assert_eq!(report.recommendations, vec![MINIMAL_CONCERNS.to_string()]);
        assert_eq!(report.session_id, DEFAULT_SESSION_ID);
        assert_eq!(report.started_at, at(0));
        assert_eq!(report.ended_at, at(400));
    }

    #[test]
    fn test_replay_is_deterministic() {
        let mut records = vec![MonitorInput::Session(SessionHeader {
            session_id: "s-42".to_string(),
            subject_id: "cand-9".to_string(),
            started_at: Some(at(0)),
        })];
        records.push(face_frame(0, 0.0));
        records.push(MonitorInput::Browser(BrowserEvent::new(
            at(100),
            BrowserEventKind::WindowBlur,
        )));
        records.push(MonitorInput::Frame(LandmarkFrame::empty(at(200))));
        records.push(MonitorInput::Frame(LandmarkFrame::empty(at(4000))));
        records.push(MonitorInput::Browser(BrowserEvent::new(
            at(4100),
            BrowserEventKind::KeyDown {
                key: "F12".to_string(),
                ctrl: false,
                alt: false,
                shift: false,
                meta: false,
            },
        )));
        let log = to_ndjson(&records);

        let first = replay_session(&log, &MonitorConfig::default()).unwrap();
        let second = replay_session(&log, &MonitorConfig::default()).unwrap();
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
        assert_eq!(first.session_id, "s-42");
        assert_eq!(count(&first, ViolationType::WindowBlur), 1);
        assert_eq!(count(&first, ViolationType::NoFace), 1);
        assert_eq!(count(&first, ViolationType::SuspiciousKeypress), 1);
    }

    #[test]
    fn test_escalation_once_via_signals() {
        let signals = (0..4).map(|i| {
            SignalEvent::new(at(i * 1000), DetectorKind::BrowserFocus, SignalKind::TabSwitch)
        });
        let report = replay_signals(signals, &MonitorConfig::default()).unwrap();
        assert_eq!(count(&report, ViolationType::InterviewEscalation), 1);
        assert_eq!(report.breakdown.high, 4);
        assert_eq!(report.breakdown.critical, 1);
        assert_eq!(report.integrity_score, 20);
        assert_eq!(report.recommendations.len(), 2);
    }

    #[test]
    fn test_assessment_records() {
        let mut processor = IntegrityProcessor::new();
        let raw = MonitorInput::Assessment(AssessmentRecord {
            timestamp: at(0),
            response: Some("not json at all".to_string()),
            assessment: None,
        });
        assert!(processor.process(raw).unwrap().is_empty());

        let object = MonitorInput::Assessment(AssessmentRecord {
            timestamp: at(1000),
            response: None,
            assessment: Some(serde_json::json!({
                "attentionScore": 40,
                "violations": ["reading from notes"]
            })),
        });
        let violations = processor.process(object).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].violation_type, ViolationType::ExternalFinding);
        assert_eq!(violations[0].severity, crate::types::Severity::Medium);

        let report = processor.finish().unwrap();
        assert_eq!(report.external_assessment_summary.samples, 2);
        assert_eq!(report.external_assessment_summary.fallback_count, 1);
        assert_eq!(
            report.external_assessment_summary.average_attention_score,
            Some(57.5)
        );
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut processor = IntegrityProcessor::new();
        processor.process(face_frame(1000, 0.0)).unwrap();
        let result = processor.process(face_frame(500, 0.0));
        assert!(matches!(result, Err(MonitorError::InvalidInput(_))));
    }

    #[test]
    fn test_prevent_default_counted() {
        let mut processor = IntegrityProcessor::new();
        processor
            .process(MonitorInput::Browser(BrowserEvent::new(
                at(0),
                BrowserEventKind::ContextMenu,
            )))
            .unwrap();
        assert_eq!(processor.prevented_events(), 1);
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        let log = format!(
            "{}\n\n{{\"record\": \"nonsense\"}}",
            serde_json::to_string(&face_frame(0, 0.0)).unwrap()
        );
        match replay_session(&log, &MonitorConfig::default()) {
            Err(MonitorError::ParseError(msg)) => assert!(msg.starts_with("line 3")),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_empty_log_is_invalid() {
        assert!(matches!(
            replay_session("", &MonitorConfig::default()),
            Err(MonitorError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_record_wire_format() {
        let line = r#"{"record":"browser","timestamp":"2024-01-15T14:00:00Z","kind":{"type":"key_down","key":"u","ctrl":true}}"#;
        match parse_input(line).unwrap() {
            MonitorInput::Browser(event) => assert_eq!(
                event.kind,
                BrowserEventKind::KeyDown {
                    key: "u".to_string(),
                    ctrl: true,
                    alt: false,
                    shift: false,
                    meta: false,
                }
            ),
            other => panic!("unexpected record {other:?}"),
        }
    }
}
