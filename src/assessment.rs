//! External assessment collector
//!
//! Periodically hands a representative frame to an external vision assessor and turns
//! its free-text answer into an [`ExternalAssessment`]. Anything that goes wrong
//! (transport error, timeout, unparseable answer) degrades to a neutral default so the
//! session is never failed by the collaborator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::config::AssessmentConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::types::{
    BackgroundQuality, BodyLanguage, DetectorKind, EmotionalState, ExternalAssessment,
    ExternalFinding, EyeContactRating, LandmarkFrame, Level, OverallAssessment, QualityRating,
    Severity, SignalEvent, SignalKind, TechnicalQuality,
};

const NEUTRAL_ATTENTION: f64 = 75.0;
const NEUTRAL_RECOMMENDATION: &str = "Continue with natural behavior";

/// The frame submitted for assessment
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot {
    pub captured_at: DateTime<Utc>,
    /// Landmarks of the most recent frame, if any frame has been seen yet
    pub landmarks: Option<LandmarkFrame>,
}

impl FrameSnapshot {
    pub fn new(captured_at: DateTime<Utc>, landmarks: Option<LandmarkFrame>) -> Self {
        Self {
            captured_at,
            landmarks,
        }
    }
}

/// An external vision-assessment collaborator.
///
/// Implementations capture or encode the image for the snapshot, call the model and
/// return its raw answer. Parsing is done by the collector.
#[async_trait]
pub trait VisionAssessor: Send + Sync {
    async fn assess(&self, snapshot: &FrameSnapshot) -> MonitorResult<String>;
}

/// The neutral judgment substituted when the collaborator's answer is unusable
pub fn neutral_assessment(timestamp: DateTime<Utc>) -> ExternalAssessment {
    ExternalAssessment {
        timestamp,
        attention_score: NEUTRAL_ATTENTION,
        engagement_level: Level::Medium,
        emotional_state: EmotionalState::Neutral,
        confidence_level: Level::Medium,
        eye_contact: EyeContactRating::Average,
        body_language: BodyLanguage::Neutral,
        suspicious_activities: Vec::new(),
        technical_quality: TechnicalQuality {
            lighting: QualityRating::Average,
            camera_angle: QualityRating::Average,
            background_quality: BackgroundQuality::Acceptable,
        },
        overall_assessment: OverallAssessment::Acceptable,
        recommendations: vec![NEUTRAL_RECOMMENDATION.to_string()],
        violations: Vec::new(),
        fallback: true,
    }
}

// Wire format of the collaborator's answer. Missing fields take neutral values.

fn neutral_attention() -> f64 {
    NEUTRAL_ATTENTION
}

fn medium() -> Level {
    Level::Medium
}

fn neutral_emotion() -> EmotionalState {
    EmotionalState::Neutral
}

fn average_eye_contact() -> EyeContactRating {
    EyeContactRating::Average
}

fn neutral_body() -> BodyLanguage {
    BodyLanguage::Neutral
}

fn average_quality() -> QualityRating {
    QualityRating::Average
}

fn acceptable_background() -> BackgroundQuality {
    BackgroundQuality::Acceptable
}

fn acceptable_overall() -> OverallAssessment {
    OverallAssessment::Acceptable
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssessmentResponse {
    #[serde(default = "neutral_attention")]
    attention_score: f64,
    #[serde(default = "medium")]
    engagement_level: Level,
    #[serde(default = "neutral_emotion")]
    emotional_state: EmotionalState,
    #[serde(default = "medium")]
    confidence_level: Level,
    #[serde(default = "average_eye_contact")]
    eye_contact: EyeContactRating,
    #[serde(default = "neutral_body")]
    body_language: BodyLanguage,
    #[serde(default)]
    suspicious_activities: Vec<String>,
    #[serde(default)]
    technical_quality: TechnicalQualityResponse,
    #[serde(default = "acceptable_overall")]
    overall_assessment: OverallAssessment,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    violations: Vec<FindingResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TechnicalQualityResponse {
    #[serde(default = "average_quality")]
    lighting: QualityRating,
    #[serde(default = "average_quality")]
    camera_angle: QualityRating,
    #[serde(default = "acceptable_background")]
    background_quality: BackgroundQuality,
}

impl Default for TechnicalQualityResponse {
    fn default() -> Self {
        Self {
            lighting: QualityRating::Average,
            camera_angle: QualityRating::Average,
            background_quality: BackgroundQuality::Acceptable,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FindingResponse {
    Text(String),
    Detailed {
        #[serde(rename = "type", default)]
        finding_type: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        severity: Option<String>,
    },
}

impl FindingResponse {
    fn into_finding(self) -> ExternalFinding {
        match self {
            FindingResponse::Text(text) => ExternalFinding {
                finding_type: text.clone(),
                description: text,
                severity: Severity::Medium,
            },
            FindingResponse::Detailed {
                finding_type,
                description,
                severity,
            } => {
                let finding_type = finding_type.unwrap_or_else(|| "unspecified".to_string());
                ExternalFinding {
                    description: description.unwrap_or_else(|| finding_type.clone()),
                    finding_type,
                    severity: severity
                        .as_deref()
                        .and_then(Severity::from_label)
                        .unwrap_or(Severity::Medium),
                }
            }
        }
    }
}

/// Locate the JSON object in a free-text answer (first `{` to last `}`)
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a collaborator answer into an assessment stamped with `timestamp`
pub fn parse_assessment(text: &str, timestamp: DateTime<Utc>) -> MonitorResult<ExternalAssessment> {
    let json = extract_json_object(text)
        .ok_or_else(|| MonitorError::ParseError("no JSON object in assessment response".to_string()))?;
    let response: AssessmentResponse = serde_json::from_str(json)?;

    let attention_score = if response.attention_score.is_finite() {
        response.attention_score.clamp(0.0, 100.0)
    } else {
        NEUTRAL_ATTENTION
    };

    Ok(ExternalAssessment {
        timestamp,
        attention_score,
        engagement_level: response.engagement_level,
        emotional_state: response.emotional_state,
        confidence_level: response.confidence_level,
        eye_contact: response.eye_contact,
        body_language: response.body_language,
        suspicious_activities: response.suspicious_activities,
        technical_quality: TechnicalQuality {
            lighting: response.technical_quality.lighting,
            camera_angle: response.technical_quality.camera_angle,
            background_quality: response.technical_quality.background_quality,
        },
        overall_assessment: response.overall_assessment,
        recommendations: response.recommendations,
        violations: response
            .violations
            .into_iter()
            .map(FindingResponse::into_finding)
            .collect(),
        fallback: false,
    })
}

/// Convert an assessment's findings into signal events for the rule engine
pub fn findings_to_signals(assessment: &ExternalAssessment) -> Vec<SignalEvent> {
    assessment
        .violations
        .iter()
        .map(|finding| {
            SignalEvent::new(
                assessment.timestamp,
                DetectorKind::ExternalAssessment,
                SignalKind::ExternalFinding {
                    finding_type: finding.finding_type.clone(),
                    description: finding.description.clone(),
                    severity: finding.severity,
                },
            )
        })
        .collect()
}

/// Calls the assessor with a timeout and one retry, falling back to the neutral default
#[derive(Clone)]
pub struct AssessmentCollector {
    assessor: Arc<dyn VisionAssessor>,
    timeout: Duration,
    retry_backoff: Duration,
}

impl AssessmentCollector {
    pub fn new(assessor: Arc<dyn VisionAssessor>, config: &AssessmentConfig) -> Self {
        Self {
            assessor,
            timeout: Duration::from_millis(config.timeout_ms),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Obtain one assessment for `snapshot`. Never fails.
    #[instrument(skip_all, fields(captured_at = %snapshot.captured_at))]
    pub async fn collect(&self, snapshot: &FrameSnapshot) -> ExternalAssessment {
        let text = match self.attempt(snapshot).await {
            Ok(text) => Ok(text),
            Err(e) => {
                debug!(error = %e, "Assessment attempt failed, retrying");
                tokio::time::sleep(self.retry_backoff).await;
                self.attempt(snapshot).await
            }
        };

        match text.and_then(|t| parse_assessment(&t, snapshot.captured_at)) {
            Ok(assessment) => assessment,
            Err(e) => {
                warn!(error = %e, "Assessment unusable, substituting neutral default");
                neutral_assessment(snapshot.captured_at)
            }
        }
    }

    async fn attempt(&self, snapshot: &FrameSnapshot) -> MonitorResult<String> {
        match tokio::time::timeout(self.timeout, self.assessor.assess(snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(MonitorError::AssessmentTimeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    struct Scripted {
        answers: std::sync::Mutex<Vec<MonitorResult<String>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut answers: Vec<MonitorResult<String>>) -> Arc<Self> {
            answers.reverse();
            Arc::new(Self {
                answers: std::sync::Mutex::new(answers),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl VisionAssessor for Scripted {
        async fn assess(&self, _snapshot: &FrameSnapshot) -> MonitorResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answers
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(MonitorError::AssessmentFailed("script exhausted".to_string())))
        }
    }

    struct Stalled;

    #[async_trait]
    impl VisionAssessor for Stalled {
        async fn assess(&self, _snapshot: &FrameSnapshot) -> MonitorResult<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("{}".to_string())
        }
    }

    const FULL_RESPONSE: &str = r#"Here is my analysis:
```json
{
  "attentionScore": 82,
  "engagementLevel": "high",
  "emotionalState": "focused",
  "confidenceLevel": "medium",
  "eyeContact": "good",
  "bodyLanguage": "professional",
  "suspiciousActivities": [],
  "technicalQuality": {"lighting": "good", "cameraAngle": "average", "backgroundQuality": "professional"},
  "overallAssessment": "good",
  "recommendations": ["Keep it up"],
  "violations": ["Looking at a second screen", {"type": "multiple people", "description": "Second face behind candidate", "severity": "high"}]
}
```"#;

    #[test]
    fn test_parse_wrapped_response() {
        let a = parse_assessment(FULL_RESPONSE, at()).unwrap();
        assert_eq!(a.attention_score, 82.0);
        assert_eq!(a.engagement_level, Level::High);
        assert_eq!(a.emotional_state, EmotionalState::Focused);
        assert_eq!(a.technical_quality.background_quality, BackgroundQuality::Professional);
        assert!(!a.fallback);

        assert_eq!(a.violations.len(), 2);
        assert_eq!(a.violations[0].severity, Severity::Medium);
        assert_eq!(a.violations[0].description, "Looking at a second screen");
        assert_eq!(a.violations[1].finding_type, "multiple people");
        assert_eq!(a.violations[1].severity, Severity::High);
    }

    #[test]
    fn test_parse_lenient_and_clamped() {
        let a = parse_assessment(
            r#"{"attentionScore": 180, "emotionalState": "ecstatic"}"#,
            at(),
        )
        .unwrap();
        assert_eq!(a.attention_score, 100.0);
        assert_eq!(a.emotional_state, EmotionalState::Unknown);
        assert_eq!(a.engagement_level, Level::Medium);
        assert_eq!(a.eye_contact, EyeContactRating::Average);
        assert!(a.violations.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_assessment("I cannot analyze this image.", at()),
            Err(MonitorError::ParseError(_))
        ));
        assert!(matches!(
            parse_assessment("{ not json }", at()),
            Err(MonitorError::JsonError(_))
        ));
    }

    #[test]
    fn test_findings_to_signals() {
        let a = parse_assessment(FULL_RESPONSE, at()).unwrap();
        let signals = findings_to_signals(&a);
        assert_eq!(signals.len(), 2);
        assert!(signals
            .iter()
            .all(|s| s.source == DetectorKind::ExternalAssessment && s.timestamp == at()));
    }

    #[tokio::test]
    async fn test_invalid_json_falls_back_to_neutral() {
        let assessor = Scripted::new(vec![Ok("Sorry, no JSON here".to_string())]);
        let collector = AssessmentCollector::new(assessor.clone(), &AssessmentConfig::default());

        let a = collector.collect(&FrameSnapshot::new(at(), None)).await;
        assert!(a.fallback);
        assert_eq!(a.engagement_level, Level::Medium);
        assert!(a.violations.is_empty());
        assert_eq!(a, neutral_assessment(at()));
        assert_eq!(assessor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_retried_once() {
        let assessor = Scripted::new(vec![
            Err(MonitorError::AssessmentFailed("503".to_string())),
            Ok(r#"{"attentionScore": 64}"#.to_string()),
        ]);
        let collector = AssessmentCollector::new(assessor.clone(), &AssessmentConfig::default());

        let a = collector.collect(&FrameSnapshot::new(at(), None)).await;
        assert!(!a.fallback);
        assert_eq!(a.attention_score, 64.0);
        assert_eq!(assessor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back() {
        let collector = AssessmentCollector::new(Arc::new(Stalled), &AssessmentConfig::default());
        let a = collector.collect(&FrameSnapshot::new(at(), None)).await;
        assert!(a.fallback);
    }
}
