//! Core data types for integrity monitoring
//!
//! This module defines the landmark frames, browser events, signal events, violations,
//! session records and external assessments that flow between the detectors, the
//! aggregator and the report builder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Landmark input
// ============================================================================

/// A single normalized landmark coordinate (0-1 image space)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    /// Depth, when the landmark model provides it
    #[serde(default)]
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// Whether both planar coordinates are usable numbers
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Normalized face bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One detected face: an optional detector box plus the face mesh (may be partial)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
    /// Face mesh landmarks, indexed per [`crate::geometry::face_mesh`]
    #[serde(default)]
    pub mesh: Vec<Point>,
}

/// Landmarks extracted from one video frame. Ephemeral, never retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    /// Capture time of the frame
    pub timestamp: DateTime<Utc>,
    /// Detected faces (empty when nobody is in frame)
    #[serde(default)]
    pub faces: Vec<DetectedFace>,
    /// Pose landmarks, indexed per [`crate::geometry::pose`]
    #[serde(default)]
    pub pose: Option<Vec<Point>>,
    /// Hand landmarks, one vector per detected hand
    #[serde(default)]
    pub hands: Vec<Vec<Point>>,
}

impl LandmarkFrame {
    /// An empty frame (no faces, pose or hands)
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            faces: Vec::new(),
            pose: None,
            hands: Vec::new(),
        }
    }

    /// The first (primary) face, if any
    pub fn primary_face(&self) -> Option<&DetectedFace> {
        self.faces.first()
    }
}

// ============================================================================
// Browser / OS input
// ============================================================================

/// Browser or OS event kinds reported by the host UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserEventKind {
    /// Page visibility changed (`hidden` true when the tab was left)
    VisibilityChange { hidden: bool },
    WindowBlur,
    WindowFocus,
    WindowResize { width: u32, height: u32 },
    KeyDown {
        key: String,
        #[serde(default)]
        ctrl: bool,
        #[serde(default)]
        alt: bool,
        #[serde(default)]
        shift: bool,
        #[serde(default)]
        meta: bool,
    },
    ContextMenu,
}

/// A timestamped browser event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: BrowserEventKind,
}

impl BrowserEvent {
    pub fn new(timestamp: DateTime<Utc>, kind: BrowserEventKind) -> Self {
        Self { timestamp, kind }
    }
}

// ============================================================================
// Signal events
// ============================================================================

/// The detector (or collector) that produced a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Presence,
    Gaze,
    HeadMovement,
    HandProximity,
    PoseOrientation,
    Distance,
    BrowserFocus,
    Input,
    ExternalAssessment,
    Monitor,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Presence => "presence",
            DetectorKind::Gaze => "gaze",
            DetectorKind::HeadMovement => "head_movement",
            DetectorKind::HandProximity => "hand_proximity",
            DetectorKind::PoseOrientation => "pose_orientation",
            DetectorKind::Distance => "distance",
            DetectorKind::BrowserFocus => "browser_focus",
            DetectorKind::Input => "input",
            DetectorKind::ExternalAssessment => "external_assessment",
            DetectorKind::Monitor => "monitor",
        }
    }
}

/// Payload of a signal event.
///
/// Observation kinds only move counters; candidate kinds are handed to the rule
/// engine, which decides whether they become violations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum SignalKind {
    // Observations
    FacePresent { faces: usize },
    EyeContact,
    LookAway { offset: f64, streak: u32 },
    EyesClosed { ear: f64 },
    HeadMovement { magnitude: f64 },

    // Violation candidates
    NoFace { missing_for_ms: i64 },
    MultiplePersons { faces: usize },
    PoorEyeContact { streak: u32 },
    ExcessiveMovement { movements: u32 },
    PhoneUsage { tip_distance: f64, tip_height: f64 },
    BodyOrientation { shoulder_tilt: f64 },
    DistanceViolation { face_area: f64 },
    TabSwitch,
    WindowBlur,
    WindowResize { width: u32, height: u32 },
    SuspiciousKeypress { combo: String },
    ContextMenu,
    ExternalFinding {
        finding_type: String,
        description: String,
        severity: Severity,
    },
    DetectorDegraded { detector: DetectorKind, reason: String },
}

/// A normalized, immutable observation emitted by a detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub timestamp: DateTime<Utc>,
    pub source: DetectorKind,
    pub signal: SignalKind,
}

impl SignalEvent {
    pub fn new(timestamp: DateTime<Utc>, source: DetectorKind, signal: SignalKind) -> Self {
        Self {
            timestamp,
            source,
            signal,
        }
    }
}

// ============================================================================
// Violations
// ============================================================================

/// Violation severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse a collaborator-provided severity label, tolerating case and synonyms
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" | "minor" => Some(Severity::Low),
            "medium" | "moderate" => Some(Severity::Medium),
            "high" | "major" | "severe" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// Violation categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    NoFace,
    MultiplePersons,
    PoorEyeContact,
    ExcessiveMovement,
    PhoneUsage,
    BodyOrientation,
    DistanceViolation,
    TabSwitch,
    WindowBlur,
    WindowResize,
    SuspiciousKeypress,
    ContextMenu,
    ExternalFinding,
    DetectorDegraded,
    InterviewEscalation,
}

impl ViolationType {
    /// Fixed severity table
    pub fn default_severity(&self) -> Severity {
        match self {
            ViolationType::MultiplePersons
            | ViolationType::PhoneUsage
            | ViolationType::TabSwitch
            | ViolationType::SuspiciousKeypress => Severity::High,
            ViolationType::NoFace
            | ViolationType::PoorEyeContact
            | ViolationType::WindowBlur
            | ViolationType::ContextMenu
            | ViolationType::ExternalFinding => Severity::Medium,
            ViolationType::DistanceViolation
            | ViolationType::ExcessiveMovement
            | ViolationType::BodyOrientation
            | ViolationType::WindowResize
            | ViolationType::DetectorDegraded => Severity::Low,
            ViolationType::InterviewEscalation => Severity::Critical,
        }
    }

    /// Whether violations of this type count toward the integrity score.
    ///
    /// Advisories and the escalation meta-violation are recorded but never scored.
    pub fn is_scored(&self) -> bool {
        !matches!(
            self,
            ViolationType::DetectorDegraded | ViolationType::InterviewEscalation
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::NoFace => "no_face",
            ViolationType::MultiplePersons => "multiple_persons",
            ViolationType::PoorEyeContact => "poor_eye_contact",
            ViolationType::ExcessiveMovement => "excessive_movement",
            ViolationType::PhoneUsage => "phone_usage",
            ViolationType::BodyOrientation => "body_orientation",
            ViolationType::DistanceViolation => "distance_violation",
            ViolationType::TabSwitch => "tab_switch",
            ViolationType::WindowBlur => "window_blur",
            ViolationType::WindowResize => "window_resize",
            ViolationType::SuspiciousKeypress => "suspicious_keypress",
            ViolationType::ContextMenu => "context_menu",
            ViolationType::ExternalFinding => "external_finding",
            ViolationType::DetectorDegraded => "detector_degraded",
            ViolationType::InterviewEscalation => "interview_escalation",
        }
    }

    /// Map a collaborator-provided type name onto a standard violation type
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        let kind = match normalized.as_str() {
            "no_face" | "face_not_visible" | "no_face_detected" => ViolationType::NoFace,
            "multiple_persons" | "multiple_people" => ViolationType::MultiplePersons,
            "poor_eye_contact" | "looking_away" => ViolationType::PoorEyeContact,
            "excessive_movement" | "excessive_motion" => ViolationType::ExcessiveMovement,
            "phone_usage" | "phone_detected" => ViolationType::PhoneUsage,
            "body_orientation" => ViolationType::BodyOrientation,
            "distance_violation" => ViolationType::DistanceViolation,
            "tab_switch" => ViolationType::TabSwitch,
            "window_blur" => ViolationType::WindowBlur,
            "window_resize" => ViolationType::WindowResize,
            "suspicious_keypress" | "suspicious_keystroke" => ViolationType::SuspiciousKeypress,
            "context_menu" => ViolationType::ContextMenu,
            _ => return None,
        };
        Some(kind)
    }
}

/// Per-session behavior counters, owned exclusively by the aggregator.
///
/// Every counter is non-decreasing within a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorMetrics {
    pub face_detections: u64,
    pub eye_contact_frames: u64,
    pub head_movement_events: u64,
    /// Frames with eyes closed (average EAR under threshold)
    pub suspicious_activity_frames: u64,
    pub tab_switches: u64,
    pub window_blurs: u64,
    pub multiple_person_frames: u64,
    /// Longest consecutive look-away run observed so far
    pub look_away_streak: u64,
    pub phone_proximity_events: u64,
    pub look_away_frames: u64,
    pub window_resizes: u64,
    pub suspicious_keypresses: u64,
    pub context_menu_requests: u64,
}

impl BehaviorMetrics {
    /// True when no counter in `self` is below its value in `earlier`
    pub fn dominates(&self, earlier: &BehaviorMetrics) -> bool {
        self.face_detections >= earlier.face_detections
            && self.eye_contact_frames >= earlier.eye_contact_frames
            && self.head_movement_events >= earlier.head_movement_events
            && self.suspicious_activity_frames >= earlier.suspicious_activity_frames
            && self.tab_switches >= earlier.tab_switches
            && self.window_blurs >= earlier.window_blurs
            && self.multiple_person_frames >= earlier.multiple_person_frames
            && self.look_away_streak >= earlier.look_away_streak
            && self.phone_proximity_events >= earlier.phone_proximity_events
            && self.look_away_frames >= earlier.look_away_frames
            && self.window_resizes >= earlier.window_resizes
            && self.suspicious_keypresses >= earlier.suspicious_keypresses
            && self.context_menu_requests >= earlier.context_menu_requests
    }
}

/// Session-local violation sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViolationId(pub u64);

impl std::fmt::Display for ViolationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{:04}", self.0)
    }
}

/// An immutable, append-only violation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub id: ViolationId,
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub description: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub source: DetectorKind,
    /// Counters at the moment the violation was recorded
    pub metrics_snapshot: BehaviorMetrics,
}

// ============================================================================
// Session
// ============================================================================

/// Escalation state, monotonic within a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    #[default]
    Normal,
    Flagged,
    Escalated,
}

/// Lifecycle state of a monitored session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Normal,
    Flagged,
    Escalated,
    Completed,
    /// The aggregator failed; the report is salvaged and needs review
    EscalatedPendingReview,
}

impl From<EscalationState> for SessionState {
    fn from(state: EscalationState) -> Self {
        match state {
            EscalationState::Normal => SessionState::Normal,
            EscalationState::Flagged => SessionState::Flagged,
            EscalationState::Escalated => SessionState::Escalated,
        }
    }
}

/// A monitored assessment session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub subject_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub state: SessionState,
}

impl Session {
    pub fn new(session_id: String, subject_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            subject_id,
            started_at,
            ended_at: None,
            state: SessionState::Normal,
        }
    }
}

// ============================================================================
// External assessment
// ============================================================================

/// Low / medium / high rating used for engagement and confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionalState {
    Nervous,
    Confident,
    Neutral,
    Stressed,
    Focused,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EyeContactRating {
    Poor,
    Average,
    Good,
    Excellent,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyLanguage {
    Closed,
    Neutral,
    Open,
    Professional,
    #[serde(other)]
    Unknown,
}

/// Poor / average / good rating used for lighting and camera angle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityRating {
    Poor,
    Average,
    Good,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundQuality {
    Unprofessional,
    Acceptable,
    Professional,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallAssessment {
    Concerning,
    Acceptable,
    Good,
    Excellent,
    #[serde(other)]
    Unknown,
}

/// Camera setup quality reported by the vision collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalQuality {
    pub lighting: QualityRating,
    pub camera_angle: QualityRating,
    pub background_quality: BackgroundQuality,
}

/// A violation reported by the vision collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalFinding {
    pub finding_type: String,
    pub description: String,
    pub severity: Severity,
}

/// One structured judgment from the vision collaborator. Read-only once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAssessment {
    pub timestamp: DateTime<Utc>,
    /// Attention score (0-100)
    pub attention_score: f64,
    pub engagement_level: Level,
    pub emotional_state: EmotionalState,
    pub confidence_level: Level,
    pub eye_contact: EyeContactRating,
    pub body_language: BodyLanguage,
    pub suspicious_activities: Vec<String>,
    pub technical_quality: TechnicalQuality,
    pub overall_assessment: OverallAssessment,
    pub recommendations: Vec<String>,
    pub violations: Vec<ExternalFinding>,
    /// True when the collaborator's answer was unusable and the neutral default was substituted
    #[serde(default)]
    pub fallback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_table() {
        assert_eq!(ViolationType::MultiplePersons.default_severity(), Severity::High);
        assert_eq!(ViolationType::PhoneUsage.default_severity(), Severity::High);
        assert_eq!(ViolationType::TabSwitch.default_severity(), Severity::High);
        assert_eq!(ViolationType::SuspiciousKeypress.default_severity(), Severity::High);
        assert_eq!(ViolationType::NoFace.default_severity(), Severity::Medium);
        assert_eq!(ViolationType::PoorEyeContact.default_severity(), Severity::Medium);
        assert_eq!(ViolationType::WindowBlur.default_severity(), Severity::Medium);
        assert_eq!(ViolationType::ContextMenu.default_severity(), Severity::Medium);
        assert_eq!(ViolationType::DistanceViolation.default_severity(), Severity::Low);
        assert_eq!(ViolationType::ExcessiveMovement.default_severity(), Severity::Low);
        assert_eq!(ViolationType::BodyOrientation.default_severity(), Severity::Low);
        assert_eq!(ViolationType::WindowResize.default_severity(), Severity::Low);
        assert_eq!(
            ViolationType::InterviewEscalation.default_severity(),
            Severity::Critical
        );
    }

    #[test]
    fn test_unscored_types() {
        assert!(!ViolationType::DetectorDegraded.is_scored());
        assert!(!ViolationType::InterviewEscalation.is_scored());
        assert!(ViolationType::TabSwitch.is_scored());
    }

    #[test]
    fn test_violation_type_from_name() {
        assert_eq!(
            ViolationType::from_name("Multiple People"),
            Some(ViolationType::MultiplePersons)
        );
        assert_eq!(
            ViolationType::from_name("phone-usage"),
            Some(ViolationType::PhoneUsage)
        );
        assert_eq!(ViolationType::from_name("reading notes"), None);
    }

    #[test]
    fn test_signal_event_serialization() {
        let event = SignalEvent::new(
            "2024-01-15T14:00:00Z".parse().unwrap(),
            DetectorKind::Gaze,
            SignalKind::LookAway {
                offset: 0.4,
                streak: 3,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["source"], "gaze");
        assert_eq!(json["signal"]["signal"], "look_away");
        assert_eq!(json["signal"]["streak"], 3);

        let back: SignalEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_unknown_rating_is_lenient() {
        let level: Level = serde_json::from_str("\"extreme\"").unwrap();
        assert_eq!(level, Level::Unknown);
        let state: EmotionalState = serde_json::from_str("\"confident\"").unwrap();
        assert_eq!(state, EmotionalState::Confident);
    }

    #[test]
    fn test_metrics_dominates() {
        let earlier = BehaviorMetrics::default();
        let mut later = earlier.clone();
        later.tab_switches = 2;
        assert!(later.dominates(&earlier));
        assert!(!earlier.dominates(&later));
    }
}
