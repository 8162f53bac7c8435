//! Integrity Flux - Real-time integrity monitoring engine for remote assessment sessions
//!
//! Integrity Flux turns per-frame face/hand/pose landmarks and browser events into
//! integrity violations through a deterministic pipeline: local detectors → signal
//! events → rule engine → aggregator (metrics, violations, score, escalation) →
//! session report.
//!
//! ## Modules
//!
//! - **Live monitoring**: [`IntegrityMonitor`] runs the detectors, the periodic external
//!   assessment and the aggregator as tokio tasks for one session
//! - **Replay**: [`IntegrityProcessor`] and [`replay_session`] process a recorded NDJSON
//!   session log synchronously with the same aggregator

pub mod aggregator;
pub mod assessment;
pub mod config;
pub mod detectors;
pub mod error;
pub mod geometry;
pub mod monitor;
pub mod pipeline;
pub mod report;
pub mod rules;
pub mod scorer;
pub mod sources;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use aggregator::{Aggregator, ViolationBus};
pub use assessment::{AssessmentCollector, FrameSnapshot, VisionAssessor};
pub use config::MonitorConfig;
pub use error::{MonitorError, MonitorResult};
pub use monitor::{IntegrityMonitor, MonitorSources};
pub use pipeline::{replay_session, replay_signals, IntegrityProcessor};
pub use report::SessionReport;
pub use scorer::integrity_score;

/// Engine version embedded in every session report
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for session reports
pub const PRODUCER_NAME: &str = "integrity-flux";
