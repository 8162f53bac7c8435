//! Async session monitor
//!
//! Wires the sources, detectors, assessment collector and aggregator of one session
//! together as tokio tasks:
//!
//! ```text
//! FrameSource ──► frame detectors ──(bounded, lossy)──────┐
//! BrowserSignalSource ──► browser detectors ──┐           ▼
//!                                             ├──(priority)──► Aggregator ──► ViolationBus
//! AssessmentCollector (interval / trigger) ───┘
//! ```
//!
//! Frame producers never wait on the aggregator: when the frame channel is full the frame
//! is dropped before detection and counted. Browser signals and assessments travel on a
//! small priority channel that producers wait on and that the aggregator drains first.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::aggregator::{Aggregator, ViolationBus};
use crate::assessment::{AssessmentCollector, FrameSnapshot, VisionAssessor};
use crate::config::MonitorConfig;
use crate::detectors::DetectorSet;
use crate::error::{MonitorError, MonitorResult};
use crate::report::SessionReport;
use crate::sources::{BrowserSignalSource, FrameSource};
use crate::types::{ExternalAssessment, LandmarkFrame, Session, SignalEvent, Violation};

/// Capabilities supplied by the host for one session
#[derive(Default)]
pub struct MonitorSources {
    pub frames: Option<Box<dyn FrameSource>>,
    pub browser: Option<Box<dyn BrowserSignalSource>>,
    pub assessor: Option<Arc<dyn VisionAssessor>>,
}

impl MonitorSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frames(mut self, source: impl FrameSource + 'static) -> Self {
        self.frames = Some(Box::new(source));
        self
    }

    pub fn with_browser(mut self, source: impl BrowserSignalSource + 'static) -> Self {
        self.browser = Some(Box::new(source));
        self
    }

    pub fn with_assessor(mut self, assessor: Arc<dyn VisionAssessor>) -> Self {
        self.assessor = Some(assessor);
        self
    }
}

/// Messages on the priority channel
enum Inbound {
    Signals(Vec<SignalEvent>),
    Assessment(ExternalAssessment),
    /// Fails inside the aggregator, for exercising the failure path
    #[cfg(test)]
    Fault,
}

/// A running monitored session
pub struct IntegrityMonitor {
    session_id: String,
    bus: ViolationBus,
    shutdown: watch::Sender<bool>,
    trigger: Arc<Notify>,
    dropped: Arc<AtomicU64>,
    aggregator: Option<JoinHandle<Aggregator>>,
    producers: Vec<JoinHandle<()>>,
    collector: Option<JoinHandle<()>>,
}

impl IntegrityMonitor {
    /// Start monitoring a new session for `subject_id`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: MonitorConfig,
        subject_id: impl Into<String>,
        sources: MonitorSources,
    ) -> MonitorResult<Self> {
        let session = Session::new(Uuid::new_v4().to_string(), subject_id.into(), Utc::now());
        Self::start_session(config, session, sources)
    }

    /// Start monitoring an existing session record
    #[instrument(skip_all, fields(session_id = %session.session_id))]
    pub fn start_session(
        config: MonitorConfig,
        session: Session,
        sources: MonitorSources,
    ) -> MonitorResult<Self> {
        config.validate()?;
        let session_id = session.session_id.clone();

        let bus = ViolationBus::default();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (frame_tx, frame_rx) = mpsc::channel(config.channels.frame_capacity);
        let (priority_tx, priority_rx) = mpsc::channel(config.channels.priority_capacity);
        let (latest_tx, latest_rx) = watch::channel(None);
        let trigger = Arc::new(Notify::new());
        let dropped = Arc::new(AtomicU64::new(0));

        let aggregator = Aggregator::new(session, &config).with_bus(bus.clone());
        let aggregator = tokio::spawn(
            run_aggregator(aggregator, frame_rx, priority_rx, shutdown_rx.clone())
                .instrument(info_span!("aggregator", session_id = %session_id)),
        );

        let mut producers = Vec::new();
        if let Some(source) = sources.frames {
            producers.push(tokio::spawn(
                run_frame_producer(
                    source,
                    DetectorSet::for_frames(&config),
                    frame_tx,
                    latest_tx,
                    dropped.clone(),
                    shutdown_rx.clone(),
                )
                .instrument(info_span!("frames", session_id = %session_id)),
            ));
        }
        if let Some(source) = sources.browser {
            producers.push(tokio::spawn(
                run_browser_producer(
                    source,
                    DetectorSet::for_browser(&config),
                    priority_tx.clone(),
                    shutdown_rx.clone(),
                )
                .instrument(info_span!("browser", session_id = %session_id)),
            ));
        }

        let collector = sources.assessor.map(|assessor| {
            tokio::spawn(
                run_collector(
                    AssessmentCollector::new(assessor, &config.assessment),
                    latest_rx,
                    priority_tx,
                    trigger.clone(),
                    shutdown_rx,
                    Duration::from_secs(config.assessment.interval_secs),
                )
                .instrument(info_span!("collector", session_id = %session_id)),
            )
        });

        info!(session_id = %session_id, "Monitoring started");

        Ok(Self {
            session_id,
            bus,
            shutdown,
            trigger,
            dropped,
            aggregator: Some(aggregator),
            producers,
            collector,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Subscribe to the live violation stream
    pub fn subscribe(&self) -> broadcast::Receiver<Violation> {
        self.bus.subscribe()
    }

    /// Request an external assessment now, in addition to the interval schedule
    pub fn trigger_assessment(&self) {
        self.trigger.notify_one();
    }

    /// Frames dropped so far because the aggregator was behind
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop immediately. Events still queued are discarded; the report reflects
    /// everything the aggregator processed before the stop.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn stop(mut self) -> MonitorResult<SessionReport> {
        let _ = self.shutdown.send(true);
        let report = self.finish().await;
        info!("Monitoring stopped");
        report
    }

    /// Wait until the frame and browser sources are exhausted and every queued event is
    /// processed, then stop. Never returns if a source never ends.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn drain(mut self) -> MonitorResult<SessionReport> {
        for producer in self.producers.drain(..) {
            let _ = producer.await;
        }
        if let Some(collector) = self.collector.take() {
            collector.abort();
            let _ = collector.await;
        }
        let report = self.finish().await;
        info!("Monitoring drained");
        report
    }

    async fn finish(&mut self) -> MonitorResult<SessionReport> {
        let handle = self
            .aggregator
            .take()
            .ok_or_else(|| MonitorError::SessionStopped(self.session_id.clone()))?;
        let mut aggregator = handle
            .await
            .map_err(|e| MonitorError::AggregatorFailed(e.to_string()))?;

        self.abort_tasks();
        Ok(aggregator.finish(Utc::now(), self.dropped_frames()))
    }

    fn abort_tasks(&mut self) {
        for producer in self.producers.drain(..) {
            producer.abort();
        }
        if let Some(collector) = self.collector.take() {
            collector.abort();
        }
    }
}

impl Drop for IntegrityMonitor {
    fn drop(&mut self) {
        self.abort_tasks();
        if let Some(aggregator) = self.aggregator.take() {
            aggregator.abort();
        }
    }
}

async fn run_aggregator(
    mut aggregator: Aggregator,
    mut frame_rx: mpsc::Receiver<Vec<SignalEvent>>,
    mut priority_rx: mpsc::Receiver<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) -> Aggregator {
    let mut priority_open = true;
    let mut frame_open = true;

    // Runs until shutdown or until every producer has hung up
    while priority_open || frame_open {
        let inbound = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            received = priority_rx.recv(), if priority_open => match received {
                Some(inbound) => inbound,
                None => {
                    priority_open = false;
                    continue;
                }
            },
            received = frame_rx.recv(), if frame_open => match received {
                Some(signals) => Inbound::Signals(signals),
                None => {
                    frame_open = false;
                    continue;
                }
            },
        };

        if !handle_inbound(&mut aggregator, inbound) {
            break;
        }
    }
    aggregator
}

/// Apply one message; returns false when the aggregator failed and the session must end
fn handle_inbound(aggregator: &mut Aggregator, inbound: Inbound) -> bool {
    let outcome = catch_unwind(AssertUnwindSafe(|| match inbound {
        Inbound::Signals(signals) => {
            for signal in signals {
                aggregator.apply(signal)?;
            }
            Ok(())
        }
        Inbound::Assessment(assessment) => aggregator.record_assessment(assessment).map(|_| ()),
        #[cfg(test)]
        Inbound::Fault => panic!("aggregator fault"),
    }));

    match outcome {
        Ok(Ok(())) => true,
        Ok(Err(MonitorError::SessionStopped(_))) => false,
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to apply event");
            true
        }
        Err(_) => {
            aggregator.mark_failed("aggregator panicked while applying an event");
            false
        }
    }
}

/// Run detection on one frame unless the aggregator is behind.
///
/// Returns false once the aggregator is gone.
fn forward_frame(
    detectors: &mut DetectorSet,
    frame: &LandmarkFrame,
    tx: &mpsc::Sender<Vec<SignalEvent>>,
    dropped: &AtomicU64,
) -> bool {
    match tx.try_reserve() {
        Ok(permit) => {
            let signals = detectors.observe_frame(frame);
            if !signals.is_empty() {
                permit.send(signals);
            }
            true
        }
        Err(TrySendError::Full(())) => {
            let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total == 1 || total % 100 == 0 {
                warn!(dropped = total, "Aggregator behind, dropping frames");
            }
            true
        }
        Err(TrySendError::Closed(())) => false,
    }
}

async fn run_frame_producer(
    mut source: Box<dyn FrameSource>,
    mut detectors: DetectorSet,
    tx: mpsc::Sender<Vec<SignalEvent>>,
    latest: watch::Sender<Option<LandmarkFrame>>,
    dropped: Arc<AtomicU64>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            frame = source.next_frame() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if !forward_frame(&mut detectors, &frame, &tx, &dropped) {
            break;
        }
        latest.send_replace(Some(frame));
    }
    debug!("Frame producer finished");
}

async fn run_browser_producer(
    mut source: Box<dyn BrowserSignalSource>,
    mut detectors: DetectorSet,
    tx: mpsc::Sender<Inbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = source.next_event() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let verdict = detectors.observe_browser(&event);
        if verdict.prevent_default {
            source.prevent_default(&event);
        }
        if verdict.signals.is_empty() {
            continue;
        }
        if tx.send(Inbound::Signals(verdict.signals)).await.is_err() {
            break;
        }
    }
    debug!("Browser producer finished");
}

async fn run_collector(
    collector: AssessmentCollector,
    latest: watch::Receiver<Option<LandmarkFrame>>,
    tx: mpsc::Sender<Inbound>,
    trigger: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
            _ = trigger.notified() => {}
        }

        let landmarks = latest.borrow().clone();
        let captured_at = landmarks
            .as_ref()
            .map(|f| f.timestamp)
            .unwrap_or_else(Utc::now);
        let snapshot = FrameSnapshot::new(captured_at, landmarks);

        let assessment = tokio::select! {
            _ = shutdown.changed() => break,
            assessment = collector.collect(&snapshot) => assessment,
        };
        if tx.send(Inbound::Assessment(assessment)).await.is_err() {
            break;
        }
    }
    debug!("Assessment collector finished");
}
