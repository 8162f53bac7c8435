//! Input capabilities
//!
//! The monitor pulls landmark frames and browser events from host-provided sources. The
//! host (a browser bridge, a desktop shell or a test) decides where they come from.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{BrowserEvent, LandmarkFrame};

/// Supplies landmark frames, one per captured video frame
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` when the stream has ended
    async fn next_frame(&mut self) -> Option<LandmarkFrame>;
}

/// Supplies browser / OS events
#[async_trait]
pub trait BrowserSignalSource: Send {
    /// Next event, or `None` when the stream has ended
    async fn next_event(&mut self) -> Option<BrowserEvent>;

    /// Ask the host to suppress the default action of `event`
    fn prevent_default(&mut self, _event: &BrowserEvent) {}
}

/// Frame source fed through an mpsc channel
pub struct ChannelFrameSource {
    rx: mpsc::Receiver<LandmarkFrame>,
}

impl ChannelFrameSource {
    pub fn new(rx: mpsc::Receiver<LandmarkFrame>) -> Self {
        Self { rx }
    }

    /// A source plus the sender that feeds it
    pub fn channel(capacity: usize) -> (mpsc::Sender<LandmarkFrame>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl FrameSource for ChannelFrameSource {
    async fn next_frame(&mut self) -> Option<LandmarkFrame> {
        self.rx.recv().await
    }
}

/// Browser source fed through an mpsc channel.
///
/// Prevent-default requests are forwarded on an optional channel back to the host.
pub struct ChannelBrowserSource {
    rx: mpsc::Receiver<BrowserEvent>,
    prevented: Option<mpsc::UnboundedSender<BrowserEvent>>,
}

impl ChannelBrowserSource {
    pub fn new(rx: mpsc::Receiver<BrowserEvent>) -> Self {
        Self {
            rx,
            prevented: None,
        }
    }

    pub fn channel(capacity: usize) -> (mpsc::Sender<BrowserEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }

    /// Forward prevent-default requests to `tx`
    pub fn with_prevent_default(mut self, tx: mpsc::UnboundedSender<BrowserEvent>) -> Self {
        self.prevented = Some(tx);
        self
    }
}

#[async_trait]
impl BrowserSignalSource for ChannelBrowserSource {
    async fn next_event(&mut self) -> Option<BrowserEvent> {
        self.rx.recv().await
    }

    fn prevent_default(&mut self, event: &BrowserEvent) {
        if let Some(tx) = &self.prevented {
            let _ = tx.send(event.clone());
        }
    }
}

/// Scripted browser source for tests and demos
#[derive(Debug, Default)]
pub struct SyntheticBrowserSource {
    script: VecDeque<BrowserEvent>,
    prevented: Vec<BrowserEvent>,
}

impl SyntheticBrowserSource {
    pub fn new(events: impl IntoIterator<Item = BrowserEvent>) -> Self {
        Self {
            script: events.into_iter().collect(),
            prevented: Vec::new(),
        }
    }

    /// Events whose default action was suppressed
    pub fn prevented(&self) -> &[BrowserEvent] {
        &self.prevented
    }
}

#[async_trait]
impl BrowserSignalSource for SyntheticBrowserSource {
    async fn next_event(&mut self) -> Option<BrowserEvent> {
        self.script.pop_front()
    }

    fn prevent_default(&mut self, event: &BrowserEvent) {
        self.prevented.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BrowserEventKind;
    use chrono::{TimeZone, Utc};

    fn event(kind: BrowserEventKind) -> BrowserEvent {
        BrowserEvent::new(Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap(), kind)
    }

    #[tokio::test]
    async fn test_synthetic_source_replays_script() {
        let mut source = SyntheticBrowserSource::new(vec![
            event(BrowserEventKind::WindowBlur),
            event(BrowserEventKind::ContextMenu),
        ]);
        let first = source.next_event().await.unwrap();
        assert_eq!(first.kind, BrowserEventKind::WindowBlur);
        let second = source.next_event().await.unwrap();
        source.prevent_default(&second);
        assert!(source.next_event().await.is_none());
        assert_eq!(source.prevented().len(), 1);
    }

    #[tokio::test]
    async fn test_channel_sources() {
        let (tx, mut frames) = ChannelFrameSource::channel(4);
        tx.send(LandmarkFrame::empty(Utc::now())).await.unwrap();
        drop(tx);
        assert!(frames.next_frame().await.is_some());
        assert!(frames.next_frame().await.is_none());

        let (prevent_tx, mut prevent_rx) = mpsc::unbounded_channel();
        let (tx, source) = ChannelBrowserSource::channel(4);
        let mut source = source.with_prevent_default(prevent_tx);
        tx.send(event(BrowserEventKind::ContextMenu)).await.unwrap();
        let got = source.next_event().await.unwrap();
        source.prevent_default(&got);
        assert_eq!(prevent_rx.recv().await.unwrap(), got);
    }
}
