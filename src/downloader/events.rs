// Ready-made event sinks

use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::models::{SessionEvent, StatusEvent};
use super::traits::EventSink;

/// Forwards events into an unbounded channel; never blocks the session task
pub struct ChannelSink {
    tx: UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: SessionEvent) {
        // receiver gone means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

/// Writes events to the tracing log
pub struct TracingSink {
    label: String,
}

impl TracingSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: SessionEvent) {
        match event {
            SessionEvent::Progress(p) => tracing::trace!(
                session = %self.label,
                percent = ?p.percent,
                downloaded = p.bytes_downloaded,
                total = ?p.bytes_total,
                "progress"
            ),
            SessionEvent::Status(StatusEvent::Finished(file)) => {
                tracing::info!(session = %self.label, file = %file, "file finished")
            }
            SessionEvent::Status(StatusEvent::Completed) => {
                tracing::info!(session = %self.label, "download completed")
            }
            SessionEvent::Status(StatusEvent::Canceled) => {
                tracing::info!(session = %self.label, "download canceled")
            }
            SessionEvent::Status(StatusEvent::Error(message)) => {
                tracing::error!(session = %self.label, error = %message, "download failed")
            }
        }
    }
}

/// Delivers every event to each inner sink, in registration order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: SessionEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
