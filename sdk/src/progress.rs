//! Ordered progress events for long-running wallet flows.
//!
//! Events carry fixed ordinals and are delivered in strictly increasing order,
//! with exactly one terminal `Done`. The channel is bounded and the producer
//! never waits on a slow or absent subscriber.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Room for every checkpoint of a single flow.
const PROGRESS_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProgressEvent {
    Start,
    EncryptSecret,
    EncryptPrimary,
    EncryptRecovery,
    PrimaryKey,
    BackupKey,
    Submit,
    Init,
    Done,
}

impl ProgressEvent {
    pub fn ordinal(&self) -> u8 {
        match self {
            ProgressEvent::Start => 0,
            ProgressEvent::EncryptSecret => 4,
            ProgressEvent::EncryptPrimary => 5,
            ProgressEvent::EncryptRecovery => 6,
            ProgressEvent::PrimaryKey => 10,
            ProgressEvent::BackupKey => 20,
            ProgressEvent::Submit => 30,
            ProgressEvent::Init => 40,
            ProgressEvent::Done => 100,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Done)
    }
}

/// Producer half, owned by a single flow.
#[derive(Debug, Default)]
pub struct ProgressSink {
    sender: Option<mpsc::Sender<ProgressEvent>>,
    last: Option<ProgressEvent>,
}

impl ProgressSink {
    /// A sink that records ordering but delivers nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Emit `event` unless it would break the ordering.
    pub fn emit(&mut self, event: ProgressEvent) {
        if let Some(last) = self.last {
            if event.ordinal() <= last.ordinal() {
                log::warn!("Dropping out-of-order progress event {:?} after {:?}", event, last);
                return;
            }
        }
        self.last = Some(event);

        if let Some(sender) = &self.sender {
            if sender.try_send(event).is_err() {
                log::debug!("Progress subscriber gone, further events are discarded");
                self.sender = None;
            }
        }
        if event.is_terminal() {
            self.sender = None;
        }
    }

    pub fn last(&self) -> Option<ProgressEvent> {
        self.last
    }
}

/// Consumer half. Events are consumed at most once.
#[derive(Debug)]
pub struct ProgressStream {
    receiver: mpsc::Receiver<ProgressEvent>,
}

impl ProgressStream {
    /// Next event, or `None` once the flow has finished or been dropped.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }

    /// Events already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn channel() -> (ProgressSink, ProgressStream) {
    let (sender, receiver) = mpsc::channel(PROGRESS_CAPACITY);
    (
        ProgressSink {
            sender: Some(sender),
            last: None,
        },
        ProgressStream { receiver },
    )
}
