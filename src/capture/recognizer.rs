//! Speech-to-text capability seam.
//!
//! Recognition runs in the host; the engine only asks it to start or stop
//! and receives `recognition_*` commands back.

use tokio::sync::mpsc;

use crate::ipc::ConsoleEvent;

/// Continuous speech-to-text capability.
pub trait Recognizer: Send {
    /// Begin continuous recognition. Fails if it is already running or the
    /// platform refuses.
    fn start(&mut self) -> anyhow::Result<()>;

    fn stop(&mut self);
}

/// Recognizer hosted on the other end of the IPC bridge.
pub struct IpcRecognizer {
    events: mpsc::UnboundedSender<ConsoleEvent>,
}

impl IpcRecognizer {
    pub fn new(events: mpsc::UnboundedSender<ConsoleEvent>) -> Self {
        Self { events }
    }
}

impl Recognizer for IpcRecognizer {
    fn start(&mut self) -> anyhow::Result<()> {
        self.events
            .send(ConsoleEvent::RecognitionStart {})
            .map_err(|_| anyhow::anyhow!("IPC event channel closed"))
    }

    fn stop(&mut self) {
        let _ = self.events.send(ConsoleEvent::RecognitionStop {});
    }
}
