//! One dialogue turn, from submission to playback completion or cancel.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::playback::{PlaybackScheduler, PrefetchQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// One request, one complete list of utterances.
    Batch,
    /// Utterances arrive over an open response body.
    Streaming,
}

impl SessionMode {
    /// Pause inserted between consecutive speakers.
    pub fn speaker_gap(self, batch: Duration, streaming: Duration) -> Duration {
        match self {
            Self::Batch => batch,
            Self::Streaming => streaming,
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Batch => write!(f, "batch"),
            Self::Streaming => write!(f, "streaming"),
        }
    }
}

/// The active turn. At most one exists at a time; its token is cancelled
/// before a successor is created.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub mode: SessionMode,
    pub token: CancellationToken,
    /// The dialogue request or stream may still produce utterances.
    pub ingesting: bool,
    pub queue: PrefetchQueue,
    pub playback: PlaybackScheduler,
}

impl Session {
    pub fn new(id: SessionId, mode: SessionMode) -> Self {
        Self {
            id,
            mode,
            token: CancellationToken::new(),
            ingesting: true,
            queue: PrefetchQueue::new(),
            playback: PlaybackScheduler::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Nothing more will be produced, fetched or played.
    pub fn is_finished(&self) -> bool {
        !self.ingesting && self.queue.is_drained() && self.playback.is_idle()
    }

    /// Audio is playing, pausing between speakers, or still queued.
    pub fn has_pending_audio(&self) -> bool {
        !self.playback.is_idle() || !self.queue.is_drained()
    }

    /// Flip the token and drop all queued work.
    pub fn cancel(&mut self) {
        self.token.cancel();
        self.ingesting = false;
        self.queue.clear();
        self.playback.reset();
    }
}
