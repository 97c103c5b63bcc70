//! Speech synthesis and audio output.
//!
//! - `SpeechSynthesizer`: persona + text in, playable audio out (remote)
//! - `playback::AudioSink`: the device-facing load/play/pause capability

pub mod cloud;
pub mod playback;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::ConsoleResult;
use crate::persona::PersonaId;

pub use cloud::BackendTts;
pub use playback::{AudioSink, PlaybackSignal, PlaybackTicket, RodioSink, SilentSink};

/// Synthesized, playable audio for one utterance. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub data: Bytes,
}

impl AudioClip {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Remote speech-synthesis service (dyn-compatible).
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` in `persona`'s voice.
    fn synthesize(
        &self,
        persona: PersonaId,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = ConsoleResult<AudioClip>> + Send + '_>>;

    /// Display name for logs.
    fn name(&self) -> String;
}
