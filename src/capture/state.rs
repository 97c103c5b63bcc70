//! Continuous-capture state machine.
//!
//! Phases follow the recognizer lifecycle; `CaptureState` holds everything
//! the controller owns. Transitions not listed in the table are rejected and
//! leave the phase unchanged.

use tokio::time::Instant;

/// Recognizer lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePhase {
    /// Recognizer not running.
    #[default]
    Idle,
    /// Running, no speech in the current turn yet.
    Listening,
    /// Partial results are arriving; the silence window is armed.
    SpeechDetected,
}

/// Inputs that move the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTransition {
    Started,
    Result,
    Submitted,
    Ended,
}

impl CapturePhase {
    /// Allowed transitions. `None` means the input is invalid here.
    pub fn next(self, input: CaptureTransition) -> Option<CapturePhase> {
        use CapturePhase::*;
        use CaptureTransition::*;
        match (self, input) {
            (Idle, Started) => Some(Listening),
            // Some platforms deliver a result before the start callback.
            (Idle | Listening | SpeechDetected, Result) => Some(SpeechDetected),
            (SpeechDetected, Submitted) => Some(Listening),
            (_, Ended) => Some(Idle),
            (Listening | SpeechDetected, Started) => None,
            (Idle | Listening, Submitted) => None,
        }
    }
}

impl std::fmt::Display for CapturePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::SpeechDetected => write!(f, "speech_detected"),
        }
    }
}

/// State owned solely by the capture controller.
#[derive(Debug, Clone, Default)]
pub struct CaptureState {
    pub phase: CapturePhase,
    /// When set, the recognizer is restarted after every terminal event.
    pub call_active: bool,
    pub user_speaking: bool,
    pub pending_transcript: String,
    pub silence_deadline: Option<Instant>,
}

impl CaptureState {
    pub fn listening(&self) -> bool {
        self.phase != CapturePhase::Idle
    }

    /// Apply a transition; returns whether it was allowed.
    pub fn apply(&mut self, input: CaptureTransition) -> bool {
        match self.phase.next(input) {
            Some(next) => {
                self.phase = next;
                true
            }
            None => false,
        }
    }

    /// Restart eligibility after the recognizer ends.
    pub fn should_auto_restart(&self, shutting_down: bool) -> bool {
        self.call_active && !shutting_down
    }
}
