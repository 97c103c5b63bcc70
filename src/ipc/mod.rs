//! IPC protocol types for communication with the host UI.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (engine -> host).
//! Commands use `{"command": "<name>", ...}` format (host -> engine).

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::dialogue::StreamLength;
use crate::persona::PersonaId;
use crate::session::{SessionId, SessionMode};

// ---------------------------------------------------------------------------
// Events: engine -> host (stdout)
// ---------------------------------------------------------------------------

/// All events emitted to the host via stdout as JSON lines.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum ConsoleEvent {
    Starting {},
    Ready {},
    Pong {},
    Stopping {},
    CredentialStatus {
        ready: bool,
        detail: String,
    },
    CallState {
        active: bool,
    },
    Listening {
        active: bool,
    },
    UserSpeaking {
        transcript: String,
    },
    /// Ask the host recognizer to begin continuous recognition.
    RecognitionStart {},
    RecognitionStop {},
    Submitted {
        text: String,
    },
    TurnStarted {
        session: SessionId,
        mode: SessionMode,
        text: String,
    },
    TurnFinished {
        session: SessionId,
    },
    TurnCancelled {
        session: SessionId,
    },
    /// Persona switch, caption and playback start, as one event.
    Speaking {
        session: SessionId,
        seq: u64,
        persona: PersonaId,
        text: String,
    },
    CaptionCleared {},
    PersonaChanged {
        persona: PersonaId,
    },
    PersonasSelected {
        personas: Vec<PersonaId>,
    },
    Notice {
        text: String,
    },
    Error {
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Commands: host -> engine (stdin)
// ---------------------------------------------------------------------------

/// All commands received from the host via stdin as JSON lines.
///
/// Deserialized from `{"command": "<variant>", ...}`. Persona names are kept
/// as strings so one unknown name does not reject the whole command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum ConsoleCommand {
    /// Typed input, optionally addressed to one persona.
    Send {
        text: String,
        #[serde(default)]
        persona: Option<String>,
    },
    FunMode {
        topic: String,
        #[serde(default)]
        mode: Option<StreamLength>,
    },
    StopDebate {},
    StartCall {},
    StopCall {},
    ToggleCall {},
    SelectPersonas {
        personas: Vec<String>,
    },
    TogglePersona {
        persona: String,
    },
    ResetPersonas {},
    Configure {
        #[serde(default)]
        gemini_key: Option<String>,
        #[serde(default)]
        eleven_key: Option<String>,
    },
    RecognitionStarted {},
    RecognitionResult {
        transcript: String,
    },
    RecognitionError {
        error: String,
    },
    RecognitionEnded {},
    Ping {},
    Stop {},
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(ConsoleEvent::Speaking {
            session: SessionId(3),
            seq: 1,
            persona: PersonaId::Anger,
            text: "No!".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event": "speaking",
                "data": {"session": 3, "seq": 1, "persona": "Anger", "text": "No!"}
            })
        );

        let json = serde_json::to_value(ConsoleEvent::Ready {}).unwrap();
        assert_eq!(json, serde_json::json!({"event": "ready", "data": {}}));
    }

    #[test]
    fn test_command_parsing() {
        let cmd: ConsoleCommand =
            serde_json::from_str(r#"{"command":"send","text":"hi"}"#).unwrap();
        assert_eq!(
            cmd,
            ConsoleCommand::Send {
                text: "hi".into(),
                persona: None
            }
        );

        let cmd: ConsoleCommand =
            serde_json::from_str(r#"{"command":"fun_mode","topic":"pizza","mode":"long"}"#)
                .unwrap();
        assert_eq!(
            cmd,
            ConsoleCommand::FunMode {
                topic: "pizza".into(),
                mode: Some(StreamLength::Long)
            }
        );

        let cmd: ConsoleCommand = serde_json::from_str(r#"{"command":"stop_debate"}"#).unwrap();
        assert_eq!(cmd, ConsoleCommand::StopDebate {});
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(serde_json::from_str::<ConsoleCommand>(r#"{"command":"dance"}"#).is_err());
        assert!(serde_json::from_str::<ConsoleCommand>(r#"{"command":"send"}"#).is_err());
    }
}
