//! Error types for the console engine.

use thiserror::Error;

use crate::persona::PersonaId;

pub type ConsoleResult<T> = Result<T, ConsoleError>;

/// Every failure is scoped to one turn or one item; none is fatal.
#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("stream disconnected: {0}")]
    Disconnected(String),

    #[error("malformed response from {endpoint}: {detail}")]
    Malformed {
        endpoint: &'static str,
        detail: String,
    },

    #[error("speech synthesis failed for {persona}: {reason}")]
    Synthesis { persona: PersonaId, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}
