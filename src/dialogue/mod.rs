//! Dialogue-reasoning service: request shapes, the service trait, and the
//! newline-delimited stream decoder.
//!
//! The service is a black box. It accepts the user's text plus a persona
//! roster and answers either with a complete list of utterances (batch) or a
//! chunked body of one JSON object per line (streaming).

pub mod client;
pub mod decoder;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::ConsoleResult;
use crate::persona::{PersonaId, Utterance};

pub use client::{http_client, HttpDialogue};
pub use decoder::{StreamDecoder, StreamRecord, WireLine};

/// Raw chunked response body of a streaming turn.
pub type ByteStream = BoxStream<'static, ConsoleResult<Bytes>>;

/// How long a streamed discussion should run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamLength {
    #[default]
    Short,
    Medium,
    Long,
}

/// Body of the batch dialogue request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_persona: Option<PersonaId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_personas: Vec<PersonaId>,
}

/// Body of the batch dialogue response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub responses: Vec<WireLine>,
}

impl BatchResponse {
    /// Speakable entries in list order; anything else is skipped.
    pub fn into_utterances(self) -> Vec<Utterance> {
        self.responses
            .into_iter()
            .filter_map(|line| match line.into_record() {
                Some(StreamRecord::Utterance(u)) => Some(u),
                _ => None,
            })
            .collect()
    }
}

/// Body of the streaming dialogue request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamRequest {
    pub message: String,
    pub mode: StreamLength,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_personas: Vec<PersonaId>,
}

/// Keys pushed to the configuration endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Credentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eleven_key: Option<String>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.gemini_key.is_none() && self.eleven_key.is_none()
    }
}

pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = ConsoleResult<T>> + Send + 'a>>;

/// Remote dialogue-reasoning service (dyn-compatible).
pub trait DialogueService: Send + Sync {
    /// One request, one complete ordered list of utterances.
    fn respond(&self, request: BatchRequest) -> ServiceFuture<'_, Vec<Utterance>>;

    /// Open a chunked response body; utterances arrive as NDJSON lines.
    fn open_stream(&self, request: StreamRequest) -> ServiceFuture<'_, ByteStream>;

    /// Push credentials; `Ok` means the service accepted them.
    fn configure(&self, credentials: Credentials) -> ServiceFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_request_omits_empty_selection() {
        let req = BatchRequest {
            message: "hello".into(),
            target_persona: None,
            target_personas: vec![],
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({"message": "hello"})
        );
    }

    #[test]
    fn test_stream_request_shape() {
        let req = StreamRequest {
            message: "Tomorrow is Monday".into(),
            mode: StreamLength::Medium,
            target_personas: vec![PersonaId::Joy, PersonaId::Anger],
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({
                "message": "Tomorrow is Monday",
                "mode": "medium",
                "target_personas": ["Joy", "Anger"],
            })
        );
    }

    #[test]
    fn test_batch_response_tolerates_missing_list() {
        let resp: BatchResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.into_utterances().is_empty());

        let resp: BatchResponse = serde_json::from_str(
            r#"{"responses":[{"persona":"Joy","text":"yay"},{"persona":"Nobody","text":"?"},{"persona":"Fear","text":"eek"}]}"#,
        )
        .unwrap();
        let utterances = resp.into_utterances();
        assert_eq!(utterances.len(), 2);
        assert_eq!(utterances[0], Utterance::new(PersonaId::Joy, "yay"));
        assert_eq!(utterances[1].persona, PersonaId::Fear);
    }
}
