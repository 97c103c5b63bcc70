//! Backend speech synthesis over HTTP.
//!
//! POST `{api_url}/warroom/audio`
//! Body: `{"persona": "Joy", "text": "..."}`
//! Returns audio bytes (mp3). The backend owns the persona -> voice mapping.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::info;

use super::{AudioClip, SpeechSynthesizer};
use crate::dialogue::client::ensure_success;
use crate::error::{ConsoleError, ConsoleResult};
use crate::persona::PersonaId;

const SYNTH_ENDPOINT: &str = "warroom/audio";

pub struct BackendTts {
    base_url: String,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl BackendTts {
    pub fn new(base_url: &str, request_timeout: Duration, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
            client,
        }
    }
}

impl SpeechSynthesizer for BackendTts {
    fn synthesize(
        &self,
        persona: PersonaId,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = ConsoleResult<AudioClip>> + Send + '_>> {
        let text = text.to_string();
        Box::pin(async move {
            if text.trim().is_empty() {
                return Err(ConsoleError::Synthesis {
                    persona,
                    reason: "empty text".into(),
                });
            }

            info!(persona = %persona, text_len = text.len(), "Synthesis request");

            let body = serde_json::json!({
                "persona": persona,
                "text": text,
            });

            let resp = self
                .client
                .post(format!("{}/{}", self.base_url, SYNTH_ENDPOINT))
                .timeout(self.request_timeout)
                .header("Accept", "audio/mpeg")
                .json(&body)
                .send()
                .await
                .map_err(|source| ConsoleError::Transport {
                    endpoint: SYNTH_ENDPOINT,
                    source,
                })?;
            let resp = ensure_success(SYNTH_ENDPOINT, resp).await?;

            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            // The backend answers 200 with a JSON error object when its own
            // synthesis fails.
            if content_type
                .as_deref()
                .is_some_and(|ct| ct.starts_with("application/json"))
            {
                let detail = resp.text().await.unwrap_or_default();
                return Err(ConsoleError::Synthesis {
                    persona,
                    reason: format!("backend returned JSON instead of audio: {}", detail),
                });
            }

            let data = resp.bytes().await.map_err(|e| ConsoleError::Synthesis {
                persona,
                reason: format!("failed to read audio body: {}", e),
            })?;
            if data.is_empty() {
                return Err(ConsoleError::Synthesis {
                    persona,
                    reason: "empty audio body".into(),
                });
            }

            info!(persona = %persona, bytes = data.len(), "Synthesis complete");
            Ok(AudioClip::new(data))
        })
    }

    fn name(&self) -> String {
        format!("Backend TTS ({})", self.base_url)
    }
}
