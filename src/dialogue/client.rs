//! HTTP client for the dialogue backend.
//!
//! POST `{api_url}/warroom`         batch turn, JSON `{"responses": [...]}`
//! POST `{api_url}/funmode/stream`  streaming turn, NDJSON body
//! POST `{api_url}/config`          credential push, 2xx on acceptance

use std::time::Duration;

use futures_util::{StreamExt, TryStreamExt};
use tracing::{debug, info};

use super::{
    BatchRequest, BatchResponse, ByteStream, Credentials, DialogueService, ServiceFuture,
    StreamRequest,
};
use crate::error::{ConsoleError, ConsoleResult};
use crate::persona::Utterance;

const BATCH_ENDPOINT: &str = "warroom";
const STREAM_ENDPOINT: &str = "funmode/stream";
const CONFIG_ENDPOINT: &str = "config";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpDialogue {
    base_url: String,
    request_timeout: Duration,
    client: reqwest::Client,
}

/// The connection pool shared by dialogue and synthesis requests.
pub fn http_client() -> ConsoleResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| ConsoleError::Config(format!("Failed to build HTTP client: {}", e)))
}

impl HttpDialogue {
    pub fn with_client(base_url: &str, request_timeout: Duration, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
            client,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }
}

/// Turn a non-2xx response into `ConsoleError::Status`.
pub(crate) async fn ensure_success(
    endpoint: &'static str,
    resp: reqwest::Response,
) -> ConsoleResult<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(ConsoleError::Status {
        endpoint,
        status,
        body,
    })
}

impl DialogueService for HttpDialogue {
    fn respond(&self, request: BatchRequest) -> ServiceFuture<'_, Vec<Utterance>> {
        Box::pin(async move {
            info!(
                text_len = request.message.len(),
                personas = request.target_personas.len(),
                "Batch dialogue request"
            );

            let resp = self
                .client
                .post(self.url(BATCH_ENDPOINT))
                .timeout(self.request_timeout)
                .json(&request)
                .send()
                .await
                .map_err(|source| ConsoleError::Transport {
                    endpoint: BATCH_ENDPOINT,
                    source,
                })?;
            let resp = ensure_success(BATCH_ENDPOINT, resp).await?;

            let body: BatchResponse = resp.json().await.map_err(|e| ConsoleError::Malformed {
                endpoint: BATCH_ENDPOINT,
                detail: e.to_string(),
            })?;
            let utterances = body.into_utterances();
            debug!(count = utterances.len(), "Batch dialogue response");
            Ok(utterances)
        })
    }

    fn open_stream(&self, request: StreamRequest) -> ServiceFuture<'_, ByteStream> {
        Box::pin(async move {
            info!(
                text_len = request.message.len(),
                mode = ?request.mode,
                personas = request.target_personas.len(),
                "Streaming dialogue request"
            );

            // No total timeout here: the body stays open for the whole turn.
            let resp = self
                .client
                .post(self.url(STREAM_ENDPOINT))
                .json(&request)
                .send()
                .await
                .map_err(|source| ConsoleError::Transport {
                    endpoint: STREAM_ENDPOINT,
                    source,
                })?;
            let resp = ensure_success(STREAM_ENDPOINT, resp).await?;

            Ok(resp
                .bytes_stream()
                .map_err(|e| ConsoleError::Disconnected(e.to_string()))
                .boxed())
        })
    }

    fn configure(&self, credentials: Credentials) -> ServiceFuture<'_, ()> {
        Box::pin(async move {
            info!(
                gemini = credentials.gemini_key.is_some(),
                eleven = credentials.eleven_key.is_some(),
                "Pushing credentials"
            );

            let resp = self
                .client
                .post(self.url(CONFIG_ENDPOINT))
                .timeout(self.request_timeout)
                .json(&credentials)
                .send()
                .await
                .map_err(|source| ConsoleError::Transport {
                    endpoint: CONFIG_ENDPOINT,
                    source,
                })?;
            ensure_success(CONFIG_ENDPOINT, resp).await?;
            Ok(())
        })
    }
}
