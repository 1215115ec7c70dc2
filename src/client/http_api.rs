//! `SyncApi` over the authority's HTTP surface.
//!
//! Requests are plain JSON; the push channel is the server-sent event stream
//! at `GET /api/sessions/:id/events`, parsed incrementally from the response
//! body.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, warn};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::api::SyncApi;
use crate::authority::crypto::SecretString;
use crate::authority::types::{CreatedSession, StatePayload};
use crate::error_handling::types::SyncError;
use crate::storage::types::SessionSnapshot;
use crate::web_interface::types::{ApiError, CreateSessionRequest, StateResponse, TimeResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpApi {
    /// Authority base URL without trailing slash, e.g. `http://127.0.0.1:8080`
    base_url: String,
    client: reqwest::Client,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SyncError> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(SyncError::InvalidState(format!(
                "base URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        // no overall timeout on the client: the event stream stays open indefinitely
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Transient(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SyncError> {
        let response = request
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| SyncError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiError>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(status_error(status, message));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::Transient(format!("invalid response body: {}", e)))
    }
}

/// 404 → NotFound, 401 → Unauthorized, 400 → InvalidState, anything else is transient.
pub fn status_error(status: StatusCode, message: String) -> SyncError {
    match status {
        StatusCode::NOT_FOUND => SyncError::NotFound,
        StatusCode::UNAUTHORIZED => SyncError::Unauthorized,
        StatusCode::BAD_REQUEST => SyncError::InvalidState(message),
        _ => SyncError::Transient(format!("{}: {}", status, message)),
    }
}

#[async_trait]
impl SyncApi for HttpApi {
    async fn create_session(&self, track_url: &str) -> Result<CreatedSession, SyncError> {
        let body = CreateSessionRequest {
            track_url: track_url.to_string(),
        };
        self.send(self.client.post(self.url("/api/sessions")).json(&body))
            .await
    }

    async fn fetch_session(&self, session_id: Uuid) -> Result<SessionSnapshot, SyncError> {
        self.send(self.client.get(self.url(&format!("/api/sessions/{}", session_id))))
            .await
    }

    async fn post_state(
        &self,
        session_id: Uuid,
        credential: &SecretString,
        payload: &StatePayload,
    ) -> Result<DateTime<Utc>, SyncError> {
        let request = self
            .client
            .post(self.url(&format!("/api/sessions/{}/state", session_id)))
            .bearer_auth(credential.expose_secret())
            .json(payload);
        let response: StateResponse = self.send(request).await?;
        Ok(response.server_time)
    }

    async fn server_time(&self) -> Result<DateTime<Utc>, SyncError> {
        let response: TimeResponse = self.send(self.client.get(self.url("/api/time"))).await?;
        Ok(response.server_time)
    }

    async fn subscribe(
        &self,
        session_id: Uuid,
    ) -> Result<BoxStream<'static, SessionSnapshot>, SyncError> {
        let response = self
            .client
            .get(self.url(&format!("/api/sessions/{}/events", session_id)))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| SyncError::Transient(format!("event stream failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, "event stream rejected".to_string()));
        }
        Ok(sse_snapshots(session_id, response))
    }
}

/// Turns an SSE response body into a stream of `session` event snapshots.
fn sse_snapshots(session_id: Uuid, response: reqwest::Response) -> BoxStream<'static, SessionSnapshot> {
    let body = Box::pin(response.bytes_stream());
    let state = (body, LineBuffer::default());
    futures::stream::unfold(state, move |(mut body, mut lines)| async move {
        loop {
            if let Some(block) = lines.next_event() {
                let block = String::from_utf8_lossy(&block);
                match parse_sse_block(&block) {
                    Some(Ok(snapshot)) => return Some((snapshot, (body, lines))),
                    Some(Err(e)) => warn!("[{}] malformed session event: {}", session_id, e),
                    None => {}
                }
                continue;
            }
            match body.next().await {
                Some(Ok(chunk)) => lines.push(&chunk),
                Some(Err(e)) => {
                    debug!("[{}] event stream closed: {}", session_id, e);
                    return None;
                }
                None => return None,
            }
        }
    })
    .boxed()
}

/// Event stream bytes with every line ending (`\r\n`, `\n` or `\r`) stored as `\n`.
#[derive(Default)]
struct LineBuffer {
    buffer: Vec<u8>,
    /// Last byte was `\r`, so a following `\n` completes the same line ending.
    pending_cr: bool,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            match byte {
                b'\r' => {
                    self.buffer.push(b'\n');
                    self.pending_cr = true;
                }
                b'\n' if self.pending_cr => self.pending_cr = false,
                _ => {
                    self.buffer.push(byte);
                    self.pending_cr = false;
                }
            }
        }
    }

    /// Removes and returns the first complete event, blank line included.
    fn next_event(&mut self) -> Option<Vec<u8>> {
        let end = self.buffer.windows(2).position(|w| w == b"\n\n")? + 2;
        Some(self.buffer.drain(..end).collect())
    }
}

/// Parses one event block. `None` for comments, keep-alives and events other
/// than `session`.
fn parse_sse_block(block: &str) -> Option<Result<SessionSnapshot, serde_json::Error>> {
    let mut event = "message";
    let mut data: Vec<&str> = Vec::new();

    for line in block.split('\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = value,
            "data" => data.push(value),
            _ => {}
        }
    }

    if event != "session" || data.is_empty() {
        return None;
    }
    Some(serde_json::from_str(&data.join("\n")))
}
