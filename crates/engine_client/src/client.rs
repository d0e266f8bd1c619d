use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use engine_contract::{EngineEndpoint, StreamEvent};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Client, Response};

use crate::config::EngineClientConfig;
use crate::decoder::{Frame, StreamDecoder};
use crate::error::{parse_error_message, ClientError};
use crate::payload::ChatRequest;
use crate::url::chat_url;

/// Cancellation flag shared between the caller and the request/stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct EngineClient {
    http: Client,
    config: EngineClientConfig,
}

/// Bookkeeping for one consumed response stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub events: usize,
    pub skipped: usize,
    pub saw_done: bool,
}

#[derive(Debug, Clone)]
pub struct StreamResult {
    pub events: Vec<StreamEvent>,
    pub summary: StreamSummary,
}

impl EngineClient {
    pub fn new(config: EngineClientConfig) -> Result<Self, ClientError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(user_agent) = config.user_agent.as_deref() {
            builder = builder.user_agent(user_agent);
        }
        let http = builder.build().map_err(ClientError::from)?;
        Ok(Self { http, config })
    }

    pub fn for_endpoint(endpoint: &EngineEndpoint) -> Result<Self, ClientError> {
        Self::new(EngineClientConfig::for_endpoint(endpoint))
    }

    pub fn config(&self) -> &EngineClientConfig {
        &self.config
    }

    pub fn chat_endpoint(&self) -> String {
        chat_url(&self.config.base_url)
    }

    fn build_headers(&self) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        for (key, value) in &self.config.extra_headers {
            headers.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| ClientError::InvalidHeader(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(value)
                    .map_err(|_| ClientError::InvalidHeader(format!("invalid value for {key}")))?,
            );
        }
        Ok(headers)
    }

    pub fn build_request(&self, request: &ChatRequest) -> Result<reqwest::RequestBuilder, ClientError> {
        Ok(self
            .http
            .post(self.chat_endpoint())
            .headers(self.build_headers()?)
            .json(request))
    }

    /// Issue the request once; non-success statuses become [`ClientError::Status`].
    ///
    /// Transport failures are not retried here. Replaying a turn is a user action.
    pub async fn send(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, ClientError> {
        if is_cancelled(cancellation) {
            return Err(ClientError::Cancelled);
        }

        let response = await_or_cancel(self.build_request(request)?.send(), cancellation)
            .await?
            .map_err(ClientError::from)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = await_or_cancel(response.text(), cancellation)
            .await?
            .unwrap_or_default();
        let message = parse_error_message(status, &body);
        tracing::warn!(status = status.as_u16(), %message, "engine rejected chat request");
        Err(ClientError::Status(status, message))
    }

    /// Stream one turn, handing every decoded event to `on_event` in arrival order.
    ///
    /// Reading stops at the first `done` event or when the body ends. After
    /// cancellation no further events are delivered, including frames already
    /// decoded from the last chunk.
    pub async fn stream_with_handler<F>(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
        mut on_event: F,
    ) -> Result<StreamSummary, ClientError>
    where
        F: FnMut(StreamEvent),
    {
        let response = self.send(request, cancellation).await?;
        let mut bytes = response.bytes_stream();
        let mut decoder = StreamDecoder::default();
        let mut summary = StreamSummary::default();

        loop {
            let Some(chunk) = await_or_cancel(bytes.next(), cancellation).await? else {
                break;
            };
            let chunk = chunk.map_err(ClientError::Stream)?;
            let frames = decoder.feed(&chunk);
            summary.skipped = decoder.skipped();
            if deliver_frames(frames, &mut summary, cancellation, &mut on_event)? {
                return Ok(summary);
            }
        }

        let frames = decoder.finish();
        summary.skipped = decoder.skipped();
        deliver_frames(frames, &mut summary, cancellation, &mut on_event)?;
        if !summary.saw_done {
            tracing::debug!(events = summary.events, "engine stream ended without done");
        }
        Ok(summary)
    }

    pub async fn stream(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<StreamResult, ClientError> {
        let mut events = Vec::new();
        let summary = self
            .stream_with_handler(request, cancellation, |event| events.push(event))
            .await?;

        Ok(StreamResult { events, summary })
    }
}

/// Returns `Ok(true)` once a `done` event has been delivered.
fn deliver_frames<F>(
    frames: Vec<Frame>,
    summary: &mut StreamSummary,
    cancellation: Option<&CancellationSignal>,
    on_event: &mut F,
) -> Result<bool, ClientError>
where
    F: FnMut(StreamEvent),
{
    for frame in frames {
        if is_cancelled(cancellation) {
            return Err(ClientError::Cancelled);
        }

        let Frame::Event(event) = frame else {
            continue;
        };
        let done = matches!(event, StreamEvent::Done);
        summary.events += 1;
        on_event(event);
        if done {
            summary.saw_done = true;
            return Ok(true);
        }
    }

    Ok(false)
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, ClientError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(ClientError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(ClientError::Cancelled);
            }
            return Ok(output);
        }
    }
}
