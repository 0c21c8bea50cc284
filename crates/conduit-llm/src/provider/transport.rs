//! HTTP client for upstream provider calls

use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt, stream};
use http::HeaderMap;
use reqwest::Client;
use tokio::sync::mpsc;
use url::Url;

use super::Adapter;
use crate::{
    convert::StreamConverter,
    error::LlmError,
    types::{Request, Response, ResponseChunk},
};

/// Canonical chunks of one streaming response
///
/// Ends after a `response.completed` or `error` chunk. Dropping it stops the
/// background reader.
pub type ChunkStream = Pin<Box<dyn Stream<Item = ResponseChunk> + Send>>;

/// Fully prepared upstream call
#[derive(Debug)]
pub struct UpstreamCall {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// Sends adapter-built requests and hands bodies back to the adapter
///
/// No retries and no implicit timeouts; both belong to the caller.
#[derive(Clone)]
pub struct Transport {
    client: Client,
    stream_buffer: usize,
}

impl Transport {
    pub fn new(stream_buffer: usize) -> Self {
        Self::with_client(Client::new(), stream_buffer)
    }

    pub fn with_client(client: Client, stream_buffer: usize) -> Self {
        Self {
            client,
            stream_buffer: stream_buffer.max(1),
        }
    }

    /// Send a non-streaming request
    pub async fn send(&self, adapter: &dyn Adapter, call: UpstreamCall, request: &Request) -> Result<Response, LlmError> {
        let response = self.post(adapter, call).await?;
        let body = response.bytes().await.map_err(|e| {
            tracing::warn!(provider = adapter.name(), error = %e, "failed to read upstream body");
            LlmError::Transport(e.to_string())
        })?;

        adapter.to_canonical_response(&body, request)
    }

    /// Send a streaming request and convert the SSE body in the background
    ///
    /// Returns once the provider accepted the request. Every later failure
    /// arrives as a terminal `error` chunk.
    pub async fn send_streaming(
        &self,
        adapter: &dyn Adapter,
        call: UpstreamCall,
        mut converter: Box<dyn StreamConverter>,
    ) -> Result<ChunkStream, LlmError> {
        let response = self.post(adapter, call).await?;
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let provider = adapter.name().to_owned();

        tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();

            loop {
                let next = tokio::select! {
                    () = tx.closed() => {
                        tracing::debug!(provider = %provider, "stream consumer went away, stopping reader");
                        return;
                    }
                    next = events.next() => next,
                };

                let chunks = match next {
                    Some(Ok(event)) => {
                        let data = event.data.trim();
                        if data.is_empty() || data == "[DONE]" {
                            continue;
                        }
                        converter.convert(data).unwrap_or_else(|e| {
                            tracing::warn!(provider = %provider, error = %e, "unreadable stream payload");
                            converter.fail(&e)
                        })
                    }
                    Some(Err(e)) => {
                        tracing::warn!(provider = %provider, error = %e, "upstream stream broke");
                        converter.fail(&LlmError::Streaming(e.to_string()))
                    }
                    None => converter.finish(),
                };

                for chunk in chunks {
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                }

                if converter.is_finished() {
                    return;
                }
            }
        });

        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })))
    }

    async fn post(&self, adapter: &dyn Adapter, call: UpstreamCall) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(call.url)
            .headers(call.headers)
            .json(&call.body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(provider = adapter.name(), error = %e, "upstream request failed");
                LlmError::Transport(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(provider = adapter.name(), status = %status, "upstream returned error");
        Err(adapter.parse_error(status, &body))
    }
}
