//! `reqwest`-backed transport, enabled with the `http` feature.

use super::{Method, Request, Response, Transport};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Sends requests to a real HTTP server rooted at `origin`.
///
/// Request URLs are paths such as `/api/courses`; they are appended to the
/// origin (`http://localhost:9000`).
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    origin: String,
}

impl HttpTransport {
    pub fn new(origin: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), origin)
    }

    pub fn with_client(client: reqwest::Client, origin: impl Into<String>) -> Self {
        Self {
            client,
            origin: origin.into().trim_end_matches('/').to_string(),
        }
    }

    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.origin, url.trim_start_matches('/'))
        }
    }

    async fn perform(&self, request: Request) -> Result<Response> {
        let url = self.absolute(&request.url);
        let builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Put => self.client.put(&url),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport_error)?;
        Ok(Response::new(status, body.to_vec()))
    }
}

fn transport_error(error: reqwest::Error) -> StoreError {
    StoreError::Transport(error.to_string())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request, cancel: CancellationToken) -> Result<Response> {
        debug!(method = %request.method, url = %request.url, "http request");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StoreError::Transport("request aborted".into())),
            response = self.perform(request) => response,
        }
    }
}
