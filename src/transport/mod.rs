//! Transport boundary: how requests reach the backend.
//!
//! The store never talks to the network directly. It goes through a
//! [`Transport`], which receives a [`Request`] and a cancellation token and
//! returns a [`Response`]. [`get_json`] and [`send_checked`] wrap a transport
//! call as a cancelable [`Source`], applying the status and body rules:
//!
//! - non-2xx status: [`StoreError::HttpStatus`]
//! - undecodable body: [`StoreError::Serialization`]
//! - transport failure or abort: [`StoreError::Transport`]

#[cfg(feature = "http")]
mod http;
mod memory;

#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use memory::{MemoryTransport, Reply};

use crate::error::{Result, StoreError};
use crate::source::Source;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Request method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Put => f.write_str("PUT"),
        }
    }
}

/// A request to the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn put(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Put,
            url: url.into(),
            body: Some(body),
        }
    }
}

/// Status and raw body of a backend response.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fail with [`StoreError::HttpStatus`] unless the status is 2xx.
    pub fn error_for_status(self, url: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(StoreError::HttpStatus {
                status: self.status,
                url: url.to_string(),
            })
        }
    }

    pub fn json<R: DeserializeOwned>(&self) -> Result<R> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Something that can carry a request to the backend.
///
/// Implementations should stop work promptly once `cancel` fires; the caller
/// also drops the returned future on cancellation.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: Request, cancel: CancellationToken) -> Result<Response>;
}

/// Cold source that performs `request` and decodes a 2xx JSON body as `R`.
pub fn get_json<R>(transport: &Arc<dyn Transport>, request: Request) -> Source<R>
where
    R: DeserializeOwned + Send + 'static,
{
    let transport = Arc::clone(transport);
    Source::from_cancelable(move |cancel| {
        let transport = Arc::clone(&transport);
        let request = request.clone();
        async move {
            let url = request.url.clone();
            let response = transport.send(request, cancel).await?;
            response.error_for_status(&url)?.json()
        }
    })
}

/// Cold source that performs `request` and only checks the status.
pub fn send_checked(transport: &Arc<dyn Transport>, request: Request) -> Source<()> {
    let transport = Arc::clone(transport);
    Source::from_cancelable(move |cancel| {
        let transport = Arc::clone(&transport);
        let request = request.clone();
        async move {
            let url = request.url.clone();
            transport.send(request, cancel).await?.error_for_status(&url)?;
            Ok(())
        }
    })
}
