//! Call façade over the request builder and the transport.
//!
//! # Design
//! `SxClient` owns one `RequestBuilder` and one `Transport` and exposes the
//! three operating modes: synchronous, async with a completion callback, and
//! streaming. Fire-and-forget is the async mode without a callback.
//!
//! The synchronous path never returns an error to the caller: a build
//! failure yields `None` ("not sent"), and every later failure is folded into
//! the `[REQUEST ERROR] {message}` sentinel string. `try_send` keeps the typed
//! error for callers that want it.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::builder::RequestBuilder;
use crate::certificate::{CertificateStore, EmbeddedCertificateStore};
use crate::config::TransportConfig;
use crate::descriptor::RequestDescriptor;
use crate::envelope::{CallSource, CompletionEvent, CompletionSlot, ResultEnvelope};
use crate::error::{Error, Result};
use crate::transport::{ResponseStream, Transport};

/// Prefix of the sentinel string returned by failed synchronous calls.
pub const REQUEST_ERROR_PREFIX: &str = "[REQUEST ERROR] ";

/// Format an error the way the synchronous path reports it.
pub fn request_error_text(err: &Error) -> String {
    format!("{REQUEST_ERROR_PREFIX}{err}")
}

/// True if `response` is a synchronous-path failure sentinel.
pub fn is_request_error(response: &str) -> bool {
    response.starts_with(REQUEST_ERROR_PREFIX)
}

/// Client for SX services.
#[derive(Clone)]
pub struct SxClient {
    builder: RequestBuilder,
    transport: Transport,
}

impl SxClient {
    pub fn new(config: TransportConfig, store: Arc<dyn CertificateStore>) -> Self {
        let transport = Transport::new(config.fire_and_forget_timeout());
        Self {
            builder: RequestBuilder::new(Arc::new(config), store),
            transport,
        }
    }

    /// Plain-HTTP client with no certificate material.
    pub fn insecure() -> Self {
        Self::new(
            TransportConfig::insecure(),
            Arc::new(EmbeddedCertificateStore::new()),
        )
    }

    /// Run async calls on `handle` instead of the ambient tokio runtime.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.transport = self.transport.with_runtime(handle);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        self.builder.config()
    }

    pub fn builder(&self) -> &RequestBuilder {
        &self.builder
    }

    /// Blocking call.
    ///
    /// `None` means the request could not be built and nothing was sent.
    pub fn send(&self, descriptor: &RequestDescriptor) -> Option<String> {
        let wire = match self.builder.build(descriptor) {
            Ok(wire) => wire,
            Err(err) => {
                warn!(url = %descriptor.url, error = %err, "request not sent");
                return None;
            }
        };
        Some(match self.transport.execute(wire) {
            Ok(body) => body,
            Err(err) => {
                warn!(url = %descriptor.url, error = %err, "request failed");
                request_error_text(&err)
            }
        })
    }

    /// Blocking call keeping the typed error.
    pub fn try_send(&self, descriptor: &RequestDescriptor) -> Result<String> {
        let wire = self.builder.build(descriptor)?;
        self.transport.execute(wire)
    }

    /// Blocking call returning the uniform outcome.
    pub fn send_envelope(&self, descriptor: &RequestDescriptor) -> ResultEnvelope {
        ResultEnvelope::from_outcome(self.try_send(descriptor))
    }

    /// Non-blocking call; `on_complete` runs exactly once, also when the
    /// request cannot be built.
    pub fn send_async<F>(&self, descriptor: &RequestDescriptor, on_complete: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce(CompletionEvent) + Send + 'static,
    {
        match self.builder.build(descriptor) {
            Ok(wire) => self.transport.execute_async(wire, on_complete),
            Err(err) => {
                warn!(url = %descriptor.url, error = %err, "request not sent");
                let source = CallSource::new(descriptor.method, descriptor.url.clone());
                CompletionSlot::new(source, on_complete)
                    .complete(ResultEnvelope::from_error(&err.into()));
                None
            }
        }
    }

    /// Non-blocking call whose outcome is only logged.
    pub fn fire_and_forget(&self, descriptor: &RequestDescriptor) -> Option<JoinHandle<()>> {
        match self.builder.build(descriptor) {
            Ok(wire) => self.transport.fire_and_forget(wire),
            Err(err) => {
                warn!(url = %descriptor.url, error = %err, "request not sent");
                None
            }
        }
    }

    /// Blocking call handing the undecoded body stream to `on_stream_ready`.
    pub fn download<F, T>(&self, descriptor: &RequestDescriptor, on_stream_ready: F) -> Result<T>
    where
        F: FnOnce(ResponseStream) -> T,
    {
        let wire = self.builder.build(descriptor)?;
        self.transport.execute_to_stream(wire, on_stream_ready)
    }
}

impl std::fmt::Debug for SxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SxClient")
            .field("config", self.config())
            .field("transport", &self.transport)
            .finish()
    }
}
