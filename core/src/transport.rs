//! Network exchange for wire requests.
//!
//! # Design
//! Each call gets its own `ureq::Agent` configured from the wire request
//! (timeout, redirects, TLS material), so no connection or trust state is
//! shared between calls. The blocking exchange is split into two steps:
//! `send` (connect, write the body, wait for the response head) and the body
//! read + decode. Async calls run each step on the runtime's blocking pool,
//! so runtime workers never block on the network.

use std::io::Read;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, info_span, warn, Instrument, Span};
use ureq::tls::{Certificate, RootCerts, TlsConfig};
use ureq::{Agent, Body, SendBody};

use crate::certificate::ServerVerification;
use crate::decode::decode;
use crate::descriptor::HttpMethod;
use crate::envelope::{CallSource, CompletionEvent, CompletionSlot, ResultEnvelope};
use crate::error::{Error, TransportError};
use crate::http::{
    ResponseMeta, TlsSettings, WireBody, WireRequest, HEADER_ACCEPT_ENCODING,
    HEADER_CONTENT_LENGTH,
};

/// Executes wire requests.
#[derive(Debug, Clone)]
pub struct Transport {
    runtime: Option<Handle>,
    fire_and_forget_timeout: Duration,
}

impl Transport {
    pub fn new(fire_and_forget_timeout: Duration) -> Self {
        Self {
            runtime: None,
            fire_and_forget_timeout,
        }
    }

    /// Run async calls on `handle` instead of the ambient runtime.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    fn handle(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }

    /// Blocking exchange returning the decoded body.
    pub fn execute(&self, wire: WireRequest) -> Result<String, Error> {
        let span = info_span!("sx_call", method = wire.method.as_str(), url = %wire.url);
        let _entered = span.enter();
        let started = Instant::now();
        let encoding = wire.response_encoding;

        let (meta, body) = send(wire)?;
        let text = decode(body.into_reader(), &meta, encoding)?;
        log_response(&meta, &text, started);
        Ok(text)
    }

    /// Dispatch without blocking; `on_complete` runs exactly once.
    ///
    /// Returns `None` when no runtime is available, after delivering the
    /// failure to `on_complete` on the calling thread.
    pub fn execute_async<F>(&self, wire: WireRequest, on_complete: F) -> Option<JoinHandle<()>>
    where
        F: FnOnce(CompletionEvent) + Send + 'static,
    {
        let source = CallSource::new(wire.method, wire.url.clone());
        let slot = CompletionSlot::new(source, on_complete);
        let Some(handle) = self.handle() else {
            warn!(url = %wire.url, "no tokio runtime for async call");
            slot.complete(ResultEnvelope::from_error(&TransportError::NoRuntime.into()));
            return None;
        };

        let span = info_span!(
            "sx_call",
            call_id = %slot.source().id,
            method = wire.method.as_str(),
            url = %wire.url
        );
        Some(handle.spawn(run_async(wire, slot).instrument(span)))
    }

    /// Async dispatch nobody waits on, bounded by the short timeout.
    pub fn fire_and_forget(&self, wire: WireRequest) -> Option<JoinHandle<()>> {
        self.execute_async(self.bounded_for_fire_and_forget(wire), |event| {
            if event.success_request {
                debug!(call_id = %event.source.id, "fire-and-forget call completed");
            } else {
                warn!(call_id = %event.source.id, response = %event.response, "fire-and-forget call failed");
            }
        })
    }

    fn bounded_for_fire_and_forget(&self, mut wire: WireRequest) -> WireRequest {
        wire.timeout = self.fire_and_forget_timeout;
        wire
    }

    /// Blocking exchange handing the live body to `on_stream_ready`.
    ///
    /// The body is not decompressed, so compression is not negotiated.
    pub fn execute_to_stream<F, T>(&self, mut wire: WireRequest, on_stream_ready: F) -> Result<T, Error>
    where
        F: FnOnce(ResponseStream) -> T,
    {
        let span = info_span!("sx_call", method = wire.method.as_str(), url = %wire.url);
        let _entered = span.enter();
        wire.remove_header(HEADER_ACCEPT_ENCODING);

        let (meta, body) = send(wire)?;
        info!(status = meta.status, content_length = ?meta.content_length, "response stream ready");
        Ok(on_stream_ready(ResponseStream {
            meta,
            reader: Box::new(body.into_reader()),
        }))
    }
}

async fn run_async<F>(wire: WireRequest, slot: CompletionSlot<F>)
where
    F: FnOnce(CompletionEvent) + Send + 'static,
{
    let started = Instant::now();
    let encoding = wire.response_encoding;
    let span = Span::current();

    let send_span = span.clone();
    let sent = flatten(
        tokio::task::spawn_blocking(move || send_span.in_scope(|| send(wire))).await,
    );
    let envelope = match sent {
        Ok((meta, body)) => {
            let decoded = tokio::task::spawn_blocking(move || -> Result<String, Error> {
                let _entered = span.enter();
                let text = decode(body.into_reader(), &meta, encoding)?;
                log_response(&meta, &text, started);
                Ok(text)
            })
            .await;
            ResultEnvelope::from_outcome(flatten(decoded))
        }
        Err(err) => ResultEnvelope::from_error(&err),
    };

    // The callback may be slow; keep it off the runtime workers.
    if let Err(err) = tokio::task::spawn_blocking(move || slot.complete(envelope)).await {
        warn!(error = %err, "completion callback panicked");
    }
}

fn flatten<T>(joined: Result<Result<T, Error>, JoinError>) -> Result<T, Error> {
    joined.unwrap_or_else(|e| Err(TransportError::Task(e.to_string()).into()))
}

/// Live response body handed to stream consumers. Dropping it closes the connection.
pub struct ResponseStream {
    pub meta: ResponseMeta,
    reader: Box<dyn Read + Send>,
}

impl ResponseStream {
    pub fn content_length(&self) -> Option<u64> {
        self.meta.content_length
    }
}

impl Read for ResponseStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream").field("meta", &self.meta).finish()
    }
}

/// Connect, write the body and wait for the response head.
fn send(wire: WireRequest) -> Result<(ResponseMeta, Body), Error> {
    let agent = agent_for(&wire);
    let timeout = wire.timeout;
    info!(
        method = wire.method.as_str(),
        url = %wire.url,
        body_len = wire.body.as_ref().map(WireBody::len).unwrap_or(0),
        "sending request"
    );

    let headers = wire.headers().to_vec();
    let WireRequest {
        method, url, body, ..
    } = wire;

    let result = match (method, body) {
        (HttpMethod::Get, _) => with_headers(agent.get(&url), &headers).call(),
        (HttpMethod::Post, Some(WireBody::Bytes(bytes))) => {
            with_headers(agent.post(&url), &headers).send(&bytes[..])
        }
        (HttpMethod::Post, Some(WireBody::Multipart(multipart))) => {
            let len = multipart.content_length();
            with_headers(agent.post(&url), &headers)
                .header(HEADER_CONTENT_LENGTH, len.to_string())
                .send(SendBody::from_owned_reader(multipart))
        }
        (HttpMethod::Post, None) => with_headers(agent.post(&url), &headers).send_empty(),
    };

    let response = result.map_err(|e| match e {
        ureq::Error::Timeout(_) => TransportError::Timeout(timeout),
        other => TransportError::Http(other),
    })?;

    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let meta = ResponseMeta {
        status: response.status().as_u16(),
        content_type: header("content-type"),
        content_encoding: header("content-encoding"),
        reported_charset: response.body().charset().map(str::to_string),
        content_length: response.body().content_length(),
    };
    Ok((meta, response.into_body()))
}

fn with_headers<B>(
    mut request: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

fn agent_for(wire: &WireRequest) -> Agent {
    let mut config = Agent::config_builder()
        .timeout_global(Some(wire.timeout))
        .max_redirects(wire.max_redirects);
    if let Some(tls) = &wire.tls {
        config = config.tls_config(tls_config(tls));
    }
    config.build().new_agent()
}

fn tls_config(tls: &TlsSettings) -> TlsConfig {
    let builder = TlsConfig::builder().client_cert(
        tls.client_identity
            .as_ref()
            .map(|identity| identity.client_cert()),
    );
    let builder = match &tls.verification {
        ServerVerification::WebPki => builder.root_certs(RootCerts::WebPki),
        ServerVerification::Pinned(roots) => {
            let certs: Vec<Certificate<'static>> = roots
                .iter()
                .map(|der| Certificate::from_der(der).to_owned())
                .collect();
            builder.root_certs(RootCerts::new_with_certs(&certs))
        }
        ServerVerification::Disabled => builder.disable_verification(true),
    };
    builder.build()
}

fn log_response(meta: &ResponseMeta, text: &str, started: Instant) {
    info!(
        status = meta.status,
        content_type = meta.content_type.as_deref().unwrap_or_default(),
        decoded_len = text.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "response decoded"
    );
    debug!(body = %text, "raw response");
}
