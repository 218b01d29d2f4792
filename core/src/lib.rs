//! Client-side HTTP(S) engine for SX service processes.
//!
//! # Overview
//! A `RequestDescriptor` says what to send. `RequestBuilder` resolves it
//! against the process-wide `TransportConfig` into a `WireRequest` (scheme,
//! SX headers, encoded body, TLS material) without touching the network.
//! `Transport` performs the exchange and `decode` turns the response into
//! text. `SxClient` ties the pieces together behind three operating modes:
//! synchronous, async with a completion callback, and streaming.
//!
//! # Design
//! - Build failures surface as "not sent" (`None` / `BuildError`), never as a
//!   half-built request.
//! - The synchronous path folds every transport or decode failure into the
//!   `[REQUEST ERROR] {message}` sentinel string.
//! - Async callbacks run exactly once per call, including on failure,
//!   cancellation and runtime shutdown.
//! - TLS trust is explicit: web PKI roots by default, pinned roots or
//!   trust-any only when configured.

pub mod body;
pub mod builder;
pub mod certificate;
pub mod charset;
pub mod client;
pub mod config;
pub mod decode;
pub mod descriptor;
pub mod envelope;
pub mod error;
pub mod http;
pub mod transport;

pub use builder::RequestBuilder;
pub use certificate::{
    AlwaysTrust, CertificateBundle, CertificateFormat, CertificateStore, DirectoryCertificateStore,
    EmbeddedCertificateStore, PinnedRoots, ServerCertificateValidator, WebPkiRoots, PFX_PASSWORD,
};
pub use charset::TextEncoding;
pub use client::{is_request_error, request_error_text, SxClient, REQUEST_ERROR_PREFIX};
pub use config::{ProgramRole, TransportConfig, DEFAULT_TIMEOUT, FIRE_AND_FORGET_TIMEOUT};
pub use descriptor::{ContentKind, Credentials, HttpMethod, MultipartForm, Payload, RequestDescriptor};
pub use envelope::{ApiResult, CallSource, CompletionEvent, ResultEnvelope};
pub use error::{BuildError, DecodeError, Error, Result, TransportError};
pub use http::WireRequest;
pub use transport::{ResponseStream, Transport};
