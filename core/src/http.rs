//! Wire-level request and response types.
//!
//! # Design
//! `WireRequest` is the fully resolved form of a descriptor: final URL,
//! ordered headers, encoded body, TLS material and timeout. It is built by
//! `RequestBuilder` without touching the network and is consumed by value by
//! the transport, so one wire request serves exactly one exchange.

use std::time::Duration;

use crate::body::MultipartBody;
use crate::certificate::{ClientIdentity, ServerVerification};
use crate::charset::TextEncoding;
use crate::descriptor::HttpMethod;

pub const HEADER_CLIENT_IP: &str = "SX-Client-IP";
pub const HEADER_AUTH_TOKEN: &str = "SX-Auth-Token";
pub const HEADER_API_ROUTE: &str = "SX-API-ROUTE";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_ACCEPT_ENCODING: &str = "Accept-Encoding";

/// Encoded request body.
#[derive(Debug)]
pub enum WireBody {
    Bytes(Vec<u8>),
    Multipart(MultipartBody),
}

impl WireBody {
    pub fn len(&self) -> u64 {
        match self {
            WireBody::Bytes(bytes) => bytes.len() as u64,
            WireBody::Multipart(body) => body.content_length(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// TLS material for a secure exchange.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub client_identity: Option<ClientIdentity>,
    pub verification: ServerVerification,
}

/// A request ready to be sent.
#[derive(Debug)]
pub struct WireRequest {
    pub method: HttpMethod,
    pub url: String,
    headers: Vec<(String, String)>,
    pub body: Option<WireBody>,
    /// Encoding used when the response does not declare a charset.
    pub response_encoding: TextEncoding,
    pub tls: Option<TlsSettings>,
    pub timeout: Duration,
    pub max_redirects: u32,
}

impl WireRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            response_encoding: TextEncoding::default(),
            tls: None,
            timeout,
            max_redirects: 10,
        }
    }

    /// Set a header, replacing any existing value with the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(HEADER_CONTENT_TYPE)
    }

    pub fn client_identity(&self) -> Option<&ClientIdentity> {
        self.tls.as_ref().and_then(|tls| tls.client_identity.as_ref())
    }
}

/// Response metadata the decoder needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    /// Charset as reported by the transport layer.
    pub reported_charset: Option<String>,
    pub content_length: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut req = WireRequest::new(HttpMethod::Get, "http://svc", Duration::from_secs(1));
        req.set_header("SX-Auth-Token", "a");
        req.set_header("sx-auth-token", "b");
        assert_eq!(req.headers().len(), 1);
        assert_eq!(req.header("SX-AUTH-TOKEN"), Some("b"));
    }

    #[test]
    fn headers_keep_insertion_order() {
        let mut req = WireRequest::new(HttpMethod::Get, "http://svc", Duration::from_secs(1));
        req.set_header(HEADER_CONTENT_TYPE, "application/json;charset=utf-8");
        req.set_header(HEADER_CLIENT_IP, "10.0.0.1");
        let names: Vec<&str> = req.headers().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec![HEADER_CONTENT_TYPE, HEADER_CLIENT_IP]);
    }

    #[test]
    fn body_length_covers_both_shapes() {
        assert_eq!(WireBody::Bytes(b"{}".to_vec()).len(), 2);
        assert!(WireBody::Bytes(Vec::new()).is_empty());
    }
}
