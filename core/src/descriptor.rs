//! Per-call request description.
//!
//! # Design
//! A `RequestDescriptor` is plain data handed to the builder by reference. The
//! builder never mutates it, so one descriptor can be sent any number of
//! times and every send produces a fresh `WireRequest`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::charset::TextEncoding;

/// HTTP method. Only GET and POST are spoken by SX services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// Request media subtype, rendered as `application/{subtype}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    #[default]
    Json,
    OctetStream,
}

impl ContentKind {
    pub fn subtype(self) -> &'static str {
        match self {
            ContentKind::Json => "json",
            ContentKind::OctetStream => "octet-stream",
        }
    }
}

/// Transport-level credentials, independent of the `SX-Auth-Token` header.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credentials {
    Basic { username: String, password: String },
    /// A ready-made `Authorization` header value.
    Authorization(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Credentials::Authorization(_) => f.write_str("Authorization(***)"),
        }
    }
}

/// Name/value fields and file paths for a multipart upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub files: Vec<PathBuf>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }
}

/// POST body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// JSON or other text, encoded with the descriptor's `TextEncoding`.
    Text(String),
    Multipart(MultipartForm),
}

/// Everything needed to issue one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub body: Option<Payload>,
    #[serde(default)]
    pub encoding: TextEncoding,
    #[serde(default)]
    pub content_kind: ContentKind,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub api_route: Option<String>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

impl RequestDescriptor {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url, HttpMethod::Get, None)
    }

    pub fn post_json(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(url, HttpMethod::Post, Some(Payload::Text(body.into())))
    }

    pub fn upload(url: impl Into<String>, form: MultipartForm) -> Self {
        Self::new(url, HttpMethod::Post, Some(Payload::Multipart(form)))
    }

    fn new(url: impl Into<String>, method: HttpMethod, body: Option<Payload>) -> Self {
        Self {
            url: url.into(),
            method,
            body,
            encoding: TextEncoding::default(),
            content_kind: ContentKind::default(),
            auth_token: None,
            api_route: None,
            credentials: None,
        }
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_content_kind(mut self, kind: ContentKind) -> Self {
        self.content_kind = kind;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_api_route(mut self, route: impl Into<String>) -> Self {
        self.api_route = Some(route.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_defaults_to_utf8_json_without_body() {
        let d = RequestDescriptor::get("http://svc/api");
        assert_eq!(d.method, HttpMethod::Get);
        assert_eq!(d.encoding, TextEncoding::Utf8);
        assert_eq!(d.content_kind, ContentKind::Json);
        assert!(d.body.is_none());
    }

    #[test]
    fn upload_carries_multipart_form() {
        let form = MultipartForm::new().field("kind", "log").file("/tmp/a.bin");
        let d = RequestDescriptor::upload("http://svc/upload", form.clone());
        assert_eq!(d.body, Some(Payload::Multipart(form)));
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let basic = Credentials::Basic {
            username: "ops".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{basic:?}");
        assert!(rendered.contains("ops"));
        assert!(!rendered.contains("hunter2"));
        assert!(!format!("{:?}", Credentials::Authorization("Bearer x".into())).contains("Bearer"));
    }

    #[test]
    fn descriptor_deserializes_with_defaults() {
        let d: RequestDescriptor =
            serde_json::from_str(r#"{"url":"http://svc/api","method":"Get"}"#).unwrap();
        assert_eq!(d, RequestDescriptor::get("http://svc/api"));
    }
}
