//! Descriptor to wire-request translation.
//!
//! # Design
//! `RequestBuilder` is pure: given the same config, store and descriptor it
//! produces the same `WireRequest` (up to the multipart boundary), and it
//! never performs network I/O. Reading multipart file metadata and loading a
//! certificate bundle are the only side effects.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};
use url::Url;

use crate::body::{encode_text, MultipartBody};
use crate::certificate::CertificateStore;
use crate::config::TransportConfig;
use crate::descriptor::{Credentials, HttpMethod, Payload, RequestDescriptor};
use crate::error::BuildError;
use crate::http::{
    TlsSettings, WireBody, WireRequest, HEADER_ACCEPT_ENCODING, HEADER_API_ROUTE,
    HEADER_AUTHORIZATION, HEADER_AUTH_TOKEN, HEADER_CLIENT_IP, HEADER_CONTENT_TYPE,
};

/// Builds `WireRequest`s for one transport configuration.
#[derive(Clone)]
pub struct RequestBuilder {
    config: Arc<TransportConfig>,
    store: Arc<dyn CertificateStore>,
}

impl RequestBuilder {
    pub fn new(config: Arc<TransportConfig>, store: Arc<dyn CertificateStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn build(&self, descriptor: &RequestDescriptor) -> Result<WireRequest, BuildError> {
        let url = rewrite_scheme(&descriptor.url, self.config.secure)?;
        let mut wire = WireRequest::new(descriptor.method, url.as_str(), self.config.timeout());
        wire.response_encoding = descriptor.encoding;
        wire.max_redirects = self.config.max_redirects;

        wire.set_header(
            HEADER_CONTENT_TYPE,
            format!(
                "application/{};charset={}",
                descriptor.content_kind.subtype(),
                descriptor.encoding.charset_name()
            ),
        );
        wire.set_header(HEADER_CLIENT_IP, self.config.client_ip().to_string());
        if let Some(token) = non_blank(descriptor.auth_token.as_deref()) {
            wire.set_header(HEADER_AUTH_TOKEN, checked_header(HEADER_AUTH_TOKEN, token)?);
        }
        if let Some(route) = non_blank(descriptor.api_route.as_deref()) {
            wire.set_header(HEADER_API_ROUTE, checked_header(HEADER_API_ROUTE, route)?);
        }
        if let Some(credentials) = &descriptor.credentials {
            wire.set_header(HEADER_AUTHORIZATION, authorization_value(credentials)?);
        }
        wire.set_header(HEADER_ACCEPT_ENCODING, "gzip, deflate");

        wire.body = match (descriptor.method, &descriptor.body) {
            (HttpMethod::Get, None) => None,
            (HttpMethod::Get, Some(_)) => return Err(BuildError::UnexpectedBody),
            (HttpMethod::Post, None) => return Err(BuildError::MissingBody),
            (HttpMethod::Post, Some(Payload::Text(text))) => {
                Some(WireBody::Bytes(encode_text(text, descriptor.encoding)))
            }
            (HttpMethod::Post, Some(Payload::Multipart(form))) => {
                let body = MultipartBody::encode(form)?;
                wire.set_header(HEADER_CONTENT_TYPE, body.content_type());
                Some(WireBody::Multipart(body))
            }
        };

        if self.config.secure {
            wire.tls = Some(self.tls_settings(&url)?);
        }

        debug!(
            method = descriptor.method.as_str(),
            url = %wire.url,
            headers = ?wire.headers().iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            body_len = wire.body.as_ref().map(WireBody::len).unwrap_or(0),
            client_cert = wire.client_identity().is_some(),
            "built wire request"
        );
        Ok(wire)
    }

    fn tls_settings(&self, url: &Url) -> Result<TlsSettings, BuildError> {
        let role = &self.config.program_role;
        let client_identity = match self.store.load(role)? {
            Some(bundle) => bundle.identity()?,
            None => {
                warn!(role = %role, "no client certificate for role; sending without one");
                None
            }
        };
        let validator = self.config.server_validator()?;
        Ok(TlsSettings {
            client_identity,
            verification: validator.verification(url.host_str().unwrap_or_default()),
        })
    }
}

/// Force `https://` when `secure`, `http://` otherwise, whatever the input.
pub fn rewrite_scheme(raw: &str, secure: bool) -> Result<Url, BuildError> {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    let mut url = Url::parse(&with_scheme).map_err(|e| BuildError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(BuildError::UnsupportedScheme(other.to_string())),
    }
    let scheme = if secure { "https" } else { "http" };
    url.set_scheme(scheme)
        .map_err(|()| BuildError::UnsupportedScheme(scheme.to_string()))?;
    Ok(url)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn checked_header<'a>(name: &str, value: &'a str) -> Result<&'a str, BuildError> {
    if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(BuildError::InvalidHeader {
            name: name.to_string(),
            reason: "value contains control characters".to_string(),
        });
    }
    Ok(value)
}

fn authorization_value(credentials: &Credentials) -> Result<String, BuildError> {
    let value = match credentials {
        Credentials::Basic { username, password } => {
            format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
        }
        Credentials::Authorization(raw) => raw.clone(),
    };
    checked_header(HEADER_AUTHORIZATION, &value)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::certificate::{EmbeddedCertificateStore, ServerVerification};
    use crate::charset::TextEncoding;
    use crate::config::ProgramRole;
    use crate::descriptor::{ContentKind, MultipartForm};

    const CLIENT_PEM: &[u8] = include_bytes!("../tests/fixtures/client.pem");
    const CLIENT_DER: &[u8] = include_bytes!("../tests/fixtures/client.cer");
    const SERVER_PFX: &[u8] = include_bytes!("../tests/fixtures/server.pfx");

    fn builder(config: TransportConfig) -> RequestBuilder {
        let store = EmbeddedCertificateStore::new()
            .with_role(&ProgramRole::Client, CLIENT_PEM)
            .with_role(&ProgramRole::Server, CLIENT_DER)
            .with_role(&ProgramRole::DataServer, SERVER_PFX);
        RequestBuilder::new(
            Arc::new(config.with_client_ip(Ipv4Addr::new(10, 0, 0, 7))),
            Arc::new(store),
        )
    }

    #[test]
    fn insecure_get_matches_plain_request() {
        let wire = builder(TransportConfig::insecure())
            .build(&RequestDescriptor::get("http://svc/api"))
            .unwrap();
        assert_eq!(wire.url, "http://svc/api");
        assert_eq!(wire.method, HttpMethod::Get);
        assert_eq!(wire.content_type(), Some("application/json;charset=utf-8"));
        assert_eq!(wire.header(HEADER_CLIENT_IP), Some("10.0.0.7"));
        assert!(wire.header(HEADER_AUTH_TOKEN).is_none());
        assert!(wire.header(HEADER_API_ROUTE).is_none());
        assert!(wire.tls.is_none());
        assert!(wire.body.is_none());
        assert_eq!(wire.timeout.as_millis(), 100_000);
    }

    #[test]
    fn secure_mode_forces_https_and_attaches_certificate() {
        let d = RequestDescriptor::get("http://svc/api").with_auth_token("tok123");
        let wire = builder(TransportConfig::secure(ProgramRole::Client))
            .build(&d)
            .unwrap();
        assert!(wire.url.starts_with("https://"));
        assert_eq!(wire.header(HEADER_AUTH_TOKEN), Some("tok123"));
        let identity = wire.client_identity().expect("client certificate attached");
        assert_eq!(identity.resource_key(), "Client.client.cer");
        assert_eq!(
            wire.tls.as_ref().map(|t| t.verification.clone()),
            Some(ServerVerification::WebPki)
        );
    }

    #[test]
    fn data_server_presents_its_pkcs12_identity() {
        let wire = builder(TransportConfig::secure(ProgramRole::DataServer))
            .build(&RequestDescriptor::get("http://svc/api"))
            .unwrap();
        let identity = wire.client_identity().expect("archive identity attached");
        assert_eq!(identity.resource_key(), "DataServer.server.pfx");
    }

    #[test]
    fn plain_der_certificate_is_sent_without_identity() {
        let wire = builder(TransportConfig::secure(ProgramRole::Server))
            .build(&RequestDescriptor::get("http://svc/api"))
            .unwrap();
        assert!(wire.tls.is_some());
        assert!(wire.client_identity().is_none());
    }

    #[test]
    fn insecure_mode_downgrades_https() {
        let wire = builder(TransportConfig::insecure())
            .build(&RequestDescriptor::get("HTTPS://svc:8443/api?x=1"))
            .unwrap();
        assert_eq!(wire.url, "http://svc:8443/api?x=1");
    }

    #[test]
    fn url_without_scheme_gets_one() {
        let wire = builder(TransportConfig::secure(ProgramRole::Server))
            .build(&RequestDescriptor::get("svc/api"))
            .unwrap();
        assert_eq!(wire.url, "https://svc/api");
    }

    #[test]
    fn foreign_scheme_is_rejected() {
        let err = builder(TransportConfig::insecure())
            .build(&RequestDescriptor::get("ftp://svc/file"))
            .unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedScheme(ref s) if s == "ftp"));
    }

    #[test]
    fn malformed_url_is_rejected() {
        let err = builder(TransportConfig::insecure())
            .build(&RequestDescriptor::get("http://[::1"))
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidUrl { .. }));
    }

    #[test]
    fn blank_token_and_route_never_reach_the_wire() {
        let d = RequestDescriptor::get("http://svc/api")
            .with_auth_token("   ")
            .with_api_route("");
        let wire = builder(TransportConfig::insecure()).build(&d).unwrap();
        assert!(wire.header(HEADER_AUTH_TOKEN).is_none());
        assert!(wire.header(HEADER_API_ROUTE).is_none());
    }

    #[test]
    fn route_header_is_present_once() {
        let d = RequestDescriptor::get("http://svc/api").with_api_route("orders/list");
        let wire = builder(TransportConfig::insecure()).build(&d).unwrap();
        let count = wire
            .headers()
            .iter()
            .filter(|(k, _)| k == HEADER_API_ROUTE)
            .count();
        assert_eq!(count, 1);
        assert_eq!(wire.header(HEADER_API_ROUTE), Some("orders/list"));
    }

    #[test]
    fn header_injection_is_refused() {
        let d = RequestDescriptor::get("http://svc/api").with_auth_token("a\r\nX-Evil: 1");
        let err = builder(TransportConfig::insecure()).build(&d).unwrap_err();
        assert!(matches!(err, BuildError::InvalidHeader { .. }));
    }

    #[test]
    fn post_body_uses_descriptor_encoding() {
        let d = RequestDescriptor::post_json("http://svc/api", "{}")
            .with_encoding(TextEncoding::Unicode)
            .with_content_kind(ContentKind::OctetStream);
        let wire = builder(TransportConfig::insecure()).build(&d).unwrap();
        assert_eq!(wire.content_type(), Some("application/octet-stream;charset=utf-16"));
        match wire.body {
            Some(WireBody::Bytes(bytes)) => assert_eq!(bytes, vec![b'{', 0, b'}', 0]),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn multipart_body_sets_boundary_content_type() {
        let d = RequestDescriptor::upload("http://svc/upload", MultipartForm::new().field("a", "b"));
        let wire = builder(TransportConfig::insecure()).build(&d).unwrap();
        let ct = wire.content_type().unwrap();
        assert!(ct.starts_with("multipart/form-data; boundary=-"), "{ct}");
        assert!(matches!(wire.body, Some(WireBody::Multipart(_))));
    }

    #[test]
    fn basic_credentials_become_authorization() {
        let d = RequestDescriptor::get("http://svc/api").with_credentials(Credentials::Basic {
            username: "Aladdin".into(),
            password: "open sesame".into(),
        });
        let wire = builder(TransportConfig::insecure()).build(&d).unwrap();
        assert_eq!(
            wire.header(HEADER_AUTHORIZATION),
            Some("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==")
        );
    }

    #[test]
    fn method_body_mismatch_is_a_build_error() {
        let mut get_with_body = RequestDescriptor::get("http://svc/api");
        get_with_body.body = Some(Payload::Text("x".into()));
        assert!(matches!(
            builder(TransportConfig::insecure()).build(&get_with_body),
            Err(BuildError::UnexpectedBody)
        ));

        let mut post_without = RequestDescriptor::post_json("http://svc/api", "x");
        post_without.body = None;
        assert!(matches!(
            builder(TransportConfig::insecure()).build(&post_without),
            Err(BuildError::MissingBody)
        ));
    }

    #[test]
    fn secure_without_bundle_still_builds() {
        let wire = builder(TransportConfig::secure(ProgramRole::Custom("Relay".into())))
            .build(&RequestDescriptor::get("http://svc/api"))
            .unwrap();
        assert!(wire.url.starts_with("https://"));
        assert!(wire.client_identity().is_none());
    }

    #[test]
    fn explicit_trust_any_disables_verification() {
        let config = TransportConfig::secure(ProgramRole::Client).trusting_any_server_certificate();
        let wire = builder(config).build(&RequestDescriptor::get("svc/api")).unwrap();
        assert_eq!(
            wire.tls.map(|t| t.verification),
            Some(ServerVerification::Disabled)
        );
    }

    #[test]
    fn descriptor_is_reusable() {
        let d = RequestDescriptor::post_json("http://svc/api", "{\"a\":1}");
        let b = builder(TransportConfig::insecure());
        let first = b.build(&d).unwrap();
        let second = b.build(&d).unwrap();
        assert_eq!(first.url, second.url);
        assert_eq!(d.url, "http://svc/api");
    }
}
