//! Verify request building and response decoding against JSON vectors in `test-vectors/`.
//!
//! Each build case pairs a config and descriptor (in their serde forms) with
//! either the expected wire request or the expected `BuildError` variant.
//! Each decode case pairs response metadata and a hex body with the text the
//! decoder must produce.

use std::io::Read;
use std::sync::Arc;

use sx_http_core::decode::decode;
use sx_http_core::http::{ResponseMeta, WireBody};
use sx_http_core::{
    BuildError, EmbeddedCertificateStore, ProgramRole, RequestBuilder, RequestDescriptor,
    TextEncoding, TransportConfig,
};

const CLIENT_PEM: &[u8] = include_bytes!("fixtures/client.pem");

fn from_hex(hex: &str) -> Vec<u8> {
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
        .collect()
}

fn error_name(err: &BuildError) -> &'static str {
    match err {
        BuildError::InvalidUrl { .. } => "InvalidUrl",
        BuildError::UnsupportedScheme(_) => "UnsupportedScheme",
        BuildError::MissingBody => "MissingBody",
        BuildError::UnexpectedBody => "UnexpectedBody",
        BuildError::Certificate { .. } => "Certificate",
        BuildError::InvalidHeader { .. } => "InvalidHeader",
        BuildError::MultipartFile { .. } => "MultipartFile",
    }
}

fn builder(config: TransportConfig) -> RequestBuilder {
    let store = EmbeddedCertificateStore::new().with_role(&ProgramRole::Client, CLIENT_PEM);
    RequestBuilder::new(Arc::new(config), Arc::new(store))
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

#[test]
fn build_test_vectors() {
    let raw = include_str!("../../test-vectors/build.json");
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let config: TransportConfig = serde_json::from_value(case["config"].clone()).unwrap();
        let descriptor: RequestDescriptor =
            serde_json::from_value(case["descriptor"].clone()).unwrap();

        let result = builder(config).build(&descriptor);

        if let Some(expected) = case["expected_error"].as_str() {
            let err = result.expect_err(name);
            assert_eq!(error_name(&err), expected, "{name}: error variant");
            continue;
        }

        let mut wire = result.unwrap_or_else(|e| panic!("{name}: {e}"));
        let expected = &case["expected_request"];
        assert_eq!(wire.method.as_str(), expected["method"].as_str().unwrap(), "{name}: method");
        assert_eq!(wire.url, expected["url"].as_str().unwrap(), "{name}: url");

        let expected_headers: Vec<(String, String)> = expected["headers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| {
                let arr = h.as_array().unwrap();
                (arr[0].as_str().unwrap().to_string(), arr[1].as_str().unwrap().to_string())
            })
            .collect();
        assert_eq!(wire.headers(), &expected_headers[..], "{name}: headers");

        let body = match wire.body.take() {
            None => None,
            Some(WireBody::Bytes(bytes)) => Some(bytes),
            Some(WireBody::Multipart(mut multipart)) => {
                let mut bytes = Vec::new();
                multipart.read_to_end(&mut bytes).unwrap();
                Some(bytes)
            }
        };
        assert_eq!(body, expected["body_hex"].as_str().map(from_hex), "{name}: body");

        assert_eq!(
            wire.client_identity().is_some(),
            expected["client_cert"].as_bool().unwrap(),
            "{name}: client certificate"
        );
        assert_eq!(
            wire.timeout.as_millis() as u64,
            expected["timeout_ms"].as_u64().unwrap(),
            "{name}: timeout"
        );
    }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

#[test]
fn decode_test_vectors() {
    let raw = include_str!("../../test-vectors/decode.json");
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let text_field = |key: &str| case[key].as_str().map(str::to_string);
        let body = from_hex(case["body_hex"].as_str().unwrap());
        let meta = ResponseMeta {
            status: 200,
            content_type: text_field("content_type"),
            content_encoding: text_field("content_encoding"),
            reported_charset: text_field("reported_charset"),
            content_length: Some(body.len() as u64),
        };
        let declared: TextEncoding =
            serde_json::from_value(case["declared_encoding"].clone()).unwrap();

        let text = decode(&body[..], &meta, declared).unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(text, case["expected_text"].as_str().unwrap(), "{name}: text");
    }
}
