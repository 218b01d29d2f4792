//! Local SX-style service used by the engine's integration tests.
//!
//! Every JSON route answers with an `ApiResult`-shaped document
//! (`result`, `message`, `systemTime`, ...). The remaining routes produce the
//! response shapes the decoder must handle: raw-deflate `application/zip`,
//! gzip content encoding, non-UTF-8 charsets, empty bodies and error statuses.

use std::collections::BTreeMap;
use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::Bytes,
    extract::Path,
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Text served by the `/charset/{name}` route.
pub const CHARSET_SAMPLE: &str = "h\u{e9}llo w\u{f6}rld";

/// What `/echo` saw.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoedRequest {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoResult {
    pub result: EchoedRequest,
    pub message: String,
    pub system_time: u64,
}

pub fn app() -> Router {
    Router::new()
        .route("/echo", any(echo))
        .route("/api/result", any(api_result))
        .route("/delay/{ms}", any(delay))
        .route("/zip/{text}", get(zip))
        .route("/gzip/{text}", get(gzip))
        .route("/charset/{name}", get(charset))
        .route("/empty", any(empty))
        .route("/status/{code}", any(status))
        .route("/upload", post(upload))
        .route("/bytes/{len}", get(bytes))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "mock server listening");
    }
    axum::serve(listener, app()).await
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> Json<EchoResult> {
    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    debug!(%method, len = body.len(), "echo");
    Json(EchoResult {
        result: EchoedRequest {
            method: method.to_string(),
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        },
        message: "ok".to_string(),
        system_time: now_millis(),
    })
}

async fn api_result(headers: HeaderMap) -> Json<Value> {
    let remote_ip = headers
        .get("sx-client-ip")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    Json(json!({
        "result": true,
        "message": "ok",
        "systemTime": now_millis(),
        "remoteIp": remote_ip,
        "index": 0,
        "totalCount": 1,
    }))
}

async fn delay(Path(ms): Path<u64>) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Json(json!({ "result": true, "message": format!("slept {ms}ms") }))
}

async fn zip(Path(text): Path<String>) -> Result<Response, StatusCode> {
    let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
    enc.write_all(text.as_bytes())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let body = enc.finish().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(([(header::CONTENT_TYPE, "application/zip")], body).into_response())
}

async fn gzip(Path(text): Path<String>) -> Result<Response, StatusCode> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(text.as_bytes())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let body = enc.finish().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CONTENT_ENCODING, "gzip"),
        ],
        body,
    )
        .into_response())
}

/// Encode `text` in one of the charsets the route supports.
pub fn encode_sample(text: &str, charset: &str) -> Option<Vec<u8>> {
    match charset.to_ascii_lowercase().as_str() {
        "utf-8" => Some(text.as_bytes().to_vec()),
        "utf-16le" | "utf-16" => Some(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
        "utf-16be" => Some(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
        "iso-8859-1" | "latin1" => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).ok())
            .collect(),
        other => {
            let encoding = encoding_rs::Encoding::for_label(other.as_bytes())?;
            let (bytes, _, had_errors) = encoding.encode(text);
            (!had_errors).then(|| bytes.into_owned())
        }
    }
}

async fn charset(Path(name): Path<String>) -> Result<Response, StatusCode> {
    let body = encode_sample(CHARSET_SAMPLE, &name).ok_or(StatusCode::NOT_FOUND)?;
    let content_type = format!("text/plain; charset={name}");
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

async fn empty() -> StatusCode {
    StatusCode::OK
}

async fn status(Path(code): Path<u16>) -> Result<Response, StatusCode> {
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    let body = json!({ "error": code, "message": status.canonical_reason().unwrap_or_default() });
    Ok((status, Json(body)).into_response())
}

/// Sends the request body back with the request's content type.
async fn upload(headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| header::HeaderValue::from_static("application/octet-stream"));
    debug!(len = body.len(), "upload");
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn bytes(Path(len): Path<usize>) -> Response {
    let body: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    ([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response()
}
