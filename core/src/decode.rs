//! Response body decoding.
//!
//! Charset precedence: transport-reported charset, then the `charset=`
//! parameter of `Content-Type`, then the encoding the caller declared.
//! `application/zip` bodies are raw deflate streams; `Content-Encoding`
//! gzip/deflate is undone transparently.

use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

use crate::charset::{decode_with_label, TextEncoding};
use crate::error::DecodeError;
use crate::http::ResponseMeta;

/// Content type whose body is a raw deflate stream.
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Pick the charset label for a response.
pub fn resolve_charset(meta: &ResponseMeta, default: TextEncoding) -> String {
    meta.reported_charset
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .or_else(|| meta.content_type.as_deref().and_then(charset_param))
        .unwrap_or_else(|| default.charset_name().to_string())
}

/// Extract `charset=` from a content type, without surrounding quotes.
pub fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

/// Read `body` to completion and decode it to text.
pub fn decode<R: Read>(
    mut body: R,
    meta: &ResponseMeta,
    default: TextEncoding,
) -> Result<String, DecodeError> {
    if meta.content_length == Some(0) {
        return Ok(String::new());
    }

    let mut raw = Vec::new();
    body.read_to_end(&mut raw).map_err(DecodeError::Read)?;
    if raw.is_empty() {
        return Ok(String::new());
    }

    let raw = match meta.content_encoding.as_deref().map(str::trim) {
        Some(enc) if enc.eq_ignore_ascii_case("gzip") || enc.eq_ignore_ascii_case("x-gzip") => {
            inflate_gzip(&raw)?
        }
        Some(enc) if enc.eq_ignore_ascii_case("deflate") => inflate_http_deflate(&raw)?,
        _ => raw,
    };

    let is_zip = meta
        .content_type
        .as_deref()
        .is_some_and(|ct| media_type(ct).eq_ignore_ascii_case(ZIP_CONTENT_TYPE));
    let raw = if is_zip { inflate_raw(&raw)? } else { raw };

    decode_with_label(&raw, &resolve_charset(meta, default))
}

fn inflate_raw(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    DeflateDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|source| DecodeError::Decompression {
            algorithm: "deflate",
            source,
        })?;
    Ok(out)
}

fn inflate_gzip(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|source| DecodeError::Decompression {
            algorithm: "gzip",
            source,
        })?;
    Ok(out)
}

// `Content-Encoding: deflate` is zlib-wrapped per RFC 9110, but some servers
// send raw deflate.
fn inflate_http_deflate(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    if ZlibDecoder::new(data).read_to_end(&mut out).is_ok() {
        return Ok(out);
    }
    inflate_raw(data)
}
