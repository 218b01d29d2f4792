//! Text encodings understood on both sides of the wire.
//!
//! Request bodies are encoded with the descriptor's `TextEncoding`; response
//! bodies are decoded by charset label. Labels are matched case-insensitively
//! and a byte-order mark in the response always wins over the label.
//!
//! Responses may declare any charset. Labels naming a `TextEncoding` decode
//! with its rules (UTF-7 and UTF-32 are only known here); every other label
//! is resolved by `encoding_rs` against the WHATWG registry.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Byte encoding for request bodies and the declared request charset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextEncoding {
    Ascii,
    BigEndianUnicode,
    Unicode,
    Utf32,
    Utf7,
    #[default]
    Utf8,
    SystemDefault,
}

impl TextEncoding {
    /// Charset name placed in `Content-Type`.
    pub fn charset_name(self) -> &'static str {
        match self {
            TextEncoding::Ascii => "us-ascii",
            TextEncoding::BigEndianUnicode => "utf-16BE",
            TextEncoding::Unicode => "utf-16",
            TextEncoding::Utf32 => "utf-32",
            TextEncoding::Utf7 => "utf-7",
            // The host default is UTF-8 on every platform this engine targets.
            TextEncoding::Utf8 | TextEncoding::SystemDefault => "utf-8",
        }
    }

    /// Look up an encoding by charset label.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().trim_matches(|c| c == '"' || c == '\'');
        let encoding = match label.to_ascii_lowercase().as_str() {
            "us-ascii" | "ascii" | "ansi_x3.4-1968" => TextEncoding::Ascii,
            "utf-16be" | "unicodefffe" => TextEncoding::BigEndianUnicode,
            "utf-16" | "utf-16le" | "unicode" => TextEncoding::Unicode,
            "utf-32" | "utf-32le" => TextEncoding::Utf32,
            "utf-7" | "unicode-1-1-utf-7" => TextEncoding::Utf7,
            "utf-8" | "utf8" => TextEncoding::Utf8,
            _ => return None,
        };
        Some(encoding)
    }

    /// Encode `text` into bytes. Unrepresentable ASCII characters become `?`.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            TextEncoding::BigEndianUnicode => {
                text.encode_utf16().flat_map(u16::to_be_bytes).collect()
            }
            TextEncoding::Unicode => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            TextEncoding::Utf32 => text.chars().flat_map(|c| (c as u32).to_le_bytes()).collect(),
            TextEncoding::Utf7 => utf7_encode(text).into_bytes(),
            TextEncoding::Utf8 | TextEncoding::SystemDefault => text.as_bytes().to_vec(),
        }
    }

    /// Decode `bytes` as this encoding. Invalid sequences become U+FFFD.
    pub fn decode(self, bytes: &[u8]) -> Result<String, DecodeError> {
        let text = match self {
            TextEncoding::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '?' })
                .collect(),
            TextEncoding::BigEndianUnicode => decode_utf16(bytes, u16::from_be_bytes),
            TextEncoding::Unicode => decode_utf16(bytes, u16::from_le_bytes),
            TextEncoding::Utf32 => bytes
                .chunks(4)
                .map(|chunk| match <[u8; 4]>::try_from(chunk) {
                    Ok(quad) => char::from_u32(u32::from_le_bytes(quad))
                        .unwrap_or(char::REPLACEMENT_CHARACTER),
                    Err(_) => char::REPLACEMENT_CHARACTER,
                })
                .collect(),
            TextEncoding::Utf7 => utf7_decode(bytes)?,
            TextEncoding::Utf8 | TextEncoding::SystemDefault => {
                String::from_utf8_lossy(bytes).into_owned()
            }
        };
        Ok(text)
    }
}

/// Decode a response body using `label`, honouring a leading byte-order mark.
pub fn decode_with_label(bytes: &[u8], label: &str) -> Result<String, DecodeError> {
    if let Some((encoding, bom_len)) = sniff_bom(bytes) {
        return encoding.decode(&bytes[bom_len..]);
    }
    if let Some(encoding) = TextEncoding::from_label(label) {
        return encoding.decode(bytes);
    }
    let trimmed = label.trim().trim_matches(|c| c == '"' || c == '\'');
    match Encoding::for_label(trimmed.as_bytes()) {
        // `replacement` stands for charsets that must not be decoded.
        Some(encoding) if encoding != encoding_rs::REPLACEMENT => {
            let (text, _) = encoding.decode_without_bom_handling(bytes);
            Ok(text.into_owned())
        }
        _ => Err(DecodeError::UnsupportedCharset(label.to_string())),
    }
}

fn sniff_bom(bytes: &[u8]) -> Option<(TextEncoding, usize)> {
    match bytes {
        [0xEF, 0xBB, 0xBF, ..] => Some((TextEncoding::Utf8, 3)),
        [0xFF, 0xFE, 0x00, 0x00, ..] => Some((TextEncoding::Utf32, 4)),
        [0xFF, 0xFE, ..] => Some((TextEncoding::Unicode, 2)),
        [0xFE, 0xFF, ..] => Some((TextEncoding::BigEndianUnicode, 2)),
        _ => None,
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    let mut text = String::from_utf16_lossy(&units);
    if bytes.len() % 2 == 1 {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    text
}

// RFC 2152 set D plus the whitespace characters that may appear directly.
fn utf7_direct(c: char) -> bool {
    c.is_ascii_alphanumeric() || "'(),-./:? \t\r\n".contains(c)
}

fn utf7_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending: Vec<u16> = Vec::new();

    let flush = |pending: &mut Vec<u16>, out: &mut String| {
        if pending.is_empty() {
            return;
        }
        let bytes: Vec<u8> = pending.iter().flat_map(|u| u.to_be_bytes()).collect();
        out.push('+');
        out.push_str(&STANDARD_NO_PAD.encode(bytes));
        out.push('-');
        pending.clear();
    };

    for c in text.chars() {
        if c == '+' {
            flush(&mut pending, &mut out);
            out.push_str("+-");
        } else if utf7_direct(c) {
            flush(&mut pending, &mut out);
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            pending.extend_from_slice(c.encode_utf16(&mut buf));
        }
    }
    flush(&mut pending, &mut out);
    out
}

fn utf7_decode(bytes: &[u8]) -> Result<String, DecodeError> {
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b != b'+' {
            out.push(if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER });
            i += 1;
            continue;
        }
        i += 1;
        if bytes.get(i) == Some(&b'-') {
            out.push('+');
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'+' || bytes[i] == b'/') {
            i += 1;
        }
        let decoded = STANDARD_NO_PAD
            .decode(&bytes[start..i])
            .map_err(|e| DecodeError::InvalidText {
                charset: "utf-7",
                reason: e.to_string(),
            })?;
        out.push_str(&decode_utf16(&decoded, u16::from_be_bytes));
        if bytes.get(i) == Some(&b'-') {
            i += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charset_names_match_wire_labels() {
        assert_eq!(TextEncoding::Utf8.charset_name(), "utf-8");
        assert_eq!(TextEncoding::SystemDefault.charset_name(), "utf-8");
        assert_eq!(TextEncoding::Ascii.charset_name(), "us-ascii");
        assert_eq!(TextEncoding::Unicode.charset_name(), "utf-16");
    }

    #[test]
    fn labels_are_case_and_quote_insensitive() {
        assert_eq!(TextEncoding::from_label("\"UTF-8\""), Some(TextEncoding::Utf8));
        assert_eq!(TextEncoding::from_label("utf-16BE"), Some(TextEncoding::BigEndianUnicode));
        assert_eq!(TextEncoding::from_label("koi8-r"), None);
    }

    #[test]
    fn ascii_replaces_non_ascii() {
        assert_eq!(TextEncoding::Ascii.encode("café"), b"caf?".to_vec());
    }

    #[test]
    fn utf16_variants_use_their_byte_order() {
        assert_eq!(TextEncoding::Unicode.encode("A"), vec![0x41, 0x00]);
        assert_eq!(TextEncoding::BigEndianUnicode.encode("A"), vec![0x00, 0x41]);
        assert_eq!(TextEncoding::Unicode.decode(&[0x41, 0x00, 0x42, 0x00]).unwrap(), "AB");
    }

    #[test]
    fn utf32_decodes_astral_characters() {
        let bytes = TextEncoding::Utf32.encode("a😀");
        assert_eq!(bytes.len(), 8);
        assert_eq!(TextEncoding::Utf32.decode(&bytes).unwrap(), "a😀");
    }

    #[test]
    fn utf7_matches_rfc_2152_examples() {
        assert_eq!(utf7_encode("Hi Mom -☺-!"), "Hi Mom -+Jjo--+ACE-");
        assert_eq!(utf7_encode("1 + 1"), "1 +- 1");
        assert_eq!(utf7_decode(b"Hi Mom -+Jjo--!").unwrap(), "Hi Mom -☺-!");
        assert_eq!(utf7_decode(b"A+ImIDkQ.").unwrap(), "A\u{2262}\u{391}.");
    }

    #[test]
    fn bom_overrides_declared_label() {
        let mut body = vec![0xFF, 0xFE];
        body.extend(TextEncoding::Unicode.encode("ok"));
        assert_eq!(decode_with_label(&body, "utf-8").unwrap(), "ok");
    }

    #[test]
    fn latin1_is_accepted_for_responses() {
        assert_eq!(decode_with_label(&[0x63, 0xE9], "ISO-8859-1").unwrap(), "cé");
    }

    #[test]
    fn registry_charsets_decode_ascii_json() {
        for label in ["windows-1252", "euc-kr", "shift_jis", "koi8-r", "GB2312"] {
            assert_eq!(
                decode_with_label(br#"{"result":true}"#, label).unwrap(),
                r#"{"result":true}"#,
                "{label}"
            );
        }
    }

    #[test]
    fn registry_charsets_decode_their_own_bytes() {
        assert_eq!(decode_with_label(&[0x80], "windows-1252").unwrap(), "€");
        assert_eq!(decode_with_label(&[0x82, 0xA0], "Shift_JIS").unwrap(), "あ");
        assert_eq!(decode_with_label(&[0xC7, 0xD1], "euc-kr").unwrap(), "한");
    }

    #[test]
    fn unknown_label_is_a_decode_error() {
        let err = decode_with_label(b"x", "x-unknown").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedCharset(ref l) if l == "x-unknown"));
    }

    #[test]
    fn undecodable_charset_is_a_decode_error() {
        let err = decode_with_label(b"x", "iso-2022-kr").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedCharset(_)));
    }
}
