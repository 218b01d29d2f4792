//! Request body encoding.
//!
//! Text bodies are encoded in one go. Multipart bodies are laid out up front
//! as a list of segments: the part headers live in memory while file contents
//! stay on disk and are streamed when the body is read, so the exact
//! `Content-Length` is known before a single byte is written.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::charset::TextEncoding;
use crate::descriptor::MultipartForm;
use crate::error::BuildError;

/// Largest slice of a file handed out per `read` call.
pub const FILE_CHUNK_SIZE: usize = 4096;

/// Encode a text body with the request's encoding.
pub fn encode_text(text: &str, encoding: TextEncoding) -> Vec<u8> {
    encoding.encode(text)
}

/// A boundary token unique within this process.
///
/// Derived from the wall clock in nanoseconds, bumped when two calls land on
/// the same tick so tokens are strictly increasing.
pub fn next_boundary() -> String {
    static LAST: AtomicU64 = AtomicU64::new(0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let prev = LAST
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    format!("---------------------------{:016x}", now.max(prev + 1))
}

/// Quoted-string content for a `Content-Disposition` parameter.
///
/// Line breaks cannot be escaped inside a part header and are rejected.
fn disposition_param(param: &str, value: &str) -> Result<String, BuildError> {
    if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(BuildError::InvalidHeader {
            name: format!("Content-Disposition {param}"),
            reason: "value contains control characters".to_string(),
        });
    }
    Ok(value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[derive(Debug)]
enum Segment {
    Bytes(Vec<u8>),
    File { path: PathBuf, len: u64 },
}

impl Segment {
    fn len(&self) -> u64 {
        match self {
            Segment::Bytes(bytes) => bytes.len() as u64,
            Segment::File { len, .. } => *len,
        }
    }
}

/// A `multipart/form-data` body with a precomputed length.
#[derive(Debug)]
pub struct MultipartBody {
    boundary: String,
    segments: Vec<Segment>,
    content_length: u64,
    // read cursor
    index: usize,
    offset: usize,
    file: Option<io::Take<File>>,
}

impl MultipartBody {
    /// Lay out `form`; file sizes are taken from metadata now.
    pub fn encode(form: &MultipartForm) -> Result<Self, BuildError> {
        let boundary = next_boundary();
        let mut segments = Vec::with_capacity(form.fields.len() + form.files.len() * 3 + 1);

        for (name, value) in &form.fields {
            let name = disposition_param("name", name)?;
            segments.push(Segment::Bytes(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .into_bytes(),
            ));
        }

        for path in &form.files {
            let len = std::fs::metadata(path)
                .map_err(|source| BuildError::MultipartFile {
                    path: path.display().to_string(),
                    source,
                })?
                .len();
            let filename = disposition_param("filename", &path.display().to_string())?;
            segments.push(Segment::Bytes(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .into_bytes(),
            ));
            segments.push(Segment::File {
                path: path.clone(),
                len,
            });
            segments.push(Segment::Bytes(b"\r\n".to_vec()));
        }

        segments.push(Segment::Bytes(format!("--{boundary}--\r\n").into_bytes()));

        let content_length = segments.iter().map(Segment::len).sum();
        Ok(Self {
            boundary,
            segments,
            content_length,
            index: 0,
            offset: 0,
            file: None,
        })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }
}

impl Read for MultipartBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while let Some(segment) = self.segments.get(self.index) {
            match segment {
                Segment::Bytes(bytes) => {
                    let rest = &bytes[self.offset..];
                    if rest.is_empty() {
                        self.index += 1;
                        self.offset = 0;
                        continue;
                    }
                    let n = rest.len().min(buf.len());
                    buf[..n].copy_from_slice(&rest[..n]);
                    self.offset += n;
                    return Ok(n);
                }
                Segment::File { path, len } => {
                    if self.file.is_none() {
                        self.file = Some(File::open(path)?.take(*len));
                    }
                    let limit = buf.len().min(FILE_CHUNK_SIZE);
                    let n = match self.file.as_mut() {
                        Some(file) => file.read(&mut buf[..limit])?,
                        None => 0,
                    };
                    if n > 0 {
                        return Ok(n);
                    }
                    let short = self.file.take().map(|f| f.limit()).unwrap_or(0);
                    if short > 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("{} shrank while being uploaded", path.display()),
                        ));
                    }
                    self.index += 1;
                }
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn read_all(mut body: MultipartBody) -> Vec<u8> {
        let mut out = Vec::new();
        body.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn boundaries_are_unique_and_fixed_width() {
        let a = next_boundary();
        let b = next_boundary();
        assert_ne!(a, b);
        assert_eq!(a.len(), b.len());
        assert!(a.trim_start_matches('-').chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn empty_form_is_just_the_closing_delimiter() {
        let body = MultipartBody::encode(&MultipartForm::new()).unwrap();
        let expected = format!("--{}--\r\n", body.boundary());
        assert_eq!(body.content_length(), expected.len() as u64);
        assert_eq!(read_all(body), expected.into_bytes());
    }

    #[test]
    fn fields_and_file_are_laid_out_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\x00\x01payload").unwrap();
        let form = MultipartForm::new().field("kind", "log").file(file.path());

        let body = MultipartBody::encode(&form).unwrap();
        let b = body.boundary().to_string();
        let declared = body.content_length();
        let bytes = read_all(body);

        let mut expected = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"kind\"\r\n\r\nlog\r\n--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            file.path().display()
        )
        .into_bytes();
        expected.extend_from_slice(b"\x00\x01payload\r\n");
        expected.extend_from_slice(format!("--{b}--\r\n").as_bytes());

        assert_eq!(bytes, expected);
        assert_eq!(declared, bytes.len() as u64);
    }

    #[test]
    fn large_file_is_streamed_in_chunks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let payload: Vec<u8> = (0..3 * FILE_CHUNK_SIZE + 17).map(|i| (i % 251) as u8).collect();
        file.write_all(&payload).unwrap();

        let mut body = MultipartBody::encode(&MultipartForm::new().file(file.path())).unwrap();
        let mut buf = vec![0u8; 64 * 1024];
        let mut largest = 0;
        let mut total = 0;
        loop {
            let n = body.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            largest = largest.max(n);
            total += n;
        }
        assert_eq!(largest, FILE_CHUNK_SIZE);
        assert_eq!(total as u64, body.content_length());
    }

    #[test]
    fn missing_file_is_a_build_error() {
        let form = MultipartForm::new().file("/definitely/not/here.bin");
        let err = MultipartBody::encode(&form).unwrap_err();
        assert!(matches!(err, BuildError::MultipartFile { .. }));
    }

    #[test]
    fn quotes_in_field_names_are_escaped() {
        let form = MultipartForm::new().field(r#"say "hi" \ bye"#, "v");
        let body = MultipartBody::encode(&form).unwrap();
        let b = body.boundary().to_string();
        let text = String::from_utf8(read_all(body)).unwrap();
        assert_eq!(
            text,
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"say \\\"hi\\\" \\\\ bye\"\r\n\r\nv\r\n--{b}--\r\n"
            )
        );
    }

    #[test]
    fn line_breaks_in_field_names_are_rejected() {
        let form = MultipartForm::new().field("a\"\r\nX-Injected: 1\r\n\r\nfake", "v");
        let err = MultipartBody::encode(&form).unwrap_err();
        assert!(matches!(err, BuildError::InvalidHeader { .. }), "{err}");
    }

    #[test]
    fn line_breaks_in_file_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evil\r\nX-Injected: 1");
        std::fs::write(&path, b"x").unwrap();
        let err = MultipartBody::encode(&MultipartForm::new().file(&path)).unwrap_err();
        assert!(matches!(err, BuildError::InvalidHeader { .. }), "{err}");
    }

    #[test]
    fn encode_text_uses_requested_encoding() {
        assert_eq!(encode_text("hi", TextEncoding::Unicode), vec![b'h', 0, b'i', 0]);
        assert_eq!(encode_text("{}", TextEncoding::Utf8), b"{}".to_vec());
    }
}
