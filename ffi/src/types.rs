//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Clients and requests are opaque handles owning core values. Enums mirror
//! the core enums with explicit discriminants so C headers stay stable.
//! Completion events are handed to C callbacks as a borrowed `FfiCompletion`
//! that is only valid for the duration of the callback.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;

use sx_http_core::{
    CompletionEvent, ContentKind, HttpMethod, RequestDescriptor, SxClient, TextEncoding,
};
use tokio::runtime::Runtime;

/// Opaque handle to an `SxClient` and the runtime its async calls run on.
pub struct FfiSxClient {
    pub(crate) inner: SxClient,
    pub(crate) runtime: Runtime,
}

/// Opaque handle to a request descriptor under construction.
pub struct FfiRequest {
    pub(crate) inner: RequestDescriptor,
}

/// HTTP method as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiHttpMethod {
    Get = 0,
    Post = 1,
}

impl From<FfiHttpMethod> for HttpMethod {
    fn from(m: FfiHttpMethod) -> Self {
        match m {
            FfiHttpMethod::Get => HttpMethod::Get,
            FfiHttpMethod::Post => HttpMethod::Post,
        }
    }
}

/// Text encoding of request bodies, and default for responses.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiTextEncoding {
    Ascii = 0,
    BigEndianUnicode = 1,
    Unicode = 2,
    Utf32 = 3,
    Utf7 = 4,
    Utf8 = 5,
    SystemDefault = 6,
}

impl From<FfiTextEncoding> for TextEncoding {
    fn from(e: FfiTextEncoding) -> Self {
        match e {
            FfiTextEncoding::Ascii => TextEncoding::Ascii,
            FfiTextEncoding::BigEndianUnicode => TextEncoding::BigEndianUnicode,
            FfiTextEncoding::Unicode => TextEncoding::Unicode,
            FfiTextEncoding::Utf32 => TextEncoding::Utf32,
            FfiTextEncoding::Utf7 => TextEncoding::Utf7,
            FfiTextEncoding::Utf8 => TextEncoding::Utf8,
            FfiTextEncoding::SystemDefault => TextEncoding::SystemDefault,
        }
    }
}

/// `application/{json|octet-stream}` request content type.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiContentKind {
    Json = 0,
    OctetStream = 1,
}

impl From<FfiContentKind> for ContentKind {
    fn from(k: FfiContentKind) -> Self {
        match k {
            FfiContentKind::Json => ContentKind::Json,
            FfiContentKind::OctetStream => ContentKind::OctetStream,
        }
    }
}

/// Status codes returned by setters and dispatch functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    NullArg = 1,
    InvalidUtf8 = 2,
    InvalidArg = 3,
    Panic = 4,
}

/// Completion event passed to `SxCompletionCallback`.
///
/// All pointers are borrowed and only valid during the callback; copy what
/// you need to keep.
#[repr(C)]
pub struct FfiCompletion {
    pub success: bool,
    pub response: *const c_char,
    pub call_id: *const c_char,
    pub url: *const c_char,
}

/// Called exactly once per async call, from a runtime worker thread.
pub type SxCompletionCallback =
    extern "C" fn(user_data: *mut c_void, completion: *const FfiCompletion);

/// Caller-owned context pointer carried to the callback thread.
pub(crate) struct UserData(pub(crate) *mut c_void);

// The C caller guarantees `user_data` may be used from another thread.
unsafe impl Send for UserData {}

/// Invoke `callback` with a borrowed view of `event`.
pub(crate) fn deliver(callback: SxCompletionCallback, user_data: UserData, event: &CompletionEvent) {
    let response = c_string_lossy(&event.response);
    let call_id = c_string_lossy(&event.source.id.to_string());
    let url = c_string_lossy(&event.source.url);
    let completion = FfiCompletion {
        success: event.success_request,
        response: response.as_ptr(),
        call_id: call_id.as_ptr(),
        url: url.as_ptr(),
    };
    callback(user_data.0, &completion);
}

/// `CString` with interior NULs dropped.
pub(crate) fn c_string_lossy(s: &str) -> CString {
    CString::new(s).unwrap_or_else(|_| {
        CString::new(s.replace('\0', "")).unwrap_or_default()
    })
}
