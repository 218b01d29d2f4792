//! C-ABI wrapper around `sx-http-core`.
//!
//! # Overview
//! Exposes the SX request engine through `extern "C"` functions: create a
//! client from a JSON config, describe a request through setters, then send
//! it synchronously or asynchronously with a C completion callback.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Each client owns a multi-threaded tokio runtime for its async calls, so
//!   C hosts need no runtime of their own.
//! - `sx_send` mirrors the core sync path: null means "not sent", otherwise
//!   the decoded body or the `[REQUEST ERROR] ...` sentinel.
//! - The C caller owns all returned pointers and must call the matching
//!   `sx_*_free` function to release them.

pub mod types;

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use sx_http_core::certificate::resource_key;
use sx_http_core::{
    CertificateStore, Credentials, DirectoryCertificateStore, EmbeddedCertificateStore,
    MultipartForm, Payload, RequestDescriptor, SxClient, TransportConfig,
};

use types::*;

/// Borrow a C string as UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn c_str<'a>(ptr: *const c_char) -> Result<&'a str, FfiErrorCode> {
    if ptr.is_null() {
        return Err(FfiErrorCode::NullArg);
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| FfiErrorCode::InvalidUtf8)
}

fn build_client(config_json: *const c_char, store: Arc<dyn CertificateStore>) -> *mut FfiSxClient {
    let config = if config_json.is_null() {
        TransportConfig::insecure()
    } else {
        let Ok(json) = (unsafe { c_str(config_json) }) else {
            return std::ptr::null_mut();
        };
        match TransportConfig::from_json(json) {
            Ok(config) => config,
            Err(_) => return std::ptr::null_mut(),
        }
    };
    let Ok(runtime) = tokio::runtime::Builder::new_multi_thread()
        .thread_name("sx-http")
        .enable_all()
        .build()
    else {
        return std::ptr::null_mut();
    };
    let inner = SxClient::new(config, store).with_runtime(runtime.handle().clone());
    Box::into_raw(Box::new(FfiSxClient { inner, runtime }))
}

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a client from a JSON `TransportConfig` document.
///
/// `config_json` may be null for a plain-HTTP client with defaults.
/// `cert_dir` may be null; otherwise client certificates are loaded from
/// `<cert_dir>/<role>.client.cer` (DER or PEM) or `<cert_dir>/<role>.server.pfx`
/// (PKCS#12).
/// Returns null if the config does not parse or if an internal panic occurs.
/// The caller must free the returned pointer with `sx_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn sx_client_new(
    config_json: *const c_char,
    cert_dir: *const c_char,
) -> *mut FfiSxClient {
    catch_unwind(|| {
        let store: Arc<dyn CertificateStore> = if cert_dir.is_null() {
            Arc::new(EmbeddedCertificateStore::new())
        } else {
            match unsafe { c_str(cert_dir) } {
                Ok(dir) => Arc::new(DirectoryCertificateStore::new(PathBuf::from(dir))),
                Err(_) => return std::ptr::null_mut(),
            }
        };
        build_client(config_json, store)
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Create a client whose certificate for the configured role is
/// `cert[..cert_len]`, in the format the role's resource file uses.
///
/// Returns null if `cert` is null, the config does not parse, or on panic.
#[unsafe(no_mangle)]
pub extern "C" fn sx_client_new_with_certificate(
    config_json: *const c_char,
    cert: *const u8,
    cert_len: usize,
) -> *mut FfiSxClient {
    catch_unwind(|| {
        if cert.is_null() {
            return std::ptr::null_mut();
        }
        let cert = unsafe { std::slice::from_raw_parts(cert, cert_len) }.to_vec();
        let role = if config_json.is_null() {
            TransportConfig::insecure().program_role
        } else {
            match unsafe { c_str(config_json) }.ok().map(TransportConfig::from_json) {
                Some(Ok(config)) => config.program_role,
                _ => return std::ptr::null_mut(),
            }
        };
        let mut store = EmbeddedCertificateStore::new();
        store.insert(resource_key(&role), cert);
        build_client(config_json, Arc::new(store))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a client. Pending async calls are cancelled and their callbacks
/// receive a failure. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn sx_client_free(client: *mut FfiSxClient) {
    if !client.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let FfiSxClient { inner, runtime } = *unsafe { Box::from_raw(client) };
            drop(inner);
            runtime.shutdown_background();
        }));
    }
}

// ---------------------------------------------------------------------------
// Request descriptors
// ---------------------------------------------------------------------------

/// Start describing a request to `url`.
///
/// Returns null if `url` is null or not UTF-8.
/// The caller must free the returned pointer with `sx_request_free`.
#[unsafe(no_mangle)]
pub extern "C" fn sx_request_new(method: FfiHttpMethod, url: *const c_char) -> *mut FfiRequest {
    catch_unwind(|| {
        let Ok(url) = (unsafe { c_str(url) }) else {
            return std::ptr::null_mut();
        };
        let mut inner = RequestDescriptor::get(url);
        inner.method = method.into();
        Box::into_raw(Box::new(FfiRequest { inner }))
    })
    .unwrap_or(std::ptr::null_mut())
}

fn with_request(
    req: *mut FfiRequest,
    f: impl FnOnce(&mut RequestDescriptor) -> Result<(), FfiErrorCode>,
) -> FfiErrorCode {
    if req.is_null() {
        return FfiErrorCode::NullArg;
    }
    catch_unwind(AssertUnwindSafe(|| {
        let req = unsafe { &mut *req };
        match f(&mut req.inner) {
            Ok(()) => FfiErrorCode::Ok,
            Err(code) => code,
        }
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Set a text body. Replaces any multipart content.
#[unsafe(no_mangle)]
pub extern "C" fn sx_request_set_body(req: *mut FfiRequest, body: *const c_char) -> FfiErrorCode {
    with_request(req, |d| {
        d.body = Some(Payload::Text(unsafe { c_str(body) }?.to_string()));
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn sx_request_set_encoding(
    req: *mut FfiRequest,
    encoding: FfiTextEncoding,
) -> FfiErrorCode {
    with_request(req, |d| {
        d.encoding = encoding.into();
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn sx_request_set_content_kind(
    req: *mut FfiRequest,
    kind: FfiContentKind,
) -> FfiErrorCode {
    with_request(req, |d| {
        d.content_kind = kind.into();
        Ok(())
    })
}

/// Set `SX-Auth-Token`. Null or blank clears it.
#[unsafe(no_mangle)]
pub extern "C" fn sx_request_set_auth_token(
    req: *mut FfiRequest,
    token: *const c_char,
) -> FfiErrorCode {
    with_request(req, |d| {
        d.auth_token = optional_str(token)?;
        Ok(())
    })
}

/// Set `SX-API-ROUTE`. Null or blank clears it.
#[unsafe(no_mangle)]
pub extern "C" fn sx_request_set_api_route(
    req: *mut FfiRequest,
    route: *const c_char,
) -> FfiErrorCode {
    with_request(req, |d| {
        d.api_route = optional_str(route)?;
        Ok(())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn sx_request_set_basic_auth(
    req: *mut FfiRequest,
    username: *const c_char,
    password: *const c_char,
) -> FfiErrorCode {
    with_request(req, |d| {
        d.credentials = Some(Credentials::Basic {
            username: unsafe { c_str(username) }?.to_string(),
            password: unsafe { c_str(password) }?.to_string(),
        });
        Ok(())
    })
}

/// Add a multipart form field. Fails with `InvalidArg` on a text body.
#[unsafe(no_mangle)]
pub extern "C" fn sx_request_add_field(
    req: *mut FfiRequest,
    name: *const c_char,
    value: *const c_char,
) -> FfiErrorCode {
    with_request(req, |d| {
        let name = unsafe { c_str(name) }?.to_string();
        let value = unsafe { c_str(value) }?.to_string();
        multipart_form(d)?.fields.push((name, value));
        Ok(())
    })
}

/// Add a file to upload. Fails with `InvalidArg` on a text body.
#[unsafe(no_mangle)]
pub extern "C" fn sx_request_add_file(req: *mut FfiRequest, path: *const c_char) -> FfiErrorCode {
    with_request(req, |d| {
        let path = PathBuf::from(unsafe { c_str(path) }?);
        multipart_form(d)?.files.push(path);
        Ok(())
    })
}

/// Free a request. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn sx_request_free(req: *mut FfiRequest) {
    if !req.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { Box::from_raw(req) });
        });
    }
}

fn optional_str(ptr: *const c_char) -> Result<Option<String>, FfiErrorCode> {
    if ptr.is_null() {
        return Ok(None);
    }
    Ok(Some(unsafe { c_str(ptr) }?.to_string()))
}

fn multipart_form(d: &mut RequestDescriptor) -> Result<&mut MultipartForm, FfiErrorCode> {
    if d.body.is_none() {
        d.body = Some(Payload::Multipart(MultipartForm::new()));
    }
    match &mut d.body {
        Some(Payload::Multipart(form)) => Ok(form),
        _ => Err(FfiErrorCode::InvalidArg),
    }
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

/// Send `req` and block until the response is decoded.
///
/// Returns null when the request could not be built (bad URL, missing body,
/// certificate problem) or an argument is null. Otherwise returns the body,
/// or `[REQUEST ERROR] <message>` if the exchange failed.
/// The caller must free the returned string with `sx_string_free`.
#[unsafe(no_mangle)]
pub extern "C" fn sx_send(client: *const FfiSxClient, req: *const FfiRequest) -> *mut c_char {
    if client.is_null() || req.is_null() {
        return std::ptr::null_mut();
    }
    catch_unwind(AssertUnwindSafe(|| {
        let client = unsafe { &*client };
        let req = unsafe { &*req };
        match client.inner.send(&req.inner) {
            Some(response) => c_string_lossy(&response).into_raw(),
            None => std::ptr::null_mut(),
        }
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Send `req` without blocking.
///
/// With a `callback`, it is invoked exactly once with the outcome, also when
/// the request cannot be built. Without one the call is fire-and-forget with
/// the short timeout. `req` may be freed as soon as this returns.
#[unsafe(no_mangle)]
pub extern "C" fn sx_send_async(
    client: *const FfiSxClient,
    req: *const FfiRequest,
    callback: Option<SxCompletionCallback>,
    user_data: *mut c_void,
) -> FfiErrorCode {
    if client.is_null() || req.is_null() {
        return FfiErrorCode::NullArg;
    }
    catch_unwind(AssertUnwindSafe(|| {
        let client = unsafe { &*client };
        let req = unsafe { &*req };
        let user_data = UserData(user_data);
        match callback {
            Some(callback) => {
                client
                    .inner
                    .send_async(&req.inner, move |event| deliver(callback, user_data, &event));
            }
            None => {
                client.inner.fire_and_forget(&req.inner);
            }
        }
        FfiErrorCode::Ok
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free a string returned by `sx_send`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn sx_string_free(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
