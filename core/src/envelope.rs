//! Uniform call outcomes and callback delivery.
//!
//! # Design
//! Every terminal outcome of a call (decoded body, transport failure, decode
//! failure) becomes one `ResultEnvelope`. A call succeeds only when it
//! finished without error *and* produced a non-empty body, so an empty 200 is
//! a soft failure for consumers that expect an `ApiResult` document.
//!
//! Async calls deliver through a `CompletionSlot`, which owns the caller's
//! `FnOnce` callback. Completing consumes the slot; dropping it unfinished
//! delivers a failure. Either way the callback runs exactly once.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::descriptor::HttpMethod;
use crate::error::{Error, ProjectionError};

/// Typed projection of the standard SX response document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_time: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<i64>,
}

impl ApiResult {
    pub fn parse(raw: &str) -> Result<Self, ProjectionError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Error document used as the raw body of failed calls.
    pub fn failure(kind: &str, message: &str) -> Self {
        Self {
            error: Some(Value::String(kind.to_string())),
            message: Some(message.to_string()),
            ..Default::default()
        }
    }
}

/// Outcome of one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub success: bool,
    pub raw_body: String,
    pub error: Option<String>,
}

impl ResultEnvelope {
    pub fn from_body(body: String) -> Self {
        Self {
            success: !body.is_empty(),
            raw_body: body,
            error: None,
        }
    }

    /// Failed call; `raw_body` carries a JSON error document.
    pub fn from_error(err: &Error) -> Self {
        let message = err.to_string();
        let raw_body = serde_json::to_string(&ApiResult::failure(err.kind(), &message))
            .unwrap_or_else(|_| Value::String(message.clone()).to_string());
        Self {
            success: false,
            raw_body,
            error: Some(message),
        }
    }

    pub fn from_outcome(outcome: Result<String, Error>) -> Self {
        match outcome {
            Ok(body) => Self::from_body(body),
            Err(err) => Self::from_error(&err),
        }
    }

    /// Best-effort typed view of the body.
    pub fn project(&self) -> Result<ApiResult, ProjectionError> {
        ApiResult::parse(&self.raw_body)
    }
}

/// Identifies the call an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSource {
    pub id: Uuid,
    pub method: HttpMethod,
    pub url: String,
}

impl CallSource {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            url: url.into(),
        }
    }
}

/// Event handed to completion callbacks.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub source: CallSource,
    pub success_request: bool,
    pub response: String,
    /// `None` when the body is not an `ApiResult` document.
    pub result: Option<ApiResult>,
    pub envelope: ResultEnvelope,
}

impl CompletionEvent {
    pub fn new(source: CallSource, envelope: ResultEnvelope) -> Self {
        let result = match envelope.project() {
            Ok(result) => Some(result),
            Err(err) => {
                if envelope.success {
                    warn!(call_id = %source.id, error = %err, "response is not an ApiResult document");
                }
                None
            }
        };
        Self {
            source,
            success_request: envelope.success,
            response: envelope.raw_body.clone(),
            result,
            envelope,
        }
    }
}

/// Write-once delivery slot for a completion callback.
pub struct CompletionSlot<F>
where
    F: FnOnce(CompletionEvent) + Send + 'static,
{
    source: CallSource,
    callback: Option<F>,
}

impl<F> CompletionSlot<F>
where
    F: FnOnce(CompletionEvent) + Send + 'static,
{
    pub fn new(source: CallSource, callback: F) -> Self {
        Self {
            source,
            callback: Some(callback),
        }
    }

    pub fn source(&self) -> &CallSource {
        &self.source
    }

    pub fn complete(mut self, envelope: ResultEnvelope) {
        self.deliver(envelope);
    }

    fn deliver(&mut self, envelope: ResultEnvelope) {
        if let Some(callback) = self.callback.take() {
            callback(CompletionEvent::new(self.source.clone(), envelope));
        }
    }
}

impl<F> Drop for CompletionSlot<F>
where
    F: FnOnce(CompletionEvent) + Send + 'static,
{
    fn drop(&mut self) {
        if self.callback.is_some() {
            warn!(call_id = %self.source.id, "call abandoned before completion");
            let err = Error::Transport(crate::error::TransportError::Task(
                "call abandoned before completion".to_string(),
            ));
            self.deliver(ResultEnvelope::from_error(&err));
        }
    }
}
