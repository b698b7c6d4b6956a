use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD as B64;
use http::{HeaderMap, Method, StatusCode};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use thiserror::Error;

pub type FxError = Box<dyn Error + Send + Sync>;

/// The four failure classes every pipeline stage reports through.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// The owning client is gone, or credentials are absent/expired with no way to refresh.
    SessionExpired,
    /// The request could not be constructed.
    InvalidRequest,
    /// Transport-level failure, or a pagination protocol anomaly.
    CallFailed,
    /// HTTP succeeded but the response failed validation or decoding.
    InvalidResponse,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::SessionExpired => f.write_str("session expired"),
            ErrorKind::InvalidRequest => f.write_str("invalid request"),
            ErrorKind::CallFailed => f.write_str("call failed"),
            ErrorKind::InvalidResponse => f.write_str("invalid response"),
        }
    }
}

/// Which decode sub-stage produced an `InvalidResponse`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DecodeStage {
    Decoder,
    Structure,
    Transform,
}

/// Typed failure detail, set at most once by the stage that detected it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ErrorDetail {
    UnexpectedStatus {
        status: StatusCode,
        expected: BTreeSet<u16>,
    },
    UnexpectedContentType {
        got: Option<String>,
        expected: &'static str,
    },
    Decode {
        stage: DecodeStage,
    },
    DuplicatePage {
        first: String,
        second: String,
    },
}

#[derive(Clone, Debug)]
pub struct RequestSnapshot {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
}

#[derive(Clone, Debug)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub url: String,
    pub headers: HeaderMap,
}

/// Forensic trail collected while an error unwinds through the pipeline.
///
/// Every slot is write-once: later layers only fill what is still empty.
#[derive(Clone, Debug, Default)]
pub struct ErrorContext {
    pub request: Option<RequestSnapshot>,
    pub response: Option<ResponseSnapshot>,
    pub body: Option<String>,
    pub detail: Option<ErrorDetail>,
    pub annotations: Vec<(Cow<'static, str>, String)>,
}

impl ErrorContext {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct ApiError {
    kind: ErrorKind,
    message: Cow<'static, str>,
    suggestion: Option<Cow<'static, str>>,
    #[source]
    underlying: Option<FxError>,
    context: Box<ErrorContext>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            suggestion: None,
            underlying: None,
            context: Box::default(),
        }
    }

    #[inline]
    pub fn session_expired(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::SessionExpired, message)
            .with_suggestion("log in again before issuing further requests")
    }

    #[inline]
    pub fn invalid_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    #[inline]
    pub fn call_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::CallFailed, message)
    }

    #[inline]
    pub fn invalid_response(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidResponse, message)
    }

    /// Client handle expired while an operation was still in flight.
    pub fn owner_released() -> Self {
        Self::new(ErrorKind::SessionExpired, "the API client was released")
            .with_suggestion("keep the client alive for as long as its requests are running")
    }

    /// Boundary conversion: a boxed `ApiError` passes through untouched,
    /// anything else is wrapped as `kind` and kept as the underlying cause.
    pub fn wrap(kind: ErrorKind, message: impl Into<Cow<'static, str>>, err: FxError) -> Self {
        match err.downcast::<ApiError>() {
            Ok(api) => *api,
            Err(other) => {
                let mut e = Self::new(kind, message);
                e.underlying = Some(other);
                e
            }
        }
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn suggestion(&self) -> Option<&str> {
        self.suggestion.as_deref()
    }

    #[inline]
    pub fn underlying(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.underlying.as_deref()
    }

    #[inline]
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<Cow<'static, str>>) -> Self {
        if self.suggestion.is_none() {
            self.suggestion = Some(suggestion.into());
        }
        self
    }

    pub fn with_underlying(mut self, err: impl Into<FxError>) -> Self {
        if self.underlying.is_none() {
            self.underlying = Some(err.into());
        }
        self
    }

    pub fn with_request(mut self, req: impl FnOnce() -> RequestSnapshot) -> Self {
        if self.context.request.is_none() {
            self.context.request = Some(req());
        }
        self
    }

    pub fn with_response(mut self, resp: impl FnOnce() -> ResponseSnapshot) -> Self {
        if self.context.response.is_none() {
            self.context.response = Some(resp());
        }
        self
    }

    pub fn with_body(mut self, body: impl FnOnce() -> String) -> Self {
        if self.context.body.is_none() {
            self.context.body = Some(body());
        }
        self
    }

    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        if self.context.detail.is_none() {
            self.context.detail = Some(detail);
        }
        self
    }

    pub fn annotate(mut self, key: impl Into<Cow<'static, str>>, value: impl fmt::Display) -> Self {
        let key = key.into();
        if self.context.annotation(&key).is_none() {
            self.context.annotations.push((key, value.to_string()));
        }
        self
    }
}

impl From<crate::transport::TransportError> for ApiError {
    fn from(e: crate::transport::TransportError) -> Self {
        ApiError::call_failed(e.to_string()).with_underlying(e)
    }
}

pub fn body_as_text(headers: &HeaderMap, body: &bytes::Bytes) -> String {
    const MAX: usize = 8 * 1024;
    let ct = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let slice = if body.len() > MAX {
        &body[..MAX]
    } else {
        &body[..]
    };
    if ct.is_empty() || ct.starts_with("application/json") || ct.starts_with("text/") {
        let text = match std::str::from_utf8(slice) {
            Ok(s) => s,
            // the cap split a character; keep everything before it
            Err(e) if e.error_len().is_none() && body.len() > slice.len() => {
                std::str::from_utf8(&slice[..e.valid_up_to()]).unwrap_or_default()
            }
            Err(_) => return format!("<non-utf8-text; {} bytes>", body.len()),
        };
        if body.len() > slice.len() {
            format!("{}...", text)
        } else {
            text.to_owned()
        }
    } else {
        let b64 = B64.encode(slice);
        format!(
            "<non-text; {} bytes; base64:{}{}>",
            body.len(),
            &b64[..b64.len().min(1024)],
            if b64.len() > 1024 { "..." } else { "" }
        )
    }
}
