use crate::codec::{self, Format};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};

/// How much of each exchange the client reports to its [`DebugSink`].
///
/// `V` reports request lines and response statuses, `VV` adds headers and
/// body previews.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugLevel {
    #[default]
    None,
    V,
    VV,
}

impl DebugLevel {
    #[inline]
    pub fn reports_calls(self) -> bool {
        self >= DebugLevel::V
    }

    #[inline]
    pub fn reports_payloads(self) -> bool {
        self == DebugLevel::VV
    }
}

impl std::fmt::Display for DebugLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DebugLevel::None => "none",
            DebugLevel::V => "v",
            DebugLevel::VV => "vv",
        })
    }
}

/// Receives pipeline events. The client only calls it when its
/// [`DebugLevel`] asks for the corresponding detail.
pub trait DebugSink: Send + Sync + 'static {
    fn request_start(&self, dbg: DebugLevel, method: &Method, url: &str, page_index: u32);
    fn request_headers(&self, dbg: DebugLevel, headers: &HeaderMap);
    fn request_body(&self, dbg: DebugLevel, body: &Bytes, format: Format, max_chars: usize);
    fn response_status(&self, dbg: DebugLevel, status: StatusCode, url: &str, ok: bool);
    fn response_headers(&self, dbg: DebugLevel, headers: &HeaderMap);
    fn response_body(&self, dbg: DebugLevel, body: &Bytes, format: Format, max_chars: usize);
}

#[derive(Default)]
pub struct NoopDebugSink;

impl DebugSink for NoopDebugSink {
    #[inline]
    fn request_start(&self, _: DebugLevel, _: &Method, _: &str, _: u32) {}
    #[inline]
    fn request_headers(&self, _: DebugLevel, _: &HeaderMap) {}
    #[inline]
    fn request_body(&self, _: DebugLevel, _: &Bytes, _: Format, _: usize) {}
    #[inline]
    fn response_status(&self, _: DebugLevel, _: StatusCode, _: &str, _: bool) {}
    #[inline]
    fn response_headers(&self, _: DebugLevel, _: &HeaderMap) {}
    #[inline]
    fn response_body(&self, _: DebugLevel, _: &Bytes, _: Format, _: usize) {}
}

/// Forwards pipeline events to `tracing` under the `broker_core::http` target.
#[derive(Default)]
pub struct TracingDebugSink;

impl DebugSink for TracingDebugSink {
    fn request_start(&self, dbg: DebugLevel, method: &Method, url: &str, page_index: u32) {
        tracing::debug!(target: "broker_core::http", %dbg, %method, url, page_index, "request");
    }

    fn request_headers(&self, dbg: DebugLevel, headers: &HeaderMap) {
        tracing::trace!(
            target: "broker_core::http",
            %dbg,
            headers = %headers_for_debug(headers),
            "request headers"
        );
    }

    fn request_body(&self, dbg: DebugLevel, body: &Bytes, format: Format, max_chars: usize) {
        let preview = codec::format_bytes_for_debug(format, body.as_ref(), max_chars);
        tracing::trace!(target: "broker_core::http", %dbg, len = body.len(), body = %preview, "request body");
    }

    fn response_status(&self, dbg: DebugLevel, status: StatusCode, url: &str, ok: bool) {
        if ok {
            tracing::debug!(target: "broker_core::http", %dbg, status = status.as_u16(), url, "response");
        } else {
            tracing::warn!(target: "broker_core::http", %dbg, status = status.as_u16(), url, "response rejected");
        }
    }

    fn response_headers(&self, dbg: DebugLevel, headers: &HeaderMap) {
        tracing::trace!(
            target: "broker_core::http",
            %dbg,
            headers = %headers_for_debug(headers),
            "response headers"
        );
    }

    fn response_body(&self, dbg: DebugLevel, body: &Bytes, format: Format, max_chars: usize) {
        let preview = codec::format_bytes_for_debug(format, body.as_ref(), max_chars);
        tracing::trace!(target: "broker_core::http", %dbg, len = body.len(), body = %preview, "response body");
    }
}

pub(crate) fn is_sensitive_header_name(name: &HeaderName) -> bool {
    // HeaderName::as_str() is lowercase.
    let n = name.as_str();
    matches!(
        n,
        "authorization" | "proxy-authorization" | "cookie" | "set-cookie" | "cst"
    ) || n.contains("token")
        || n.contains("secret")
        || n.contains("api-key")
        || n.contains("apikey")
        || n.ends_with("-key")
}

pub(crate) fn header_value_for_debug(name: &HeaderName, value: &HeaderValue) -> String {
    if is_sensitive_header_name(name) {
        "<redacted>".to_string()
    } else {
        value.to_str().unwrap_or("<non-utf8>").to_string()
    }
}

/// Copy of `headers` safe to keep in error context or logs.
pub(crate) fn redact_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (k, v) in headers.iter() {
        if is_sensitive_header_name(k) {
            out.append(k.clone(), HeaderValue::from_static("<redacted>"));
        } else {
            out.append(k.clone(), v.clone());
        }
    }
    out
}

fn headers_for_debug(headers: &HeaderMap) -> String {
    let mut s = String::new();
    for (i, (k, v)) in headers.iter().enumerate() {
        if i > 0 {
            s.push_str(", ");
        }
        s.push_str(k.as_str());
        s.push_str(": ");
        s.push_str(&header_value_for_debug(k, v));
    }
    s
}

#[cfg(test)]
mod test {
    use super::*;
    use http::header::{ACCEPT, AUTHORIZATION, COOKIE};

    #[test]
    fn redacts_sensitive_headers_by_name() {
        assert!(is_sensitive_header_name(&AUTHORIZATION));
        assert!(is_sensitive_header_name(&COOKIE));
        assert!(is_sensitive_header_name(&HeaderName::from_static("cst")));
        assert!(is_sensitive_header_name(&HeaderName::from_static("x-security-token")));
        assert!(is_sensitive_header_name(&HeaderName::from_static("x-ig-api-key")));
        assert!(!is_sensitive_header_name(&ACCEPT));
        assert!(!is_sensitive_header_name(&HeaderName::from_static("version")));

        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cr3t"));
        h.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let r = redact_headers(&h);
        assert_eq!(r.get(AUTHORIZATION).unwrap(), "<redacted>");
        assert_eq!(r.get(ACCEPT).unwrap(), "application/json");
        let line = headers_for_debug(&h);
        assert!(line.contains("authorization: <redacted>"));
        assert!(line.contains("accept: application/json"));
        assert!(!line.contains("s3cr3t"));
    }
}
