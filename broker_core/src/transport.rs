use crate::codec::{self, Format};
use crate::credentials::Credentials;
use crate::debug::{DebugLevel, DebugSink, redact_headers};
use crate::error::{
    ApiError, ErrorDetail, FxError, RequestSnapshot, ResponseSnapshot, body_as_text,
};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName};
use http::{HeaderMap, Method, StatusCode};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

const DEBUG_BODY_CHARS: usize = 32 * 1024;

#[derive(Clone, Debug)]
pub struct RequestMeta {
    pub method: Method,
    pub version: u32,
    pub requires_auth: bool,
    pub page_index: u32,
}

#[derive(Clone, Debug)]
pub struct BuiltRequest {
    pub meta: RequestMeta,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
    pub(crate) credential_headers: Vec<HeaderName>,
}

impl BuiltRequest {
    /// Bare request without credentials, mostly useful for tests and
    /// hand-rolled page generators.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            meta: RequestMeta {
                method,
                version: 1,
                requires_auth: false,
                page_index: 0,
            },
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            credential_headers: Vec::new(),
        }
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.meta.method
    }

    pub fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            method: self.meta.method.clone(),
            url: self.url.to_string(),
            headers: redact_headers(&self.headers),
        }
    }

    /// Swaps the credential headers for those of `credentials`, used when a
    /// prepared request is dispatched after a token refresh.
    pub fn reauthorize(&mut self, credentials: &Credentials) -> Result<(), ApiError> {
        for name in self.credential_headers.drain(..) {
            self.headers.remove(&name);
        }
        for (name, value) in credentials.request_headers()?.iter() {
            self.credential_headers.push(name.clone());
            self.headers.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ResponseHead {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn snapshot(&self) -> ResponseSnapshot {
        ResponseSnapshot {
            status: self.status,
            url: self.url.to_string(),
            headers: redact_headers(&self.headers),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Everything a validated HTTP exchange produced, plus the caller's
/// computed values forwarded untouched.
#[derive(Clone, Debug)]
pub struct Exchange<V> {
    pub request: BuiltRequest,
    pub response: ResponseHead,
    pub body: Bytes,
    pub values: V,
}

impl<V> Exchange<V> {
    /// Fills request/response/body slots that are still empty.
    pub fn enrich(&self, e: ApiError) -> ApiError {
        e.with_request(|| self.request.snapshot())
            .with_response(|| self.response.snapshot())
            .with_body(|| body_as_text(&self.response.headers, &self.body))
    }
}

#[derive(Debug)]
pub struct TransportError(FxError);

impl TransportError {
    #[inline]
    pub fn new(e: impl Error + Send + Sync + 'static) -> Self {
        Self(Box::new(e))
    }

    #[inline]
    pub fn msg(s: impl Into<String>) -> Self {
        Self(s.into().into())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&*self.0)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::new(e)
    }
}

pub trait TransportBody: Send + 'static {
    fn next_chunk<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>, TransportError>> + Send + 'a>>;
}

pub struct TransportResponse {
    /// Final URL after redirects.
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub body: Box<dyn TransportBody>,
}

/// Injectable network session.
///
/// Contract:
/// - Must honor `BuiltRequest` fields (url/headers/body/timeout).
/// - Must not leak a concrete HTTP client type in its public surface.
pub trait Transport: Send + Sync + 'static {
    fn send<'a>(
        &'a self,
        req: &'a BuiltRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + 'a>>;
}

#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    #[inline]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    #[inline]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

struct ReqwestBody {
    resp: reqwest::Response,
}

impl TransportBody for ReqwestBody {
    fn next_chunk<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>, TransportError>> + Send + 'a>> {
        Box::pin(async move { self.resp.chunk().await.map_err(TransportError::from) })
    }
}

impl Transport for ReqwestTransport {
    fn send<'a>(
        &'a self,
        req: &'a BuiltRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let mut rb = self
                .client
                .request(req.meta.method.clone(), req.url.clone())
                .headers(req.headers.clone());
            if let Some(b) = req.body.clone() {
                rb = rb.body(b);
            }
            if let Some(t) = req.timeout {
                rb = rb.timeout(t);
            }
            let resp = rb.send().await?;
            Ok(TransportResponse {
                url: resp.url().clone(),
                status: resp.status(),
                headers: resp.headers().clone(),
                content_length: resp.content_length(),
                body: Box::new(ReqwestBody { resp }),
            })
        })
    }
}

/// What the caller is willing to accept back.
#[derive(Clone, Debug, Default)]
pub struct Expectations {
    pub status: Option<BTreeSet<u16>>,
    pub content_type: Option<&'static str>,
}

impl Expectations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status = Some(codes.into_iter().collect());
        self
    }

    pub fn content_type(mut self, ct: &'static str) -> Self {
        self.content_type = Some(ct);
        self
    }

    /// `200` with a JSON body, the usual shape of a read endpoint.
    #[cfg(feature = "json")]
    pub fn json_ok() -> Self {
        Self::new()
            .status([200])
            .content_type(<crate::codec::json::Json as crate::codec::ContentType>::CONTENT_TYPE)
    }
}

/// The network half of a client: transport, in-flight limiter and debug
/// reporting. Holds no reference to the owning client, so in-flight calls
/// never keep it alive.
#[derive(Clone)]
pub struct TransportLink {
    transport: Arc<dyn Transport>,
    limiter: Arc<Semaphore>,
    debug_level: DebugLevel,
    sink: Arc<dyn DebugSink>,
}

impl TransportLink {
    pub fn new(
        transport: Arc<dyn Transport>,
        max_in_flight: usize,
        debug_level: DebugLevel,
        sink: Arc<dyn DebugSink>,
    ) -> Self {
        Self {
            transport,
            limiter: Arc::new(Semaphore::new(max_in_flight.max(1))),
            debug_level,
            sink,
        }
    }

    #[inline]
    pub fn debug_level(&self) -> DebugLevel {
        self.debug_level
    }

    /// Issues `request` and validates the HTTP-level outcome.
    pub async fn send<V>(
        &self,
        request: BuiltRequest,
        expect: &Expectations,
        values: V,
    ) -> Result<Exchange<V>, ApiError> {
        let dbg = self.debug_level;
        if dbg.reports_calls() {
            self.sink
                .request_start(dbg, request.method(), request.url.as_str(), request.meta.page_index);
        }
        if dbg.reports_payloads() {
            self.sink.request_headers(dbg, &request.headers);
            if let Some(body) = request.body.as_ref() {
                let format = codec::format_for_content_type(
                    request.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
                );
                self.sink.request_body(dbg, body, format, DEBUG_BODY_CHARS);
            }
        }

        let _permit = self.limiter.acquire().await.map_err(|e| {
            ApiError::call_failed("transport limiter closed")
                .with_underlying(e)
                .with_request(|| request.snapshot())
        })?;

        let mut resp = match self.transport.send(&request).await {
            Ok(r) => r,
            Err(e) => {
                return Err(ApiError::call_failed(format!("transport: {}", e))
                    .with_underlying(e)
                    .with_request(|| request.snapshot()));
            }
        };

        let head = ResponseHead {
            url: resp.url.clone(),
            status: resp.status,
            headers: std::mem::take(&mut resp.headers),
        };
        if !matches!(head.url.scheme(), "http" | "https") {
            return Err(ApiError::call_failed("response was not HTTP")
                .annotate("response_url", &head.url)
                .with_request(|| request.snapshot()));
        }

        let body = match read_body_all(resp.body.as_mut(), resp.content_length).await {
            Ok(b) => b,
            Err(e) => {
                return Err(ApiError::call_failed(format!("reading body: {}", e))
                    .with_underlying(e)
                    .with_request(|| request.snapshot())
                    .with_response(|| head.snapshot()));
            }
        };
        drop(_permit);

        let exchange = Exchange {
            request,
            response: head,
            body,
            values,
        };
        let status = exchange.response.status;

        if let Some(expected) = expect.status.as_ref()
            && !expected.contains(&status.as_u16())
        {
            self.report_response(&exchange, false);
            let e = ApiError::invalid_response(format!("unexpected status {}", status.as_u16()))
                .with_detail(ErrorDetail::UnexpectedStatus {
                    status,
                    expected: expected.clone(),
                })
                .annotate("status", status.as_u16())
                .annotate("expected_status", format!("{:?}", expected));
            return Err(exchange.enrich(e));
        }

        if let Some(ct) = expect.content_type
            && !ct.is_empty()
            && !exchange.body.is_empty()
            && !content_type_matches(exchange.response.content_type(), ct)
        {
            self.report_response(&exchange, false);
            let e = ApiError::invalid_response(format!("expected content type {}", ct))
                .with_detail(ErrorDetail::UnexpectedContentType {
                    got: exchange.response.content_type().map(str::to_owned),
                    expected: ct,
                });
            return Err(exchange.enrich(e));
        }

        self.report_response(&exchange, true);
        Ok(exchange)
    }

    fn report_response<V>(&self, exchange: &Exchange<V>, ok: bool) {
        let dbg = self.debug_level;
        if dbg.reports_calls() {
            self.sink.response_status(
                dbg,
                exchange.response.status,
                exchange.request.url.as_str(),
                ok,
            );
        }
        if dbg.reports_payloads() {
            self.sink.response_headers(dbg, &exchange.response.headers);
            let format: Format = codec::format_for_content_type(exchange.response.content_type());
            self.sink
                .response_body(dbg, &exchange.body, format, DEBUG_BODY_CHARS);
        }
    }
}

fn content_type_matches(got: Option<&str>, expected: &str) -> bool {
    match got {
        Some(got) => got
            .split(';')
            .next()
            .map(str::trim)
            .is_some_and(|essence| essence.eq_ignore_ascii_case(expected)),
        None => false,
    }
}

async fn read_body_all(
    body: &mut dyn TransportBody,
    hint: Option<u64>,
) -> Result<Bytes, TransportError> {
    let cap = hint.map(|n| n.min(1 << 20) as usize).unwrap_or(8 * 1024);
    let mut buf = bytes::BytesMut::with_capacity(cap);
    while let Some(chunk) = body.next_chunk().await? {
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}
