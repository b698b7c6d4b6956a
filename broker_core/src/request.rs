use crate::codec::Body;
use crate::credentials::Credentials;
use crate::debug::redact_headers;
use crate::error::{ApiError, ErrorKind, FxError, RequestSnapshot};
use crate::policy::{Policy, PolicyLayer, merge_query};
use crate::transport::{BuiltRequest, RequestMeta};
use http::header::{CONTENT_TYPE, HeaderName};
use http::{HeaderMap, HeaderValue, Method};
use std::borrow::Cow;
use std::time::Duration;
use url::Url;

pub const VERSION: HeaderName = HeaderName::from_static("version");

type QueryFn<V> = Box<dyn Fn(&V) -> Result<Vec<(String, String)>, FxError> + Send + Sync>;
type HeaderFn<V> = Box<dyn Fn(&V) -> Result<HeaderMap, FxError> + Send + Sync>;
type BodyFn<V> = Box<dyn Fn(&V) -> Result<Body, FxError> + Send + Sync>;

/// Declarative description of one endpoint call.
///
/// `V` is the caller's computed-values type: the generator functions read
/// it, nothing else in the pipeline looks inside.
pub struct RequestTemplate<V> {
    method: Method,
    path: Cow<'static, str>,
    version: u32,
    requires_auth: bool,
    query: Option<QueryFn<V>>,
    headers: Option<HeaderFn<V>>,
    body: Option<BodyFn<V>>,
}

impl<V: 'static> RequestTemplate<V> {
    pub fn new(method: Method, path: impl Into<Cow<'static, str>>) -> Self {
        Self {
            method,
            path: path.into(),
            version: 1,
            requires_auth: true,
            query: None,
            headers: None,
            body: None,
        }
    }

    #[inline]
    pub fn get(path: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Method::GET, path)
    }

    #[inline]
    pub fn post(path: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Method::POST, path)
    }

    #[inline]
    pub fn put(path: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Method::PUT, path)
    }

    #[inline]
    pub fn delete(path: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[inline]
    pub fn version(mut self, v: u32) -> Self {
        self.version = v;
        self
    }

    /// Whether the session credential headers must be attached (default `true`).
    #[inline]
    pub fn auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }

    pub fn query<F, E>(mut self, f: F) -> Self
    where
        F: Fn(&V) -> Result<Vec<(String, String)>, E> + Send + Sync + 'static,
        E: Into<FxError>,
    {
        self.query = Some(Box::new(move |v| f(v).map_err(Into::into)));
        self
    }

    pub fn headers<F, E>(mut self, f: F) -> Self
    where
        F: Fn(&V) -> Result<HeaderMap, E> + Send + Sync + 'static,
        E: Into<FxError>,
    {
        self.headers = Some(Box::new(move |v| f(v).map_err(Into::into)));
        self
    }

    pub fn body<F, E>(mut self, f: F) -> Self
    where
        F: Fn(&V) -> Result<Body, E> + Send + Sync + 'static,
        E: Into<FxError>,
    {
        self.body = Some(Box::new(move |v| f(v).map_err(Into::into)));
        self
    }

    #[cfg(feature = "json")]
    pub fn json_body<T, F>(self, f: F) -> Self
    where
        T: serde::Serialize,
        F: Fn(&V) -> T + Send + Sync + 'static,
    {
        self.body(move |v: &V| Body::encode::<crate::codec::json::Json, T>(&f(v)))
    }
}

impl<V> RequestTemplate<V> {
    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    /// Produces the outbound request.
    ///
    /// Layering: client headers, `Version` and `Accept` first; credential
    /// headers next; then the header function, which may replace anything
    /// except a credential header. A body sets `Content-Type` last.
    pub fn build(&self, cx: &BuildContext<'_>, values: &V) -> Result<BuiltRequest, ApiError> {
        let mut url = join_url(cx.root, &self.path)?;

        let mut policy = Policy::new();
        policy.set_layer(PolicyLayer::Client);
        policy.extend_headers(cx.base_headers.clone())?;
        policy.insert_header(VERSION, HeaderValue::from(self.version))?;
        if let Some(accept) = cx.accept {
            policy.ensure_accept(accept);
        }

        if let Some(query) = self.query.as_ref() {
            let items = query(values).map_err(|e| {
                ApiError::wrap(ErrorKind::InvalidRequest, "query generation failed", e)
            });
            let merged = items.and_then(|items| merge_query(&mut url, &items));
            if let Err(e) = merged {
                return Err(e.with_request(|| partial(&self.method, &url, policy.headers())));
            }
        }

        if self.requires_auth {
            let Some(credentials) = cx.credentials else {
                return Err(ApiError::invalid_request("no credentials; log in first")
                    .with_suggestion("log in before calling endpoints that require a session")
                    .with_request(|| partial(&self.method, &url, policy.headers())));
            };
            policy.set_layer(PolicyLayer::Credentials);
            let applied = credentials
                .request_headers()
                .and_then(|h| policy.extend_headers(h));
            if let Err(e) = applied {
                return Err(e.with_request(|| partial(&self.method, &url, policy.headers())));
            }
        }

        policy.set_layer(PolicyLayer::Caller);
        if let Some(headers) = self.headers.as_ref() {
            let applied = headers(values)
                .map_err(|e| {
                    ApiError::wrap(ErrorKind::InvalidRequest, "header generation failed", e)
                })
                .and_then(|h| policy.extend_headers(h));
            if let Err(e) = applied {
                return Err(e.with_request(|| partial(&self.method, &url, policy.headers())));
            }
        }

        let mut body_bytes = None;
        if let Some(body) = self.body.as_ref() {
            let encoded = body(values)
                .map_err(|e| ApiError::wrap(ErrorKind::InvalidRequest, "body encoding failed", e))
                .and_then(|b| {
                    if !b.content_type.is_empty() {
                        let ct = HeaderValue::from_str(b.content_type).map_err(|e| {
                            ApiError::invalid_request("invalid body content type").with_underlying(e)
                        })?;
                        policy.insert_header(CONTENT_TYPE, ct)?;
                    }
                    Ok(b.bytes)
                });
            match encoded {
                Ok(bytes) => body_bytes = Some(bytes),
                Err(e) => {
                    return Err(e.with_request(|| partial(&self.method, &url, policy.headers())));
                }
            }
        }

        let (headers, credential_headers) = policy.into_headers();
        Ok(BuiltRequest {
            meta: RequestMeta {
                method: self.method.clone(),
                version: self.version,
                requires_auth: self.requires_auth,
                page_index: cx.page_index,
            },
            url,
            headers,
            body: body_bytes,
            timeout: cx.timeout,
            credential_headers,
        })
    }
}

/// Owner-provided inputs of [`RequestTemplate::build`].
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    pub root: &'a Url,
    pub base_headers: &'a HeaderMap,
    pub credentials: Option<&'a Credentials>,
    pub accept: Option<&'static str>,
    pub timeout: Option<Duration>,
    pub page_index: u32,
}

impl<'a> BuildContext<'a> {
    pub fn new(root: &'a Url, base_headers: &'a HeaderMap) -> Self {
        Self {
            root,
            base_headers,
            credentials: None,
            accept: None,
            timeout: None,
            page_index: 0,
        }
    }
}

/// Joins `path` onto `root` as a relative reference, so the root's own path
/// prefix (e.g. `/gateway/deal`) is kept.
pub fn join_url(root: &Url, path: &str) -> Result<Url, ApiError> {
    let mut base = root.clone();
    if !base.path().ends_with('/') {
        let p = format!("{}/", base.path());
        base.set_path(&p);
    }
    base.join(path.trim_start_matches('/')).map_err(|e| {
        ApiError::invalid_request(format!("cannot join '{}' onto '{}'", path, root))
            .with_underlying(e)
    })
}

fn partial(method: &Method, url: &Url, headers: &HeaderMap) -> RequestSnapshot {
    RequestSnapshot {
        method: method.clone(),
        url: url.to_string(),
        headers: redact_headers(headers),
    }
}
