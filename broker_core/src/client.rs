use crate::codec::Decodes;
use crate::credentials::{CredentialHolder, Credentials};
use crate::debug::{DebugLevel, DebugSink, TracingDebugSink};
use crate::error::{ApiError, FxError};
use crate::pagination::{self, Caps, PreviousPage};
use crate::request::{BuildContext, RequestTemplate};
use crate::timeout::TimeoutOverride;
use crate::transport::{
    BuiltRequest, Exchange, Expectations, ReqwestTransport, ResponseHead, Transport, TransportLink,
};
use core::future::IntoFuture;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use http::header::HeaderName;
use http::{HeaderMap, HeaderValue};
use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Obtains fresh credentials once the current ones have expired.
///
/// Runs at most once per expiry: concurrent callers wait for the refresh in
/// progress. The refresh call must not itself require authentication.
pub trait CredentialRefresher: Send + Sync + 'static {
    fn refresh<'a>(
        &'a self,
        client: WeakClient,
        current: Arc<Credentials>,
    ) -> BoxFuture<'a, Result<Credentials, ApiError>>;
}

pub(crate) struct ClientInner {
    root_url: Url,
    base_headers: HeaderMap,
    credentials: Arc<CredentialHolder>,
    link: TransportLink,
    refresher: Option<Arc<dyn CredentialRefresher>>,
    default_timeout: Option<Duration>,
    caps: Caps,
    // never sent on; dropping it with the last handle wakes `WeakClient::released`
    release: watch::Sender<()>,
}

/// Owning handle of one API session. Clones share the session; every
/// in-flight operation holds only a [`WeakClient`].
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

pub struct ClientBuilder {
    root_url: Url,
    base_headers: HeaderMap,
    transport: Option<Arc<dyn Transport>>,
    max_in_flight: usize,
    debug_level: DebugLevel,
    sink: Arc<dyn DebugSink>,
    refresher: Option<Arc<dyn CredentialRefresher>>,
    default_timeout: Option<Duration>,
    caps: Caps,
}

impl ClientBuilder {
    pub fn new(root_url: Url) -> Self {
        Self {
            root_url,
            base_headers: HeaderMap::new(),
            transport: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            debug_level: DebugLevel::default(),
            sink: Arc::new(TracingDebugSink),
            refresher: None,
            default_timeout: None,
            caps: Caps::default(),
        }
    }

    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn reqwest_client(self, client: reqwest::Client) -> Self {
        self.transport(ReqwestTransport::new(client))
    }

    /// Header sent with every request, e.g. the application key.
    pub fn base_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.base_headers.insert(name, value);
        self
    }

    #[inline]
    pub fn max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n;
        self
    }

    #[inline]
    pub fn debug_level(mut self, level: DebugLevel) -> Self {
        self.debug_level = level;
        self
    }

    pub fn debug_sink(mut self, sink: impl DebugSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn refresher(mut self, refresher: impl CredentialRefresher) -> Self {
        self.refresher = Some(Arc::new(refresher));
        self
    }

    #[inline]
    pub fn default_timeout(mut self, t: Option<Duration>) -> Self {
        self.default_timeout = t;
        self
    }

    #[inline]
    pub fn pagination_caps(mut self, caps: Caps) -> Self {
        self.caps = caps;
        self
    }

    pub fn build(self) -> ApiClient {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::default()));
        ApiClient {
            inner: Arc::new(ClientInner {
                root_url: self.root_url,
                base_headers: self.base_headers,
                credentials: Arc::new(CredentialHolder::new()),
                link: TransportLink::new(transport, self.max_in_flight, self.debug_level, self.sink),
                refresher: self.refresher,
                default_timeout: self.default_timeout,
                caps: self.caps,
                release: watch::Sender::new(()),
            }),
        }
    }
}

impl ApiClient {
    #[inline]
    pub fn builder(root_url: Url) -> ClientBuilder {
        ClientBuilder::new(root_url)
    }

    #[inline]
    pub fn root_url(&self) -> &Url {
        &self.inner.root_url
    }

    #[inline]
    pub fn debug_level(&self) -> DebugLevel {
        self.inner.link.debug_level()
    }

    #[inline]
    pub fn pagination_caps(&self) -> Caps {
        self.inner.caps
    }

    #[inline]
    pub fn credentials(&self) -> &CredentialHolder {
        &self.inner.credentials
    }

    #[inline]
    pub fn downgrade(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
            release: self.inner.release.subscribe(),
        }
    }

    #[inline]
    pub fn call<V: Send + 'static>(&self, template: RequestTemplate<V>, values: V) -> PendingCall<V> {
        self.downgrade().call(template, values)
    }

    /// Builds a request with the credentials currently installed. No refresh
    /// happens here; [`WeakClient::exchange`] re-authorizes at dispatch time.
    pub fn prepare<V>(
        &self,
        template: &RequestTemplate<V>,
        values: &V,
        accept: Option<&'static str>,
    ) -> Result<BuiltRequest, ApiError> {
        let credentials = self.inner.credentials.current();
        let mut cx = BuildContext::new(&self.inner.root_url, &self.inner.base_headers);
        cx.credentials = credentials.as_deref();
        cx.accept = accept;
        cx.timeout = self.inner.default_timeout;
        template.build(&cx, values)
    }

    /// Paginated call where each page is one asynchronous exchange.
    ///
    /// `generator` runs with a live client and returns the next request or
    /// `None` when done; `page` turns a request into `(metadata, output)`.
    pub fn paginate<I, M, W, G, P, Fut>(
        &self,
        initial: I,
        mut generator: G,
        mut page: P,
    ) -> BoxStream<'static, Result<W, ApiError>>
    where
        I: Send + 'static,
        M: Debug + Send + 'static,
        W: Debug + Send + 'static,
        G: FnMut(&ApiClient, &I, Option<&PreviousPage<M>>) -> Result<Option<BuiltRequest>, ApiError>
            + Send
            + 'static,
        P: FnMut(WeakClient, BuiltRequest) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(M, W), ApiError>> + Send + 'static,
    {
        let weak = self.downgrade();
        pagination::paginate(
            Arc::downgrade(&self.inner),
            initial,
            self.inner.caps,
            move |inner, initial, previous| {
                let client = ApiClient {
                    inner: Arc::clone(inner),
                };
                generator(&client, initial, previous)
            },
            move |request| stream::once(page(weak.clone(), request)).boxed(),
        )
    }
}

/// Non-owning handle used by in-flight operations.
#[derive(Clone)]
pub struct WeakClient {
    inner: Weak<ClientInner>,
    release: watch::Receiver<()>,
}

impl WeakClient {
    pub fn upgrade(&self) -> Option<ApiClient> {
        self.inner.upgrade().map(|inner| ApiClient { inner })
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Resolves once the last [`ApiClient`] handle has been dropped.
    pub async fn released(&self) {
        let mut release = self.release.clone();
        while release.changed().await.is_ok() {}
    }

    fn live(&self) -> Result<Arc<ClientInner>, ApiError> {
        self.inner.upgrade().ok_or_else(ApiError::owner_released)
    }

    pub fn call<V: Send + 'static>(&self, template: RequestTemplate<V>, values: V) -> PendingCall<V> {
        PendingCall {
            owner: self.clone(),
            template,
            values,
            expect: Expectations::default(),
            timeout: TimeoutOverride::Inherit,
        }
    }

    /// Current credentials, refreshed first if they have expired.
    ///
    /// `Ok(None)` means nobody is logged in. Expired credentials with no
    /// refresher configured fail as `SessionExpired`.
    pub async fn fresh_credentials(&self) -> Result<Option<Arc<Credentials>>, ApiError> {
        let (holder, refresher) = {
            let inner = self.live()?;
            (Arc::clone(&inner.credentials), inner.refresher.clone())
        };
        let (current, generation) = holder.snapshot();
        let Some(current) = current else {
            return Ok(None);
        };
        if !current.is_expired() {
            return Ok(Some(current));
        }
        let Some(refresher) = refresher else {
            return Err(ApiError::session_expired("credentials expired")
                .annotate("expired_at", current.token.expires_at()));
        };
        let client = self.clone();
        let fresh = holder
            .refresh_with(generation, |current| refresher.refresh(client, current))
            .await?;
        self.live()?;
        Ok(Some(fresh))
    }

    /// Sends an already built request, re-authorizing it with fresh
    /// credentials when it requires a session.
    pub async fn exchange(
        &self,
        mut request: BuiltRequest,
        expect: &Expectations,
    ) -> Result<Exchange<()>, ApiError> {
        if request.meta.requires_auth {
            let Some(credentials) = self.fresh_credentials().await? else {
                return Err(ApiError::invalid_request("no credentials; log in first")
                    .with_request(|| request.snapshot()));
            };
            request
                .reauthorize(&credentials)
                .map_err(|e| e.with_request(|| request.snapshot()))?;
        }
        let link = self.live()?.link.clone();
        let exchange = link.send(request, expect, ()).await?;
        if !self.is_alive() {
            return Err(exchange.enrich(ApiError::owner_released()));
        }
        Ok(exchange)
    }
}

/// One endpoint call, configured fluently and awaited (or sent) once.
pub struct PendingCall<V> {
    owner: WeakClient,
    template: RequestTemplate<V>,
    values: V,
    expect: Expectations,
    timeout: TimeoutOverride,
}

impl<V: Send + 'static> PendingCall<V> {
    pub fn expect_status(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.expect.status = Some(codes.into_iter().collect());
        self
    }

    /// Also sets `Accept`.
    #[inline]
    pub fn expect_content_type(mut self, ct: &'static str) -> Self {
        self.expect.content_type = Some(ct);
        self
    }

    #[inline]
    pub fn expectations(mut self, expect: Expectations) -> Self {
        self.expect = expect;
        self
    }

    #[inline]
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = TimeoutOverride::Set(d);
        self
    }

    #[inline]
    pub fn clear_timeout(mut self) -> Self {
        self.timeout = TimeoutOverride::Clear;
        self
    }

    pub async fn send(self) -> Result<Exchange<V>, ApiError> {
        let PendingCall {
            owner,
            template,
            values,
            expect,
            timeout,
        } = self;

        let credentials = if template.requires_auth() {
            owner.fresh_credentials().await?
        } else {
            None
        };

        let (request, link) = {
            let inner = owner.live()?;
            let mut cx = BuildContext::new(&inner.root_url, &inner.base_headers);
            cx.credentials = credentials.as_deref();
            cx.accept = expect.content_type;
            cx.timeout = timeout.resolve(inner.default_timeout);
            (template.build(&cx, &values)?, inner.link.clone())
        };

        let exchange = link.send(request, &expect, values).await?;
        if !owner.is_alive() {
            return Err(exchange.enrich(ApiError::owner_released()));
        }
        Ok(exchange)
    }

    pub async fn decode<T, D, F, E>(self, factory: F) -> Result<T, ApiError>
    where
        D: Decodes<T>,
        F: FnOnce(&BuiltRequest, &ResponseHead, &V) -> Result<D, E>,
        E: Into<FxError>,
    {
        self.send().await?.decode(factory)
    }

    #[cfg(feature = "json")]
    pub async fn json<T: serde::de::DeserializeOwned>(mut self) -> Result<T, ApiError> {
        self.expect
            .content_type
            .get_or_insert(<crate::codec::json::Json as crate::codec::ContentType>::CONTENT_TYPE);
        self.send().await?.json()
    }
}

impl<V: Send + 'static> IntoFuture for PendingCall<V> {
    type Output = Result<Exchange<V>, ApiError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.send())
    }
}
