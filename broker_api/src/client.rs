use crate::activity::History;
use crate::config::{ClientConfig, ConfigError};
use crate::markets::Markets;
use crate::session::{OAuthRefresher, Session};
use crate::streaming::{Streamer, StreamingTransport};
use broker_core::SecretString;
use broker_core::pagination::Caps;
use broker_core::prelude::*;
use http::HeaderValue;
use http::header::HeaderName;
use std::sync::Arc;

pub const X_IG_API_KEY: HeaderName = HeaderName::from_static("x-ig-api-key");

/// Client for one brokerage account session.
///
/// Clones share the session. Endpoint groups are borrowed views:
/// `broker.session().login_certificate(..)`, `broker.markets().prices(..)`.
#[derive(Clone)]
pub struct Broker {
    api: ApiClient,
    api_key: SecretString,
}

impl Broker {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let transport = ReqwestTransport::new(reqwest::Client::builder().build()?);
        Self::with_transport(config, transport)
    }

    pub fn with_transport(
        config: ClientConfig,
        transport: impl Transport,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut key = HeaderValue::from_str(config.api_key.expose())?;
        key.set_sensitive(true);

        let caps = match config.max_pages {
            Some(n) => Caps::default().max_pages(n),
            None => Caps::default(),
        };
        let api = ApiClient::builder(config.root_url.clone())
            .transport(transport)
            .base_header(X_IG_API_KEY, key)
            .max_in_flight(config.max_in_flight)
            .debug_level(config.debug_level)
            .default_timeout(config.timeout())
            .pagination_caps(caps)
            .refresher(OAuthRefresher)
            .build();
        tracing::debug!(root = %config.root_url, "broker client ready");
        Ok(Self {
            api,
            api_key: config.api_key,
        })
    }

    /// The underlying pipeline client, for endpoints not wrapped here.
    #[inline]
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    #[inline]
    pub fn credentials(&self) -> Option<Arc<Credentials>> {
        self.api.credentials().current()
    }

    #[inline]
    pub fn session(&self) -> Session<'_> {
        Session::new(&self.api, &self.api_key)
    }

    #[inline]
    pub fn markets(&self) -> Markets<'_> {
        Markets::new(&self.api)
    }

    #[inline]
    pub fn history(&self) -> History<'_> {
        History::new(&self.api)
    }

    /// Streams hold only a weak handle: dropping every `Broker` clone ends
    /// them with `SessionExpired`.
    pub fn streamer<T: StreamingTransport>(&self, transport: Arc<T>) -> Streamer<T> {
        Streamer::new(self.api.downgrade(), transport)
    }
}
