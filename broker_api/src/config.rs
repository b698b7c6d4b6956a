use broker_core::DEFAULT_MAX_IN_FLIGHT;
use broker_core::SecretString;
use broker_core::debug::DebugLevel;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api key is not a valid header value")]
    ApiKey(#[from] http::header::InvalidHeaderValue),
    #[error("root url: {0}")]
    Url(#[from] url::ParseError),
    #[error("max_in_flight must be at least 1")]
    NoConcurrency,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Live,
    Demo,
}

impl Environment {
    pub const fn root(self) -> &'static str {
        match self {
            Environment::Live => "https://api.ig.com/gateway/deal",
            Environment::Demo => "https://demo-api.ig.com/gateway/deal",
        }
    }

    #[inline]
    pub fn root_url(self) -> Result<Url, url::ParseError> {
        Url::parse(self.root())
    }
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    pub root_url: Url,
    pub api_key: SecretString,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Default request timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub debug_level: DebugLevel,
    #[serde(default)]
    pub max_pages: Option<u32>,
}

impl ClientConfig {
    pub fn new(root_url: Url, api_key: impl Into<SecretString>) -> Self {
        Self {
            root_url,
            api_key: api_key.into(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            timeout_ms: None,
            debug_level: DebugLevel::None,
            max_pages: None,
        }
    }

    pub fn for_environment(
        env: Environment,
        api_key: impl Into<SecretString>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(env.root_url()?, api_key))
    }

    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::NoConcurrency);
        }
        Ok(())
    }

    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    #[inline]
    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n;
        self
    }

    #[inline]
    pub fn with_timeout(mut self, t: Option<Duration>) -> Self {
        self.timeout_ms = t.map(|d| d.as_millis() as u64);
        self
    }

    #[inline]
    pub fn with_debug_level(mut self, level: DebugLevel) -> Self {
        self.debug_level = level;
        self
    }

    #[inline]
    pub fn with_max_pages(mut self, max: Option<u32>) -> Self {
        self.max_pages = max;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn json_fills_defaults() {
        let c = ClientConfig::from_json(
            r#"{"root_url":"https://demo-api.ig.com/gateway/deal","api_key":"k1"}"#,
        )
        .unwrap();
        assert_eq!(c.root_url.as_str(), Environment::Demo.root());
        assert_eq!(c.api_key.expose(), "k1");
        assert_eq!(c.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
        assert_eq!(c.timeout(), None);
        assert_eq!(c.debug_level, DebugLevel::None);
        assert_eq!(c.max_pages, None);
    }

    #[test]
    fn json_reads_overrides_and_rejects_zero_concurrency() {
        let c = ClientConfig::from_json(
            r#"{"root_url":"https://api.ig.com/gateway/deal","api_key":"k","max_in_flight":2,
                "timeout_ms":1500,"debug_level":"vv","max_pages":10}"#,
        )
        .unwrap();
        assert_eq!(c.max_in_flight, 2);
        assert_eq!(c.timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(c.debug_level, DebugLevel::VV);
        assert_eq!(c.max_pages, Some(10));

        let err = ClientConfig::from_json(
            r#"{"root_url":"https://api.ig.com/gateway/deal","api_key":"k","max_in_flight":0}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoConcurrency));
    }

    #[test]
    fn setters_chain() {
        let c = ClientConfig::for_environment(Environment::Live, "k")
            .unwrap()
            .with_max_in_flight(8)
            .with_timeout(Some(Duration::from_secs(3)))
            .with_max_pages(Some(5));
        assert_eq!(c.root_url.as_str(), "https://api.ig.com/gateway/deal");
        assert_eq!(c.max_in_flight, 8);
        assert_eq!(c.timeout_ms, Some(3000));
        assert_eq!(c.max_pages, Some(5));
    }
}
