use crate::error::ApiError;
use crate::secret::SecretString;
use chrono::{DateTime, FixedOffset, Utc};
use http::header::{AUTHORIZATION, HeaderName};
use http::{HeaderMap, HeaderValue};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use url::Url;

pub const CST: HeaderName = HeaderName::from_static("cst");
pub const X_SECURITY_TOKEN: HeaderName = HeaderName::from_static("x-security-token");
pub const ACCOUNT_ID: HeaderName = HeaderName::from_static("ig-account-id");

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    /// Session tokens issued by the v2 login.
    Certificate {
        access: SecretString,
        security: SecretString,
        expires_at: DateTime<Utc>,
    },
    /// OAuth tokens issued by the v3 login.
    OAuth {
        access: SecretString,
        refresh: SecretString,
        scope: String,
        kind: String,
        expires_at: DateTime<Utc>,
    },
}

impl Token {
    #[inline]
    pub fn expires_at(&self) -> DateTime<Utc> {
        match self {
            Token::Certificate { expires_at, .. } | Token::OAuth { expires_at, .. } => *expires_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub account_id: String,
    pub api_key: SecretString,
    pub token: Token,
    pub streamer_url: Url,
    pub timezone: FixedOffset,
}

impl Credentials {
    /// Headers that authenticate a request, derived only from the token variant.
    pub fn request_headers(&self) -> Result<HeaderMap, ApiError> {
        let mut h = HeaderMap::with_capacity(2);
        match &self.token {
            Token::Certificate {
                access, security, ..
            } => {
                h.insert(CST, header_value(access.expose())?);
                h.insert(X_SECURITY_TOKEN, header_value(security.expose())?);
            }
            Token::OAuth { access, kind, .. } => {
                let auth = format!("{} {}", kind, access.expose());
                h.insert(AUTHORIZATION, header_value(&auth)?);
                h.insert(ACCOUNT_ID, header_value(&self.account_id)?);
            }
        }
        Ok(h)
    }

    /// No grace period: a token expiring exactly now is expired.
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.token.expires_at() <= now
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

fn header_value(s: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(s).map_err(|e| {
        ApiError::invalid_request("credential contains bytes not allowed in a header")
            .with_underlying(e)
    })
}

#[derive(Default)]
struct Slot {
    credentials: Option<Arc<Credentials>>,
    generation: u64,
}

/// Owner of the live credentials of one client.
///
/// Readers get an `Arc` snapshot; writers swap the whole record under the
/// write lock, so no reader ever sees a half-updated value. Refreshes are
/// single-flight: see [`CredentialHolder::refresh_with`].
#[derive(Default)]
pub struct CredentialHolder {
    slot: RwLock<Slot>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl CredentialHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<Credentials>> {
        self.snapshot().0
    }

    /// Current credentials plus the generation they were installed at.
    pub fn snapshot(&self) -> (Option<Arc<Credentials>>, u64) {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        (slot.credentials.clone(), slot.generation)
    }

    pub fn set(&self, credentials: Credentials) -> Arc<Credentials> {
        let fresh = Arc::new(credentials);
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.credentials = Some(fresh.clone());
        slot.generation += 1;
        fresh
    }

    pub fn clear(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.credentials = None;
        slot.generation += 1;
    }

    /// Copy-modify-swap of the current record (e.g. switching account).
    pub fn update(&self, f: impl FnOnce(&mut Credentials)) -> Result<Arc<Credentials>, ApiError> {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = slot.credentials.as_ref() else {
            return Err(ApiError::session_expired("no credentials to update"));
        };
        let mut next = Credentials::clone(current);
        f(&mut next);
        let next = Arc::new(next);
        slot.credentials = Some(next.clone());
        slot.generation += 1;
        Ok(next)
    }

    /// Runs `refresh` unless another caller already replaced the credentials
    /// since `seen_generation` was observed; in that case the newer value is
    /// returned and `refresh` is never invoked. Concurrent callers queue on
    /// one gate, so N waiters on an expired token produce one refresh.
    ///
    /// A refreshed record is discarded if the credentials were set, updated
    /// or cleared while `refresh` ran. The caller then gets the newer record,
    /// or `SessionExpired` after a logout.
    pub async fn refresh_with<F, Fut>(
        &self,
        seen_generation: u64,
        refresh: F,
    ) -> Result<Arc<Credentials>, ApiError>
    where
        F: FnOnce(Arc<Credentials>) -> Fut,
        Fut: Future<Output = Result<Credentials, ApiError>>,
    {
        let _gate = self.refresh_gate.lock().await;
        let (current, generation) = self.snapshot();
        let Some(current) = current else {
            return Err(ApiError::session_expired("logged out while waiting for a refresh"));
        };
        if generation != seen_generation {
            tracing::debug!(generation, "credential refresh coalesced");
            return Ok(current);
        }
        tracing::debug!(generation, "credential refresh started");
        let fresh = refresh(current).await?;

        // Install only over the record the refresh started from; a logout or
        // account switch that landed meanwhile wins.
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.generation != generation {
            tracing::debug!(
                generation = slot.generation,
                "credential refresh discarded, credentials changed meanwhile"
            );
            return slot.credentials.clone().ok_or_else(|| {
                ApiError::session_expired("logged out while a refresh was running")
            });
        }
        let fresh = Arc::new(fresh);
        slot.credentials = Some(fresh.clone());
        slot.generation += 1;
        tracing::debug!(generation = slot.generation, "credential refresh finished");
        Ok(fresh)
    }
}
