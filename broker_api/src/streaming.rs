//! Real-time updates. The push protocol itself lives behind
//! [`StreamingTransport`]; this module only derives the session and item
//! names from the logged-in account and guards the streams against a
//! released client.

use broker_core::SecretString;
use broker_core::prelude::*;
use futures::future::{self, Either};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::pin::pin;
use std::sync::Arc;
use url::Url;

/// Login material for the push server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSession {
    pub endpoint: Url,
    pub client_id: String,
    pub account_id: String,
    pub password: SecretString,
}

impl StreamSession {
    pub fn from_credentials(credentials: &Credentials) -> Result<Self, ApiError> {
        let Token::Certificate {
            access, security, ..
        } = &credentials.token
        else {
            return Err(ApiError::invalid_request("streaming needs a session-token login")
                .with_suggestion("log in with login_certificate"));
        };
        Ok(Self {
            endpoint: credentials.streamer_url.clone(),
            client_id: credentials.client_id.clone(),
            account_id: credentials.account_id.clone(),
            password: format!("CST-{}|XST-{}", access.expose(), security.expose()).into(),
        })
    }
}

/// One update for a subscribed item. `None` means the field was cleared.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Update {
    pub item: String,
    pub fields: BTreeMap<String, Option<String>>,
}

impl Update {
    #[inline]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_deref())
    }
}

/// Capability to subscribe to push items. The stream ends when the
/// subscription does.
pub trait StreamingTransport: Send + Sync + 'static {
    fn subscribe(
        &self,
        session: &StreamSession,
        items: Vec<String>,
        fields: Vec<String>,
    ) -> BoxStream<'static, Result<Update, ApiError>>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChartScale {
    Tick,
    Second,
    Minute,
    Minute5,
    Hour,
}

impl ChartScale {
    pub const fn as_str(self) -> &'static str {
        match self {
            ChartScale::Tick => "TICK",
            ChartScale::Second => "SECOND",
            ChartScale::Minute => "1MINUTE",
            ChartScale::Minute5 => "5MINUTE",
            ChartScale::Hour => "HOUR",
        }
    }
}

const TRADE_FIELDS: [&str; 3] = ["CONFIRMS", "OPU", "WOU"];

/// Topic builder over a client session.
pub struct Streamer<T> {
    client: WeakClient,
    transport: Arc<T>,
}

impl<T: StreamingTransport> Streamer<T> {
    pub(crate) fn new(client: WeakClient, transport: Arc<T>) -> Self {
        Self { client, transport }
    }

    /// Balance and margin updates of the active account.
    pub fn account(&self, fields: &[&str]) -> BoxStream<'static, Result<Update, ApiError>> {
        self.open(|c| vec![format!("ACCOUNT:{}", c.account_id)], fields)
    }

    pub fn markets(
        &self,
        epics: &[&str],
        fields: &[&str],
    ) -> BoxStream<'static, Result<Update, ApiError>> {
        if let Some(e) = epics.iter().find_map(|e| crate::markets::validate_epic(e).err()) {
            return failed(e);
        }
        let items: Vec<String> = epics.iter().map(|e| format!("MARKET:{e}")).collect();
        self.open(move |_| items, fields)
    }

    /// Deal confirmations and open position / working order updates.
    pub fn trades(&self) -> BoxStream<'static, Result<Update, ApiError>> {
        self.open(|c| vec![format!("TRADE:{}", c.account_id)], &TRADE_FIELDS)
    }

    pub fn charts(
        &self,
        epic: &str,
        scale: ChartScale,
        fields: &[&str],
    ) -> BoxStream<'static, Result<Update, ApiError>> {
        if let Err(e) = crate::markets::validate_epic(epic) {
            return failed(e);
        }
        let item = format!("CHART:{epic}:{}", scale.as_str());
        self.open(move |_| vec![item], fields)
    }

    fn open(
        &self,
        items: impl FnOnce(&Credentials) -> Vec<String>,
        fields: &[&str],
    ) -> BoxStream<'static, Result<Update, ApiError>> {
        let Some(client) = self.client.upgrade() else {
            return failed(ApiError::owner_released());
        };
        let Some(credentials) = client.credentials().current() else {
            return failed(ApiError::session_expired("not logged in")
                .with_suggestion("log in before subscribing"));
        };
        drop(client);
        if credentials.is_expired() {
            return failed(ApiError::session_expired("credentials expired")
                .annotate("expired_at", credentials.token.expires_at()));
        }
        let session = match StreamSession::from_credentials(&credentials) {
            Ok(s) => s,
            Err(e) => return failed(e),
        };

        let items = items(&credentials);
        tracing::debug!(items = ?items, "subscribing");
        let fields = fields.iter().map(|f| (*f).to_owned()).collect();
        let updates = self.transport.subscribe(&session, items, fields);
        guard(self.client.clone(), updates)
    }
}

fn failed(e: ApiError) -> BoxStream<'static, Result<Update, ApiError>> {
    stream::once(async move { Err(e) }).boxed()
}

/// Ends `updates` after its first error, and with `SessionExpired` as soon
/// as the owning client is gone, even while no update is pending.
fn guard(
    client: WeakClient,
    updates: BoxStream<'static, Result<Update, ApiError>>,
) -> BoxStream<'static, Result<Update, ApiError>> {
    stream::unfold(Some((updates, client)), |state| async move {
        let (mut updates, client) = state?;
        let next = {
            let released = pin!(client.released());
            match future::select(updates.next(), released).await {
                Either::Left((next, _)) => next?,
                Either::Right(((), _)) => return Some((Err(ApiError::owner_released()), None)),
            }
        };
        if !client.is_alive() {
            return Some((Err(ApiError::owner_released()), None));
        }
        match next {
            Ok(update) => Some((Ok(update), Some((updates, client)))),
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}
