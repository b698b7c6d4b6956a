use crate::models::SessionDetails;
use broker_core::SecretString;
use broker_core::credentials::{CST, X_SECURITY_TOKEN};
use broker_core::prelude::*;
use chrono::{DateTime, FixedOffset, Utc};
use futures::future::BoxFuture;
use http::HeaderMap;
use http::header::HeaderName;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use url::Url;

/// Lifetime the platform grants certificate session tokens.
const CERTIFICATE_LIFETIME_HOURS: i64 = 6;

const JSON: &str = "application/json";

#[derive(Debug, thiserror::Error)]
pub enum SessionDataError {
    #[error("response is missing the {0} header")]
    MissingHeader(&'static str),
    #[error("header {0} is not valid text")]
    HeaderText(&'static str),
    #[error("timezone offset {0} is out of range")]
    Timezone(f64),
    #[error("streaming endpoint: {0}")]
    Streamer(#[from] url::ParseError),
    #[error("token lifetime '{0}' is not a number of seconds")]
    ExpiresIn(String),
}

#[derive(Clone)]
struct Login {
    identifier: String,
    password: SecretString,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificateSession {
    client_id: String,
    current_account_id: String,
    timezone_offset: f64,
    lightstreamer_endpoint: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(i64),
    Text(String),
}

#[derive(Deserialize)]
struct OAuthToken {
    access_token: String,
    refresh_token: String,
    scope: String,
    token_type: String,
    expires_in: Seconds,
}

impl OAuthToken {
    fn into_token(self, now: DateTime<Utc>) -> Result<Token, SessionDataError> {
        let secs = match self.expires_in {
            Seconds::Number(n) => n,
            Seconds::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| SessionDataError::ExpiresIn(s))?,
        };
        Ok(Token::OAuth {
            access: self.access_token.into(),
            refresh: self.refresh_token.into(),
            scope: self.scope,
            kind: self.token_type,
            expires_at: now + chrono::Duration::seconds(secs),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthSession {
    client_id: String,
    account_id: String,
    timezone_offset: f64,
    lightstreamer_endpoint: String,
    oauth_token: OAuthToken,
}

fn offset_hours(hours: f64) -> Result<FixedOffset, SessionDataError> {
    FixedOffset::east_opt((hours * 3600.0).round() as i32).ok_or(SessionDataError::Timezone(hours))
}

fn header_secret(
    headers: &HeaderMap,
    name: &HeaderName,
    label: &'static str,
) -> Result<SecretString, SessionDataError> {
    let v = headers.get(name).ok_or(SessionDataError::MissingHeader(label))?;
    v.to_str()
        .map(SecretString::from)
        .map_err(|_| SessionDataError::HeaderText(label))
}

/// Session endpoints: login, token refresh, account switch and logout.
pub struct Session<'a> {
    api: &'a ApiClient,
    api_key: &'a SecretString,
}

impl<'a> Session<'a> {
    pub(crate) fn new(api: &'a ApiClient, api_key: &'a SecretString) -> Self {
        Self { api, api_key }
    }

    /// v2 login. Session tokens come back in the `CST` and
    /// `X-SECURITY-TOKEN` response headers.
    pub async fn login_certificate(
        &self,
        identifier: impl Into<String>,
        password: impl Into<SecretString>,
    ) -> Result<Arc<Credentials>, ApiError> {
        let template = RequestTemplate::<Login>::post("session")
            .version(2)
            .auth(false)
            .json_body(|l: &Login| {
                json!({
                    "identifier": l.identifier,
                    "password": l.password.expose(),
                    "encryptedPassword": false,
                })
            });
        let login = Login {
            identifier: identifier.into(),
            password: password.into(),
        };
        let exchange = self
            .api
            .call(template, login)
            .expect_status([200])
            .expect_content_type(JSON)
            .await?;

        let api_key = self.api_key.clone();
        let credentials = exchange.decode_map(
            |_, _, _| Ok::<_, FxError>(Json),
            move |s: CertificateSession, _, response| {
                let token = Token::Certificate {
                    access: header_secret(&response.headers, &CST, "CST")?,
                    security: header_secret(
                        &response.headers,
                        &X_SECURITY_TOKEN,
                        "X-SECURITY-TOKEN",
                    )?,
                    expires_at: Utc::now() + chrono::Duration::hours(CERTIFICATE_LIFETIME_HOURS),
                };
                Ok::<_, SessionDataError>(Credentials {
                    client_id: s.client_id,
                    account_id: s.current_account_id,
                    api_key,
                    token,
                    streamer_url: Url::parse(&s.lightstreamer_endpoint)?,
                    timezone: offset_hours(s.timezone_offset)?,
                })
            },
        )?;
        tracing::info!(account = %credentials.account_id, "logged in with session tokens");
        Ok(self.api.credentials().set(credentials))
    }

    /// v3 login returning OAuth tokens.
    pub async fn login_oauth(
        &self,
        identifier: impl Into<String>,
        password: impl Into<SecretString>,
    ) -> Result<Arc<Credentials>, ApiError> {
        let template = RequestTemplate::<Login>::post("session")
            .version(3)
            .auth(false)
            .json_body(|l: &Login| {
                json!({
                    "identifier": l.identifier,
                    "password": l.password.expose(),
                })
            });
        let login = Login {
            identifier: identifier.into(),
            password: password.into(),
        };
        let exchange = self
            .api
            .call(template, login)
            .expect_status([200])
            .expect_content_type(JSON)
            .await?;

        let api_key = self.api_key.clone();
        let credentials = exchange.decode_map(
            |_, _, _| Ok::<_, FxError>(Json),
            move |s: OAuthSession, _, _| {
                Ok::<_, SessionDataError>(Credentials {
                    client_id: s.client_id,
                    account_id: s.account_id,
                    api_key,
                    token: s.oauth_token.into_token(Utc::now())?,
                    streamer_url: Url::parse(&s.lightstreamer_endpoint)?,
                    timezone: offset_hours(s.timezone_offset)?,
                })
            },
        )?;
        tracing::info!(account = %credentials.account_id, "logged in with oauth");
        Ok(self.api.credentials().set(credentials))
    }

    /// Exchanges the refresh token for a new access token and installs it.
    /// Concurrent refreshes of the same token run once.
    pub async fn refresh_oauth(&self) -> Result<Arc<Credentials>, ApiError> {
        let holder = self.api.credentials();
        let (current, generation) = holder.snapshot();
        if current.is_none() {
            return Err(ApiError::session_expired("not logged in"));
        }
        let client = self.api.downgrade();
        holder
            .refresh_with(generation, |current| refresh_token(client, current))
            .await
    }

    pub async fn session_details(&self) -> Result<SessionDetails, ApiError> {
        self.api
            .call(RequestTemplate::<()>::get("session"), ())
            .expect_status([200])
            .json()
            .await
    }

    /// Makes `account_id` the active account and updates the credentials
    /// in place.
    pub async fn switch_account(
        &self,
        account_id: impl Into<String>,
    ) -> Result<Arc<Credentials>, ApiError> {
        let account_id = account_id.into();
        let template = RequestTemplate::<String>::put("session").json_body(|id: &String| {
            json!({
                "accountId": id,
                "defaultAccount": false,
            })
        });
        self.api
            .call(template, account_id)
            .expect_status([200])
            .await
            .and_then(|exchange| {
                let id = exchange.values;
                self.api.credentials().update(|c| c.account_id = id)
            })
    }

    /// Ends the session on the server, then forgets the credentials.
    pub async fn logout(&self) -> Result<(), ApiError> {
        self.api
            .call(RequestTemplate::<()>::delete("session"), ())
            .expect_status([204])
            .decode(|_, _, _| Ok::<_, std::convert::Infallible>(NoContent))
            .await?;
        self.api.credentials().clear();
        tracing::info!("logged out");
        Ok(())
    }
}

async fn refresh_token(
    client: WeakClient,
    current: Arc<Credentials>,
) -> Result<Credentials, ApiError> {
    let Token::OAuth { refresh, .. } = &current.token else {
        return Err(ApiError::session_expired("session tokens cannot be refreshed")
            .with_suggestion("log in again"));
    };
    let template = RequestTemplate::<SecretString>::post("session/refresh-token")
        .auth(false)
        .json_body(|r: &SecretString| json!({ "refresh_token": r.expose() }));
    let exchange = client
        .call(template, refresh.clone())
        .expect_status([200])
        .expect_content_type(JSON)
        .await?;
    let token = exchange.decode_map(
        |_, _, _| Ok::<_, FxError>(Json),
        |t: OAuthToken, _, _| t.into_token(Utc::now()),
    )?;
    let mut next = Credentials::clone(&current);
    next.token = token;
    Ok(next)
}

/// Refreshes expired OAuth credentials through the refresh-token call.
/// Session-token credentials cannot be refreshed and fail as `SessionExpired`.
#[derive(Copy, Clone, Debug, Default)]
pub struct OAuthRefresher;

impl CredentialRefresher for OAuthRefresher {
    fn refresh<'a>(
        &'a self,
        client: WeakClient,
        current: Arc<Credentials>,
    ) -> BoxFuture<'a, Result<Credentials, ApiError>> {
        Box::pin(refresh_token(client, current))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn expires_in_accepts_text_or_number() {
        let now = Utc::now();
        for body in [
            r#"{"access_token":"a","refresh_token":"r","scope":"profile","token_type":"Bearer","expires_in":"60"}"#,
            r#"{"access_token":"a","refresh_token":"r","scope":"profile","token_type":"Bearer","expires_in":60}"#,
        ] {
            let t: OAuthToken = serde_json::from_str(body).unwrap();
            let token = t.into_token(now).unwrap();
            assert_eq!(token.expires_at(), now + chrono::Duration::seconds(60));
        }

        let t: OAuthToken = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","scope":"s","token_type":"Bearer","expires_in":"soon"}"#,
        )
        .unwrap();
        assert!(matches!(
            t.into_token(now),
            Err(SessionDataError::ExpiresIn(s)) if s == "soon"
        ));
    }

    #[test]
    fn timezone_offsets_in_hours() {
        assert_eq!(offset_hours(1.0).unwrap().local_minus_utc(), 3600);
        assert_eq!(offset_hours(5.5).unwrap().local_minus_utc(), 19800);
        assert!(offset_hours(30.0).is_err());
    }
}
