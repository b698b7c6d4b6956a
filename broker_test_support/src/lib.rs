mod assert;
mod mock;

pub use assert::*;
pub use mock::*;

use broker_core::credentials::{Credentials, Token};
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

pub const TEST_ROOT: &str = "https://demo-api.example.com/gateway/deal";

pub fn json_bytes<T: Serialize>(v: &T) -> Bytes {
    Bytes::from(serde_json::to_vec(v).expect("json encode"))
}

pub fn root_url() -> url::Url {
    url::Url::parse(TEST_ROOT).expect("valid test root")
}

/// Certificate-style credentials expiring at `expires_at`.
pub fn certificate_credentials(expires_at: DateTime<Utc>) -> Credentials {
    Credentials {
        client_id: "CLIENT1".into(),
        account_id: "ACC01".into(),
        api_key: "test-key".into(),
        token: Token::Certificate {
            access: "cst-token".into(),
            security: "xst-token".into(),
            expires_at,
        },
        streamer_url: url::Url::parse("https://push.example.com").expect("valid streamer url"),
        timezone: FixedOffset::east_opt(0).expect("utc offset"),
    }
}

/// Credentials valid for the next hour.
pub fn live_credentials() -> Credentials {
    certificate_credentials(Utc::now() + chrono::Duration::hours(1))
}
