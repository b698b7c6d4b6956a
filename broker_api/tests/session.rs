mod common;
use common::*;

use broker_api::{ErrorKind, X_IG_API_KEY};
use broker_core::credentials::{ACCOUNT_ID, CST, Credentials, Token, X_SECURITY_TOKEN};
use broker_core::error::{DecodeStage, ErrorDetail};
use broker_core::request::VERSION;
use broker_test_support::*;
use chrono::{Duration as ChronoDuration, Utc};
use http::header::AUTHORIZATION;
use http::{HeaderValue, Method, StatusCode};
use serde_json::json;

fn certificate_login_reply() -> MockReply {
    MockReply::ok_json(json_bytes(&json!({
        "accountType": "CFD",
        "clientId": "CLIENT9",
        "currentAccountId": "ABC123",
        "timezoneOffset": 1,
        "lightstreamerEndpoint": "https://apd.marketdatasystems.com"
    })))
}

fn oauth_login_reply() -> MockReply {
    MockReply::ok_json(json_bytes(&json!({
        "clientId": "CLIENT9",
        "accountId": "ABC123",
        "timezoneOffset": 0,
        "lightstreamerEndpoint": "https://apd.marketdatasystems.com",
        "oauthToken": {
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "scope": "profile",
            "token_type": "Bearer",
            "expires_in": "60"
        }
    })))
}

fn session_details_reply() -> MockReply {
    MockReply::ok_json(json_bytes(&json!({
        "clientId": "CLIENT9",
        "accountId": "ABC123",
        "timezoneOffset": 0,
        "locale": "en_GB",
        "currency": "GBP",
        "lightstreamerEndpoint": "https://apd.marketdatasystems.com"
    })))
}

fn expired_oauth() -> Credentials {
    let mut c = live_credentials();
    c.token = Token::OAuth {
        access: "at-1".into(),
        refresh: "rt-1".into(),
        scope: "profile".into(),
        kind: "Bearer".into(),
        expires_at: Utc::now() - ChronoDuration::seconds(1),
    };
    c
}

#[tokio::test]
async fn certificate_login_reads_session_headers() {
    let (transport, handle) = mock()
        .reply(
            certificate_login_reply()
                .with_header(CST, HeaderValue::from_static("cst-abc"))
                .with_header(X_SECURITY_TOKEN, HeaderValue::from_static("xst-abc")),
        )
        .build();
    let broker = broker(transport);

    let creds = broker
        .session()
        .login_certificate("trader", "hunter2")
        .await
        .unwrap();
    assert_eq!(creds.client_id, "CLIENT9");
    assert_eq!(creds.account_id, "ABC123");
    assert_eq!(creds.api_key.expose(), "test-key");
    assert_eq!(creds.timezone.local_minus_utc(), 3600);
    assert_eq!(creds.streamer_url.as_str(), "https://apd.marketdatasystems.com/");
    match &creds.token {
        Token::Certificate {
            access, security, ..
        } => {
            assert_eq!(access.expose(), "cst-abc");
            assert_eq!(security.expose(), "xst-abc");
        }
        other => panic!("unexpected token {other:?}"),
    }
    assert!(!creds.is_expired());
    assert_eq!(broker.credentials().unwrap().account_id, "ABC123");

    let reqs = handle.recorded();
    assert_request(&reqs[0])
        .method(Method::POST)
        .path("/gateway/deal/session")
        .version(2)
        .header(X_IG_API_KEY, "test-key")
        .unauthenticated()
        .body_json(json!({
            "identifier": "trader",
            "password": "hunter2",
            "encryptedPassword": false
        }));
    handle.finish();
}

#[tokio::test]
async fn certificate_login_without_session_headers_is_invalid() {
    let (transport, handle) = mock().reply(certificate_login_reply()).build();
    let broker = broker(transport);

    let err = broker
        .session()
        .login_certificate("trader", "hunter2")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    assert_eq!(
        err.context().detail,
        Some(ErrorDetail::Decode {
            stage: DecodeStage::Transform
        })
    );
    assert!(err.underlying().unwrap().to_string().contains("CST"));
    assert!(err.context().response.is_some());
    assert!(broker.credentials().is_none());
    handle.finish();
}

#[tokio::test]
async fn rejected_login_keeps_status_and_body() {
    let (transport, handle) = mock()
        .reply(MockReply::json(
            StatusCode::UNAUTHORIZED,
            json_bytes(&json!({ "errorCode": "error.security.invalid-details" })),
        ))
        .build();
    let broker = broker(transport);

    let err = broker
        .session()
        .login_certificate("trader", "wrong")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    assert_eq!(err.context().annotation("status"), Some("401"));
    assert!(
        err.context()
            .body
            .as_deref()
            .unwrap()
            .contains("invalid-details")
    );
    assert!(broker.credentials().is_none());
    handle.finish();
}

#[tokio::test]
async fn oauth_login_then_calls_carry_bearer_and_account() {
    let (transport, handle) = mock()
        .reply(oauth_login_reply())
        .reply(session_details_reply())
        .build();
    let broker = broker(transport);

    let creds = broker.session().login_oauth("trader", "hunter2").await.unwrap();
    match &creds.token {
        Token::OAuth {
            kind, expires_at, ..
        } => {
            assert_eq!(kind, "Bearer");
            assert!(*expires_at > Utc::now() + ChronoDuration::seconds(50));
        }
        other => panic!("unexpected token {other:?}"),
    }

    let details = broker.session().session_details().await.unwrap();
    assert_eq!(details.currency.as_deref(), Some("GBP"));

    let reqs = handle.recorded();
    assert_request(&reqs[0])
        .header(VERSION, "3")
        .header_absent(AUTHORIZATION)
        .body_json(json!({ "identifier": "trader", "password": "hunter2" }));
    assert_request(&reqs[1])
        .method(Method::GET)
        .path("/gateway/deal/session")
        .header(AUTHORIZATION, "Bearer at-1")
        .header(ACCOUNT_ID, "ABC123");
    handle.finish();
}

#[tokio::test]
async fn expired_oauth_token_is_refreshed_before_the_call() {
    let (transport, handle) = mock()
        .reply(MockReply::ok_json(json_bytes(&json!({
            "access_token": "at-2",
            "refresh_token": "rt-2",
            "scope": "profile",
            "token_type": "Bearer",
            "expires_in": 60
        }))))
        .reply(session_details_reply())
        .build();
    let broker = broker(transport);
    broker.api().credentials().set(expired_oauth());

    broker.session().session_details().await.unwrap();

    let reqs = handle.recorded();
    assert_request(&reqs[0])
        .method(Method::POST)
        .path("/gateway/deal/session/refresh-token")
        .header(VERSION, "1")
        .header_absent(AUTHORIZATION)
        .body_json(json!({ "refresh_token": "rt-1" }));
    assert_request(&reqs[1]).header(AUTHORIZATION, "Bearer at-2");
    match &broker.credentials().unwrap().token {
        Token::OAuth { refresh, .. } => assert_eq!(refresh.expose(), "rt-2"),
        other => panic!("unexpected token {other:?}"),
    }
    handle.finish();
}

#[tokio::test]
async fn explicit_refresh_installs_new_token() {
    let (transport, handle) = mock()
        .reply(MockReply::ok_json(json_bytes(&json!({
            "access_token": "at-3",
            "refresh_token": "rt-3",
            "scope": "profile",
            "token_type": "Bearer",
            "expires_in": "120"
        }))))
        .build();
    let broker = broker(transport);
    broker.api().credentials().set(expired_oauth());

    let creds = broker.session().refresh_oauth().await.unwrap();
    assert!(!creds.is_expired());
    assert_eq!(creds.account_id, "ACC01");
    handle.finish();
}

#[tokio::test]
async fn expired_session_tokens_cannot_be_refreshed() {
    let (transport, handle) = mock().build();
    let broker = broker(transport);
    broker
        .api()
        .credentials()
        .set(certificate_credentials(Utc::now() - ChronoDuration::seconds(1)));

    let err = broker.session().session_details().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionExpired);
    assert_eq!(err.suggestion(), Some("log in again"));
    handle.assert_recorded_len(0);
    handle.finish();
}

#[tokio::test]
async fn switch_account_updates_credentials_in_place() {
    let (transport, handle) = mock()
        .reply(MockReply::ok_json(json_bytes(&json!({
            "trailingStopsEnabled": false,
            "dealingEnabled": true
        }))))
        .build();
    let broker = logged_in(transport);

    let creds = broker.session().switch_account("ACC02").await.unwrap();
    assert_eq!(creds.account_id, "ACC02");
    assert_eq!(broker.credentials().unwrap().account_id, "ACC02");
    // token untouched
    match &creds.token {
        Token::Certificate { access, .. } => assert_eq!(access.expose(), "cst-token"),
        other => panic!("unexpected token {other:?}"),
    }

    let reqs = handle.recorded();
    assert_request(&reqs[0])
        .method(Method::PUT)
        .path("/gateway/deal/session")
        .session_headers("cst-token", "xst-token")
        .body_json(json!({ "accountId": "ACC02", "defaultAccount": false }));
    handle.finish();
}

#[tokio::test]
async fn logout_clears_credentials() {
    let (transport, handle) = mock()
        .reply(MockReply::status(StatusCode::NO_CONTENT))
        .build();
    let broker = logged_in(transport);

    broker.session().logout().await.unwrap();
    assert!(broker.credentials().is_none());

    let err = broker.session().session_details().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    handle.assert_recorded_len(1);
    assert_request(&handle.recorded()[0]).method(Method::DELETE);
    handle.finish();
}

#[tokio::test]
async fn failed_logout_keeps_credentials() {
    let (transport, handle) = mock()
        .reply(MockReply::status(StatusCode::INTERNAL_SERVER_ERROR))
        .build();
    let broker = logged_in(transport);

    let err = broker.session().logout().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    assert!(broker.credentials().is_some());
    handle.finish();
}

#[tokio::test]
async fn logout_with_a_body_keeps_credentials() {
    let (transport, handle) = mock()
        .reply(MockReply::status(StatusCode::NO_CONTENT).with_body(json_bytes(&json!({}))))
        .build();
    let broker = logged_in(transport);

    let err = broker.session().logout().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    assert!(matches!(
        err.context().detail,
        Some(ErrorDetail::Decode {
            stage: DecodeStage::Structure
        })
    ));
    assert!(broker.credentials().is_some());
    handle.finish();
}
