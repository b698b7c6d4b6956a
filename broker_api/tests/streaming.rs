mod common;
use common::*;

use broker_api::prelude::*;
use broker_core::credentials::Token;
use broker_test_support::*;
use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug)]
struct Subscription {
    session: StreamSession,
    items: Vec<String>,
    fields: Vec<String>,
}

/// Emits one update per item every 10ms, forever.
#[derive(Default)]
struct Ticker {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Ticker {
    fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().unwrap().clone()
    }
}

impl StreamingTransport for Ticker {
    fn subscribe(
        &self,
        session: &StreamSession,
        items: Vec<String>,
        fields: Vec<String>,
    ) -> BoxStream<'static, Result<Update, ApiError>> {
        self.subscriptions.lock().unwrap().push(Subscription {
            session: session.clone(),
            items: items.clone(),
            fields: fields.clone(),
        });
        stream::unfold(0u64, move |n| {
            let item = items[n as usize % items.len()].clone();
            let fields = fields.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let fields: BTreeMap<String, Option<String>> = fields
                    .into_iter()
                    .map(|f| (f, Some(n.to_string())))
                    .collect();
                Some((Ok(Update { item, fields }), n + 1))
            }
        })
        .boxed()
    }
}

#[tokio::test]
async fn account_topic_uses_session_tokens() {
    let (transport, handle) = mock().build();
    let broker = logged_in(transport);
    let ticker = Arc::new(Ticker::default());

    let mut updates = broker.streamer(ticker.clone()).account(&["AVAILABLE_CASH", "PNL"]);
    let first = updates.next().await.unwrap().unwrap();
    assert_eq!(first.item, "ACCOUNT:ACC01");
    assert_eq!(first.field("PNL"), Some("0"));

    let subs = ticker.subscriptions();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].session.endpoint.as_str(), "https://push.example.com/");
    assert_eq!(subs[0].session.account_id, "ACC01");
    assert_eq!(
        subs[0].session.password.expose(),
        "CST-cst-token|XST-xst-token"
    );
    assert_eq!(subs[0].fields, ["AVAILABLE_CASH", "PNL"]);
    handle.finish();
}

#[tokio::test]
async fn market_trade_and_chart_item_names() {
    let (transport, handle) = mock().build();
    let broker = logged_in(transport);
    let ticker = Arc::new(Ticker::default());
    let streamer = broker.streamer(ticker.clone());

    streamer
        .markets(&["CS.D.EURUSD.CFD.IP", "IX.D.FTSE.DAILY.IP"], &["BID", "OFFER"])
        .next()
        .await
        .unwrap()
        .unwrap();
    streamer.trades().next().await.unwrap().unwrap();
    streamer
        .charts("CS.D.EURUSD.CFD.IP", ChartScale::Minute, &["OFR_CLOSE"])
        .next()
        .await
        .unwrap()
        .unwrap();

    let subs = ticker.subscriptions();
    assert_eq!(
        subs[0].items,
        ["MARKET:CS.D.EURUSD.CFD.IP", "MARKET:IX.D.FTSE.DAILY.IP"]
    );
    assert_eq!(subs[1].items, ["TRADE:ACC01"]);
    assert_eq!(subs[1].fields, ["CONFIRMS", "OPU", "WOU"]);
    assert_eq!(subs[2].items, ["CHART:CS.D.EURUSD.CFD.IP:1MINUTE"]);
    handle.finish();
}

#[tokio::test]
async fn logged_out_or_expired_sessions_cannot_subscribe() {
    let (transport, handle) = mock().build();
    let broker = broker(transport);
    let ticker = Arc::new(Ticker::default());

    let err = broker
        .streamer(ticker.clone())
        .trades()
        .next()
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionExpired);

    broker
        .api()
        .credentials()
        .set(certificate_credentials(Utc::now() - ChronoDuration::seconds(1)));
    let err = broker
        .streamer(ticker.clone())
        .trades()
        .next()
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionExpired);
    assert!(err.context().annotation("expired_at").is_some());

    assert!(ticker.subscriptions().is_empty());
    handle.finish();
}

#[tokio::test]
async fn oauth_sessions_are_rejected_for_streaming() {
    let (transport, handle) = mock().build();
    let broker = broker(transport);
    let mut creds = live_credentials();
    creds.token = Token::OAuth {
        access: "at".into(),
        refresh: "rt".into(),
        scope: "profile".into(),
        kind: "Bearer".into(),
        expires_at: Utc::now() + ChronoDuration::hours(1),
    };
    broker.api().credentials().set(creds);

    let ticker = Arc::new(Ticker::default());
    let mut s = broker.streamer(ticker.clone()).account(&["PNL"]);
    let err = s.next().await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert!(s.next().await.is_none());
    assert!(ticker.subscriptions().is_empty());
    handle.finish();
}

#[tokio::test]
async fn dropping_the_broker_ends_open_streams() {
    let (transport, handle) = mock().build();
    let broker = logged_in(transport);
    let ticker = Arc::new(Ticker::default());

    let mut updates = broker.streamer(ticker.clone()).markets(&["CS.D.EURUSD.CFD.IP"], &["BID"]);
    assert!(updates.next().await.unwrap().is_ok());
    drop(broker);

    let err = tokio::time::timeout(Duration::from_secs(1), updates.next())
        .await
        .expect("stream must not hang")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionExpired);
    assert!(updates.next().await.is_none());
    handle.finish();
}

/// Subscribes successfully but never sends anything.
struct Silent;

impl StreamingTransport for Silent {
    fn subscribe(
        &self,
        _session: &StreamSession,
        _items: Vec<String>,
        _fields: Vec<String>,
    ) -> BoxStream<'static, Result<Update, ApiError>> {
        stream::pending().boxed()
    }
}

#[tokio::test]
async fn idle_streams_end_when_the_broker_is_dropped() {
    let (transport, handle) = mock().build();
    let broker = logged_in(transport);

    let mut updates = broker.streamer(Arc::new(Silent)).account(&["PNL"]);
    assert!(
        tokio::time::timeout(Duration::from_millis(20), updates.next())
            .await
            .is_err()
    );

    drop(broker);
    let err = tokio::time::timeout(Duration::from_secs(1), updates.next())
        .await
        .expect("idle stream must end once the broker is gone")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionExpired);
    assert!(updates.next().await.is_none());
    handle.finish();
}
