mod common;
use common::*;

use broker_api::ErrorKind;
use broker_core::request::VERSION;
use broker_test_support::*;
use chrono::{NaiveDate, NaiveDateTime};
use futures::StreamExt;
use http::StatusCode;
use serde_json::{Value, json};

fn since() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn activity(deal: &str) -> Value {
    json!({
        "date": "2026-10-02T09:15:00",
        "epic": "IX.D.FTSE.DAILY.IP",
        "period": "DFB",
        "dealId": deal,
        "channel": "WEB",
        "type": "POSITION",
        "status": "ACCEPTED",
        "description": "Position opened"
    })
}

fn activity_page(deals: &[&str], next: Option<&str>) -> MockReply {
    let items: Vec<Value> = deals.iter().map(|d| activity(d)).collect();
    MockReply::ok_json(json_bytes(&json!({
        "activities": items,
        "metadata": { "paging": { "size": deals.len(), "next": next } }
    })))
}

#[tokio::test]
async fn follows_next_links_until_none() {
    let next = "/history/activity?version=3&from=2026-10-01T00:00:00&to=2026-10-02T09:00:00&pageSize=50";
    let (transport, handle) = mock()
        .reply(activity_page(&["D1", "D2"], Some(next)))
        .reply(activity_page(&["D3"], None))
        .build();
    let broker = logged_in(transport);

    let pages: Vec<Vec<String>> = broker
        .history()
        .activity(since(), None)
        .map(|p| p.unwrap().into_iter().map(|a| a.deal_id).collect())
        .collect()
        .await;
    assert_eq!(pages, [vec!["D1", "D2"], vec!["D3"]]);

    let reqs = handle.recorded();
    assert_request(&reqs[0])
        .path("/gateway/deal/history/activity")
        .header(VERSION, "3")
        .query_values("from", &["2026-10-01T00:00:00"])
        .query_values("pageSize", &["50"])
        .query_absent("to");
    assert_request(&reqs[1])
        .path("/gateway/deal/history/activity")
        .header(VERSION, "3")
        .header("cst", "cst-token")
        .page_index(1)
        .query_values("to", &["2026-10-02T09:00:00"]);
    handle.finish();
}

#[tokio::test]
async fn empty_next_link_ends_the_run() {
    let (transport, handle) = mock().reply(activity_page(&["D1"], Some(""))).build();
    let broker = logged_in(transport);

    let all = broker.history().all_activity(since(), Some(since())).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].kind, "POSITION");
    assert_request(&handle.recorded()[0]).query_values("to", &["2026-10-01T00:00:00"]);
    handle.finish();
}

#[tokio::test]
async fn failing_follow_up_page_keeps_the_link_in_context() {
    let next = "/history/activity?version=3&from=2026-10-01T00:00:00&pageSize=50&page=2";
    let (transport, handle) = mock()
        .reply(activity_page(&["D1"], Some(next)))
        .reply(MockReply::status(StatusCode::INTERNAL_SERVER_ERROR))
        .build();
    let broker = logged_in(transport);

    let out: Vec<_> = broker.history().activity(since(), None).collect().await;
    assert_eq!(out.len(), 2);
    let err = out[1].as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    assert_eq!(
        err.context().annotation("previous_page.metadata"),
        Some(format!("Some({next:?})").as_str())
    );
    assert!(
        err.context()
            .request
            .as_ref()
            .unwrap()
            .url
            .ends_with("page=2")
    );
    handle.finish();
}

#[tokio::test]
async fn logged_out_history_fails_without_a_request() {
    let (transport, handle) = mock().build();
    let broker = broker(transport);

    let out: Vec<_> = broker.history().activity(since(), None).collect().await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].as_ref().unwrap_err().kind(), ErrorKind::InvalidRequest);
    handle.assert_recorded_len(0);
    handle.finish();
}
