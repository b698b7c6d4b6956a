use broker_api::{Broker, ClientConfig};
use broker_test_support::*;
use serde_json::{Value, json};

#[allow(unused)]
pub fn config() -> ClientConfig {
    // one permit keeps scripted replies paired with requests in order
    ClientConfig::new(root_url(), "test-key").with_max_in_flight(1)
}

#[allow(unused)]
pub fn broker(transport: MockTransport) -> Broker {
    Broker::with_transport(config(), transport).unwrap()
}

#[allow(unused)]
pub fn logged_in(transport: MockTransport) -> Broker {
    let broker = broker(transport);
    broker.api().credentials().set(live_credentials());
    broker
}

#[allow(unused)]
pub fn market_json(epic: &str) -> Value {
    json!({
        "instrument": { "epic": epic, "name": format!("{epic} name"), "type": "CURRENCIES" },
        "snapshot": {
            "marketStatus": "TRADEABLE",
            "bid": 1.1,
            "offer": 1.2,
            "updateTime": "10:00:00",
            "delayTime": 0
        }
    })
}

#[allow(unused)]
pub fn price_page(number: u32, total: u32) -> MockReply {
    MockReply::ok_json(json_bytes(&json!({
        "prices": [{
            "snapshotTimeUTC": format!("2026-10-01T0{number}:00:00"),
            "openPrice": { "bid": 1.0, "ask": 1.1, "lastTraded": null },
            "closePrice": { "bid": 1.2, "ask": 1.3, "lastTraded": null },
            "highPrice": { "bid": 1.4, "ask": 1.5, "lastTraded": null },
            "lowPrice": { "bid": 0.9, "ask": 1.0, "lastTraded": null },
            "lastTradedVolume": 10
        }],
        "instrumentType": "CURRENCIES",
        "metadata": {
            "pageData": { "pageSize": 1, "pageNumber": number, "totalPages": total }
        }
    })))
}
