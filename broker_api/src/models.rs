//! Payloads of the endpoints this crate wraps. Only the fields the client
//! acts on are modelled; serde ignores the rest.

use broker_core::codec::json::{DecodeContext, DecodeInContext};
use broker_core::error::FxError;
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    Second,
    Minute,
    #[serde(rename = "MINUTE_2")]
    Minute2,
    #[serde(rename = "MINUTE_3")]
    Minute3,
    #[serde(rename = "MINUTE_5")]
    Minute5,
    #[serde(rename = "MINUTE_10")]
    Minute10,
    #[serde(rename = "MINUTE_15")]
    Minute15,
    #[serde(rename = "MINUTE_30")]
    Minute30,
    Hour,
    #[serde(rename = "HOUR_2")]
    Hour2,
    #[serde(rename = "HOUR_3")]
    Hour3,
    #[serde(rename = "HOUR_4")]
    Hour4,
    Day,
    Week,
    Month,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Resolution::Second => "SECOND",
            Resolution::Minute => "MINUTE",
            Resolution::Minute2 => "MINUTE_2",
            Resolution::Minute3 => "MINUTE_3",
            Resolution::Minute5 => "MINUTE_5",
            Resolution::Minute10 => "MINUTE_10",
            Resolution::Minute15 => "MINUTE_15",
            Resolution::Minute30 => "MINUTE_30",
            Resolution::Hour => "HOUR",
            Resolution::Hour2 => "HOUR_2",
            Resolution::Hour3 => "HOUR_3",
            Resolution::Hour4 => "HOUR_4",
            Resolution::Day => "DAY",
            Resolution::Week => "WEEK",
            Resolution::Month => "MONTH",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub epic: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub lot_size: Option<f64>,
    #[serde(default)]
    pub expiry: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSnapshot {
    pub market_status: String,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub offer: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    /// Account-local wall clock, `HH:MM:SS`.
    #[serde(default)]
    pub update_time: Option<String>,
    #[serde(default)]
    pub delay_time: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MarketSnapshot {
    pub status: String,
    pub bid: Option<f64>,
    pub offer: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    /// `None` when the server sent no time or the response carried no
    /// `Date` header to anchor it to.
    pub updated_at: Option<DateTime<Utc>>,
    pub delay_minutes: f64,
}

impl DecodeInContext for MarketSnapshot {
    type Raw = RawSnapshot;

    fn resolve(raw: RawSnapshot, cx: &DecodeContext) -> Result<Self, FxError> {
        let updated_at = match raw.update_time.as_deref() {
            None | Some("") => None,
            Some(s) => {
                let t = NaiveTime::parse_from_str(s, "%H:%M:%S")
                    .map_err(|e| format!("updateTime '{s}': {e}"))?;
                cx.local_time_to_utc(t)
            }
        };
        Ok(Self {
            status: raw.market_status,
            bid: raw.bid,
            offer: raw.offer,
            high: raw.high,
            low: raw.low,
            updated_at,
            delay_minutes: raw.delay_time,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RawMarket {
    pub instrument: Instrument,
    pub snapshot: RawSnapshot,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Market {
    pub instrument: Instrument,
    pub snapshot: MarketSnapshot,
}

impl DecodeInContext for Market {
    type Raw = RawMarket;

    fn resolve(raw: RawMarket, cx: &DecodeContext) -> Result<Self, FxError> {
        Ok(Self {
            instrument: raw.instrument,
            snapshot: MarketSnapshot::resolve(raw.snapshot, cx)?,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMarketDetails {
    pub market_details: Vec<RawMarket>,
}

/// Body of the batched `markets` call.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketDetails(pub Vec<Market>);

impl DecodeInContext for MarketDetails {
    type Raw = RawMarketDetails;

    fn resolve(raw: RawMarketDetails, cx: &DecodeContext) -> Result<Self, FxError> {
        Vec::<Market>::resolve(raw.market_details, cx).map(MarketDetails)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last_traded: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBar {
    #[serde(rename = "snapshotTimeUTC")]
    pub time: NaiveDateTime,
    pub open_price: PricePoint,
    pub close_price: PricePoint,
    pub high_price: PricePoint,
    pub low_price: PricePoint,
    #[serde(default)]
    pub last_traded_volume: Option<f64>,
}

impl PriceBar {
    #[inline]
    pub fn time_utc(&self) -> DateTime<Utc> {
        self.time.and_utc()
    }
}

/// Paging block of the price history call. Page numbers start at 1.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    pub page_size: u32,
    pub page_number: u32,
    pub total_pages: u32,
}

impl PageData {
    #[inline]
    pub fn next_page(&self) -> Option<u32> {
        (self.page_number < self.total_pages).then_some(self.page_number + 1)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PriceMetadata {
    pub page_data: PageData,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawPricePage {
    pub prices: Vec<PriceBar>,
    #[serde(default)]
    pub instrument_type: Option<String>,
    pub metadata: PriceMetadata,
}

/// One page of price history, emitted as soon as it arrives.
#[derive(Clone, Debug, PartialEq)]
pub struct PricePage {
    pub number: u32,
    pub total: u32,
    pub instrument_type: Option<String>,
    pub bars: Vec<PriceBar>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub date: NaiveDateTime,
    pub epic: String,
    #[serde(default)]
    pub period: Option<String>,
    pub deal_id: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct Paging {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ActivityMetadata {
    pub paging: Paging,
}

#[derive(Deserialize)]
pub(crate) struct RawActivityPage {
    pub activities: Vec<Activity>,
    pub metadata: ActivityMetadata,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetails {
    pub client_id: String,
    pub account_id: String,
    pub timezone_offset: f64,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    pub lightstreamer_endpoint: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn snapshot_time_is_anchored_to_server_date() {
        let raw: RawSnapshot = serde_json::from_str(
            r#"{"marketStatus":"TRADEABLE","bid":1.1,"offer":1.2,"updateTime":"23:59:00","delayTime":0}"#,
        )
        .unwrap();
        let cx = DecodeContext {
            timezone: FixedOffset::east_opt(0),
            server_date: Some(Utc.with_ymd_and_hms(2026, 10, 18, 0, 1, 0).unwrap()),
        };
        let snap = MarketSnapshot::resolve(raw, &cx).unwrap();
        assert_eq!(
            snap.updated_at.unwrap(),
            Utc.with_ymd_and_hms(2026, 10, 17, 23, 59, 0).unwrap()
        );
        assert_eq!(snap.status, "TRADEABLE");
    }

    #[test]
    fn malformed_update_time_fails_resolution() {
        let raw: RawSnapshot =
            serde_json::from_str(r#"{"marketStatus":"CLOSED","updateTime":"25:99"}"#).unwrap();
        assert!(MarketSnapshot::resolve(raw, &DecodeContext::default()).is_err());
    }

    #[test]
    fn resolution_names_match_the_wire() {
        assert_eq!(Resolution::Minute15.as_str(), "MINUTE_15");
        assert_eq!(
            serde_json::to_string(&Resolution::Hour4).unwrap(),
            r#""HOUR_4""#
        );
        let r: Resolution = serde_json::from_str(r#""DAY""#).unwrap();
        assert_eq!(r, Resolution::Day);
    }

    #[test]
    fn page_data_next() {
        let p = PageData {
            page_size: 20,
            page_number: 2,
            total_pages: 3,
        };
        assert_eq!(p.next_page(), Some(3));
        let last = PageData {
            page_number: 3,
            ..p
        };
        assert_eq!(last.next_page(), None);
    }
}
