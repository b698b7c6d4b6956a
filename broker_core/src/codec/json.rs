use crate::codec::*;
use crate::error::FxError;
use bytes::Bytes;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use http::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Copy, Clone, Debug, Default)]
pub struct Json;

impl ContentType for Json {
    const CONTENT_TYPE: &'static str = "application/json";
}

impl<T> Encodes<T> for Json
where
    T: Serialize,
{
    type Error = serde_json::Error;
    fn encode(output: &T) -> Result<Bytes, Self::Error> {
        serde_json::to_vec(output).map(Bytes::from)
    }
}

impl<T> Decodes<T> for Json
where
    T: DeserializeOwned,
{
    type Error = serde_json::Error;
    fn decode(&self, bytes: &Bytes) -> Result<T, Self::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Values a decoder may need beyond the body itself.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DecodeContext {
    /// Time zone the account reports local times in.
    pub timezone: Option<FixedOffset>,
    /// Server clock, from the response `Date` header.
    pub server_date: Option<DateTime<Utc>>,
}

impl DecodeContext {
    pub fn from_headers(headers: &HeaderMap, timezone: Option<FixedOffset>) -> Self {
        let server_date = headers
            .get(http::header::DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
            .map(|d| d.with_timezone(&Utc));
        Self {
            timezone,
            server_date,
        }
    }

    /// Anchors a server-local wall-clock time to the most recent matching
    /// instant not after the server date.
    pub fn local_time_to_utc(&self, time: NaiveTime) -> Option<DateTime<Utc>> {
        let tz = self.timezone?;
        let now = self.server_date?.with_timezone(&tz);
        let candidate = tz
            .from_local_datetime(&now.date_naive().and_time(time))
            .single()?
            .with_timezone(&Utc);
        if candidate > now.with_timezone(&Utc) {
            Some(candidate - Duration::days(1))
        } else {
            Some(candidate)
        }
    }
}

/// A type decoded in two steps: a plain serde shape, then resolution
/// against the [`DecodeContext`] of the response.
pub trait DecodeInContext: Sized {
    type Raw: DeserializeOwned;
    fn resolve(raw: Self::Raw, cx: &DecodeContext) -> Result<Self, FxError>;
}

impl<T: DecodeInContext> DecodeInContext for Vec<T> {
    type Raw = Vec<T::Raw>;
    fn resolve(raw: Self::Raw, cx: &DecodeContext) -> Result<Self, FxError> {
        raw.into_iter().map(|r| T::resolve(r, cx)).collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextualJsonError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("resolve: {0}")]
    Resolve(FxError),
}

/// JSON decoder configured with a [`DecodeContext`].
#[derive(Copy, Clone, Debug, Default)]
pub struct ContextualJson {
    pub cx: DecodeContext,
}

impl ContextualJson {
    #[inline]
    pub fn new(cx: DecodeContext) -> Self {
        Self { cx }
    }
}

impl<T> Decodes<T> for ContextualJson
where
    T: DecodeInContext,
{
    type Error = ContextualJsonError;
    fn decode(&self, bytes: &Bytes) -> Result<T, Self::Error> {
        let raw: T::Raw = serde_json::from_slice(bytes)?;
        T::resolve(raw, &self.cx).map_err(ContextualJsonError::Resolve)
    }
}
