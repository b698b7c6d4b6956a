use crate::error::ApiError;
use http::header::{ACCEPT, HeaderName};
use http::{HeaderMap, HeaderValue};
use url::Url;

/// Which part of the builder is currently writing.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum PolicyLayer {
    /// Client-wide headers, `Version`, `Accept`.
    #[default]
    Client = 0,
    /// Headers derived from the session credentials.
    Credentials = 1,
    /// Headers supplied by the endpoint's header function.
    Caller = 2,
}

/// Headers and query items accumulated while a request is built.
///
/// Collision rules:
/// - a later layer replaces a same-named header from an earlier layer;
/// - except that `Caller` may not replace a `Credentials` header, which is
///   rejected as `InvalidRequest`.
///
/// Query items are keyed: setting a name removes every earlier value for it.
#[derive(Default)]
pub struct Policy {
    headers: HeaderMap,
    query: Vec<(String, String)>,
    layer: PolicyLayer,
    credential_headers: Vec<HeaderName>,
}

impl Policy {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn layer(&self) -> PolicyLayer {
        self.layer
    }

    #[inline]
    pub fn set_layer(&mut self, layer: PolicyLayer) {
        self.layer = layer;
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    #[inline]
    pub fn credential_headers(&self) -> &[HeaderName] {
        &self.credential_headers
    }

    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), ApiError> {
        match self.layer {
            PolicyLayer::Caller if self.credential_headers.contains(&name) => {
                return Err(ApiError::invalid_request(format!(
                    "header '{}' is owned by the session credentials",
                    name
                ))
                .with_suggestion("drop the header from the endpoint's header function"));
            }
            PolicyLayer::Credentials if !self.credential_headers.contains(&name) => {
                self.credential_headers.push(name.clone());
            }
            _ => {}
        }
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn extend_headers(&mut self, headers: HeaderMap) -> Result<(), ApiError> {
        let mut last: Option<HeaderName> = None;
        for (name, value) in headers {
            match name {
                Some(n) => {
                    self.insert_header(n.clone(), value)?;
                    last = Some(n);
                }
                // extra value for the previous name
                None => {
                    if let Some(n) = &last {
                        self.headers.append(n.clone(), value);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn ensure_accept(&mut self, ct: &'static str) {
        if ct.is_empty() {
            return;
        }
        self.headers.insert(ACCEPT, HeaderValue::from_static(ct));
    }

    /// Override-by-key: removes existing entries with the same key, then appends.
    pub fn set_query(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.remove_query(&key);
        self.query.push((key, value.into()));
    }

    pub fn remove_query(&mut self, key: &str) {
        self.query.retain(|(k, _)| k != key);
    }

    pub fn into_headers(self) -> (HeaderMap, Vec<HeaderName>) {
        (self.headers, self.credential_headers)
    }
}

/// Merges `items` into the query already present on `url`. An item whose
/// name already exists replaces every earlier value of that name; names not
/// mentioned by `items` keep their position and values.
pub fn merge_query(url: &mut Url, items: &[(String, String)]) -> Result<(), ApiError> {
    if items.is_empty() {
        return Ok(());
    }
    if url.cannot_be_a_base() {
        return Err(ApiError::invalid_request(format!(
            "url '{}' cannot carry a query",
            url
        )));
    }
    let mut merged = Policy::new();
    for (k, v) in url.query_pairs() {
        merged.query.push((k.into_owned(), v.into_owned()));
    }
    for (k, v) in items {
        merged.set_query(k.as_str(), v.as_str());
    }
    url.query_pairs_mut().clear().extend_pairs(merged.query.iter());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use http::header::{AUTHORIZATION, CONTENT_TYPE};

    fn q(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn merge_query_replaces_same_names() {
        let mut url = Url::parse("https://api.example.com/deal/markets?a=1&b=2").unwrap();
        merge_query(&mut url, &q(&[("b", "3"), ("c", "4")])).unwrap();
        assert_eq!(url.query(), Some("a=1&b=3&c=4"));
    }

    #[test]
    fn merge_query_collapses_repeated_names_and_is_stable() {
        let mut url = Url::parse("https://api.example.com/x?b=1&a=1&b=2").unwrap();
        merge_query(&mut url, &q(&[("b", "9")])).unwrap();
        assert_eq!(url.query(), Some("a=1&b=9"));

        merge_query(&mut url, &q(&[("b", "9")])).unwrap();
        assert_eq!(url.query(), Some("a=1&b=9"));

        merge_query(&mut url, &q(&[("c", "1"), ("c", "2")])).unwrap();
        assert_eq!(url.query(), Some("a=1&b=9&c=2"));
    }

    #[test]
    fn merge_query_encodes_values() {
        let mut url = Url::parse("https://api.example.com/x").unwrap();
        merge_query(&mut url, &q(&[("epics", "CS.D.EURUSD.TODAY.IP,IX.D.FTSE")])).unwrap();
        assert_eq!(
            url.query(),
            Some("epics=CS.D.EURUSD.TODAY.IP%2CIX.D.FTSE")
        );
    }

    #[test]
    fn merge_query_rejects_non_base_urls() {
        let mut url = Url::parse("mailto:someone@example.com").unwrap();
        let err = merge_query(&mut url, &q(&[("a", "1")])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidRequest);
    }

    #[test]
    fn caller_cannot_replace_credential_headers() {
        let mut p = Policy::new();
        p.insert_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
            .unwrap();
        p.set_layer(PolicyLayer::Credentials);
        p.insert_header(AUTHORIZATION, HeaderValue::from_static("Bearer x"))
            .unwrap();
        p.set_layer(PolicyLayer::Caller);

        // client-layer header: replaced
        p.insert_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .unwrap();
        assert_eq!(p.headers().get(CONTENT_TYPE).unwrap(), "application/json");

        // credential header: rejected, value untouched
        let err = p
            .insert_header(AUTHORIZATION, HeaderValue::from_static("Bearer y"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidRequest);
        assert_eq!(p.headers().get(AUTHORIZATION).unwrap(), "Bearer x");
        assert_eq!(p.credential_headers(), &[AUTHORIZATION]);
    }
}
