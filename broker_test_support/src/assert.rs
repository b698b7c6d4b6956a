use crate::mock::RecordedRequest;
use broker_core::credentials::{ACCOUNT_ID, CST, X_SECURITY_TOKEN};
use broker_core::request::VERSION;
use http::Method;
use http::header::AUTHORIZATION;
use std::fmt::Display;
use std::time::Duration;

/// Fluent checks over one recorded request. Every failure names the
/// offending request so a log of many calls stays readable.
pub struct RequestAssert<'a> {
    req: &'a RecordedRequest,
}

pub fn assert_request(req: &RecordedRequest) -> RequestAssert<'_> {
    RequestAssert { req }
}

impl RequestAssert<'_> {
    #[track_caller]
    fn fail(&self, what: &str, detail: impl Display) -> ! {
        panic!(
            "{what}\n{detail}\n  request: {} {}",
            self.req.meta.method, self.req.url
        )
    }

    #[track_caller]
    fn same<T: PartialEq + std::fmt::Debug>(self, what: &str, expected: T, got: T) -> Self {
        if expected != got {
            self.fail(what, format_args!("  expected: {expected:?}\n  got: {got:?}"));
        }
        self
    }

    #[track_caller]
    pub fn method(self, expected: Method) -> Self {
        let got = self.req.meta.method.clone();
        self.same("method mismatch", expected, got)
    }

    #[track_caller]
    pub fn path(self, expected: &str) -> Self {
        let req = self.req;
        self.same("path mismatch", expected, req.url.path())
    }

    #[track_caller]
    pub fn page_index(self, expected: u32) -> Self {
        let got = self.req.meta.page_index;
        self.same("page index mismatch", expected, got)
    }

    #[track_caller]
    pub fn timeout(self, expected: Option<Duration>) -> Self {
        let got = self.req.timeout;
        self.same("timeout mismatch", expected, got)
    }

    /// Checks both the `VERSION` header and the recorded request version.
    #[track_caller]
    pub fn version(self, expected: u32) -> Self {
        let got = self.req.meta.version;
        self.same("request version mismatch", expected, got)
            .header(VERSION, &expected.to_string())
    }

    #[track_caller]
    pub fn header(self, name: impl AsRef<str>, expected: &str) -> Self {
        let name = name.as_ref();
        let req = self.req;
        match req.headers.get(name).map(|v| v.to_str()) {
            Some(Ok(v)) if v == expected => self,
            Some(Ok(v)) => self.fail(
                "header mismatch",
                format_args!("  header: {name}\n  expected: {expected}\n  got: {v}"),
            ),
            Some(Err(_)) => self.fail("header is not text", format_args!("  header: {name}")),
            None => self.fail(
                "missing header",
                format_args!("  header: {name}\n  expected: {expected}"),
            ),
        }
    }

    #[track_caller]
    pub fn header_absent(self, name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        let req = self.req;
        if let Some(v) = req.headers.get(name) {
            self.fail(
                "header should be absent",
                format_args!("  header: {name}\n  got: {v:?}"),
            );
        }
        self
    }

    /// Certificate session tokens, and no bearer header next to them.
    #[track_caller]
    pub fn session_headers(self, cst: &str, security: &str) -> Self {
        self.header(CST, cst)
            .header(X_SECURITY_TOKEN, security)
            .header_absent(AUTHORIZATION)
    }

    /// No credential header of either session kind was sent.
    #[track_caller]
    pub fn unauthenticated(self) -> Self {
        self.header_absent(CST)
            .header_absent(X_SECURITY_TOKEN)
            .header_absent(AUTHORIZATION)
            .header_absent(ACCOUNT_ID)
    }

    #[track_caller]
    pub fn query_absent(self, key: &str) -> Self {
        if self.req.url.query_pairs().any(|(k, _)| k == key) {
            self.fail(
                "query key should be absent",
                format_args!("  key: {key}\n  query: {}", self.query()),
            );
        }
        self
    }

    /// Every value of `key`, in order. Catches duplicated query names.
    #[track_caller]
    pub fn query_values(self, key: &str, expected: &[&str]) -> Self {
        let got: Vec<String> = self
            .req
            .url
            .query_pairs()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .collect();
        if got != expected {
            self.fail(
                "query values mismatch",
                format_args!(
                    "  key: {key}\n  expected: {expected:?}\n  got: {got:?}\n  query: {}",
                    self.query()
                ),
            );
        }
        self
    }

    #[track_caller]
    pub fn body_absent(self) -> Self {
        if let Some(body) = &self.req.body {
            self.fail(
                "body should be absent",
                format_args!("  got: {} bytes", body.len()),
            );
        }
        self
    }

    /// Body parsed as JSON equals `expected`.
    #[track_caller]
    pub fn body_json(self, expected: serde_json::Value) -> Self {
        let req = self.req;
        let Some(body) = req.body.as_ref() else {
            self.fail("missing JSON body", format_args!("  expected: {expected}"));
        };
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(got) if got == expected => self,
            Ok(got) => self.fail(
                "body mismatch",
                format_args!("  expected: {expected}\n  got: {got}"),
            ),
            Err(e) => self.fail(
                "body is not JSON",
                format_args!("  error: {e}\n  body: {}", String::from_utf8_lossy(body)),
            ),
        }
    }

    fn query(&self) -> &str {
        self.req.url.query().unwrap_or("")
    }
}
