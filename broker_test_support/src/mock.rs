use broker_core::transport::*;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName};
use http::{HeaderMap, HeaderValue, StatusCode};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub meta: RequestMeta,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct MockReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Sleep before answering.
    pub delay: Option<Duration>,
    /// Fail at the transport level with this message instead of answering.
    pub failure: Option<String>,
    /// Report this as the final response URL instead of the request URL.
    pub final_url: Option<Url>,
}

impl MockReply {
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            delay: None,
            failure: None,
            final_url: None,
        }
    }

    pub fn ok_json(body: Bytes) -> Self {
        Self::status(StatusCode::OK)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body)
    }

    pub fn ok_text(body: Bytes) -> Self {
        Self::status(StatusCode::OK)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
            .with_body(body)
    }

    pub fn json(status: StatusCode, body: Bytes) -> Self {
        Self::ok_json(body).with_status(status)
    }

    pub fn transport_failure(msg: impl Into<String>) -> Self {
        let mut r = Self::status(StatusCode::OK);
        r.failure = Some(msg.into());
        r
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    pub fn final_url(mut self, url: Url) -> Self {
        self.final_url = Some(url);
        self
    }
}

/// Ordered log of events shared between the mock and the test body, used
/// to assert interleavings such as "page 1 emitted before page 2 requested".
#[derive(Clone, Debug, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Position of the first entry equal to `event`.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == event)
    }
}

struct OneShotBody {
    chunk: Option<Bytes>,
}

impl TransportBody for OneShotBody {
    fn next_chunk<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>, TransportError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.chunk.take().filter(|c| !c.is_empty())) })
    }
}

#[derive(Debug)]
struct MockState {
    recorded: Mutex<Vec<RecordedRequest>>,
    replies: Mutex<VecDeque<MockReply>>,
    journal: Journal,
}

#[derive(Clone)]
pub struct MockTransport {
    st: Arc<MockState>,
}

pub struct MockHandle {
    st: Arc<MockState>,
    finished: bool,
}

#[derive(Default)]
pub struct MockBuilder {
    replies: Vec<MockReply>,
    journal: Journal,
}

impl MockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, r: MockReply) -> Self {
        self.replies.push(r);
        self
    }

    pub fn replies(mut self, rs: impl IntoIterator<Item = MockReply>) -> Self {
        self.replies.extend(rs);
        self
    }

    /// Records `send <METHOD> <path?query>` into `journal` for every call.
    pub fn journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn build(self) -> (MockTransport, MockHandle) {
        let st = Arc::new(MockState {
            recorded: Mutex::new(Vec::new()),
            replies: Mutex::new(self.replies.into_iter().collect()),
            journal: self.journal,
        });
        (
            MockTransport { st: st.clone() },
            MockHandle {
                st,
                finished: false,
            },
        )
    }
}

pub fn mock() -> MockBuilder {
    MockBuilder::new()
}

impl MockHandle {
    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.st.recorded.lock().unwrap().clone()
    }

    pub fn recorded_len(&self) -> usize {
        self.st.recorded.lock().unwrap().len()
    }

    pub fn assert_recorded_len(&self, expected: usize) {
        let got = self.recorded_len();
        if got != expected {
            let reqs = self.recorded();
            panic!(
                "recorded request count mismatch\n  expected: {expected}\n  got: {got}\n  recorded:\n{:#?}",
                reqs
            );
        }
    }

    pub fn journal(&self) -> Journal {
        self.st.journal.clone()
    }

    pub fn remaining_replies(&self) -> usize {
        self.st.replies.lock().unwrap().len()
    }

    pub fn assert_no_remaining_replies(&self) {
        let left = self.remaining_replies();
        if left != 0 {
            panic!("mock replies not fully consumed: remaining={left}");
        }
    }

    pub fn finish(mut self) {
        self.assert_no_remaining_replies();
        self.finished = true;
    }

    /// Drops the handle without checking that every reply was consumed.
    pub fn abandon(mut self) {
        self.finished = true;
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if std::thread::panicking() {
            return;
        }
        let left = self.st.replies.lock().unwrap().len();
        if left != 0 {
            panic!("mock replies not fully consumed (drop): remaining={left}");
        }
    }
}

fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

impl Transport for MockTransport {
    fn send<'a>(
        &'a self,
        req: &'a BuiltRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.st.recorded.lock().unwrap().push(RecordedRequest {
                meta: req.meta.clone(),
                url: req.url.clone(),
                headers: req.headers.clone(),
                body: req.body.clone(),
                timeout: req.timeout,
            });
            self.st
                .journal
                .push(format!("send {} {}", req.meta.method, path_and_query(&req.url)));

            let reply = {
                let mut g = self.st.replies.lock().unwrap();
                g.pop_front().unwrap_or_else(|| {
                    let last = self.st.recorded.lock().unwrap().last().cloned();
                    panic!(
                        "MockTransport: no more scripted replies, but send() was called.\nlast_request={:#?}",
                        last
                    );
                })
            };

            if let Some(d) = reply.delay {
                tokio::time::sleep(d).await;
            }
            if let Some(msg) = reply.failure {
                return Err(TransportError::msg(msg));
            }

            Ok(TransportResponse {
                url: reply.final_url.unwrap_or_else(|| req.url.clone()),
                status: reply.status,
                headers: reply.headers,
                content_length: Some(reply.body.len() as u64),
                body: Box::new(OneShotBody {
                    chunk: Some(reply.body),
                }),
            })
        })
    }
}
