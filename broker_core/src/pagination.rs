use crate::error::{ApiError, ErrorDetail};
use crate::transport::BuiltRequest;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt::Debug;
use std::mem;
use std::sync::{Arc, Weak};

/// The last page that completed, handed to the next-request generator.
#[derive(Clone, Debug)]
pub struct PreviousPage<M> {
    pub request: BuiltRequest,
    pub metadata: M,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Caps {
    /// Upper bound on fetched pages; `None` means unbounded.
    pub max_pages: Option<u32>,
}

impl Caps {
    #[inline]
    pub fn max_pages(mut self, v: u32) -> Self {
        self.max_pages = Some(v);
        self
    }
}

enum Phase<M> {
    Requesting {
        previous: Option<PreviousPage<M>>,
    },
    Fetching {
        request: BuiltRequest,
        previous: Option<PreviousPage<M>>,
    },
    Finished,
}

struct Run<O, I, M, G, P> {
    owner: Weak<O>,
    initial: I,
    caps: Caps,
    generator: G,
    page_call: P,
    fetched: u32,
    phase: Phase<M>,
}

/// Drains a multi-page endpoint as one stream of page outputs.
///
/// `generator` is asked for the next request, seeing the previous page (if
/// any); `None` ends the run. `page_call` must yield exactly one
/// `(metadata, output)` pair per request. Pages are fetched one at a time
/// and each output is emitted before the next request is generated.
/// The run ends after the first error. Dropping the stream cancels the page
/// in flight and releases the generator, the page call and the owner handle.
pub fn paginate<O, I, M, W, G, P>(
    owner: Weak<O>,
    initial: I,
    caps: Caps,
    generator: G,
    page_call: P,
) -> BoxStream<'static, Result<W, ApiError>>
where
    O: Send + Sync + 'static,
    I: Send + 'static,
    M: Debug + Send + 'static,
    W: Debug + Send + 'static,
    G: FnMut(&Arc<O>, &I, Option<&PreviousPage<M>>) -> Result<Option<BuiltRequest>, ApiError>
        + Send
        + 'static,
    P: FnMut(BuiltRequest) -> BoxStream<'static, Result<(M, W), ApiError>> + Send + 'static,
{
    let run = Run {
        owner,
        initial,
        caps,
        generator,
        page_call,
        fetched: 0,
        phase: Phase::Requesting { previous: None },
    };

    stream::unfold(run, |mut run| async move {
        loop {
            match mem::replace(&mut run.phase, Phase::Finished) {
                Phase::Finished => return None,
                Phase::Requesting { previous } => match run.next_request(previous.as_ref()) {
                    Ok(Some(request)) => run.phase = Phase::Fetching { request, previous },
                    Ok(None) => {
                        tracing::debug!(
                            target: "broker_core::pagination",
                            pages = run.fetched,
                            "pagination completed"
                        );
                        return None;
                    }
                    Err(e) => return Some((Err(run.fail(e, previous.as_ref())), run)),
                },
                Phase::Fetching { request, previous } => {
                    match run.fetch(request.clone()).await {
                        Ok((metadata, output)) => {
                            run.fetched += 1;
                            tracing::debug!(
                                target: "broker_core::pagination",
                                page = run.fetched,
                                url = %request.url,
                                "page received"
                            );
                            run.phase = Phase::Requesting {
                                previous: Some(PreviousPage { request, metadata }),
                            };
                            return Some((Ok(output), run));
                        }
                        Err(e) => {
                            let e = e.with_request(|| request.snapshot());
                            return Some((Err(run.fail(e, previous.as_ref())), run));
                        }
                    }
                }
            }
        }
    })
    .boxed()
}

impl<O, I, M, W, G, P> Run<O, I, M, G, P>
where
    M: Debug,
    W: Debug,
    G: FnMut(&Arc<O>, &I, Option<&PreviousPage<M>>) -> Result<Option<BuiltRequest>, ApiError>,
    P: FnMut(BuiltRequest) -> BoxStream<'static, Result<(M, W), ApiError>>,
{
    fn next_request(
        &mut self,
        previous: Option<&PreviousPage<M>>,
    ) -> Result<Option<BuiltRequest>, ApiError> {
        let Some(owner) = self.owner.upgrade() else {
            return Err(ApiError::owner_released());
        };
        let next = (self.generator)(&owner, &self.initial, previous)?;
        drop(owner);

        let Some(mut request) = next else {
            return Ok(None);
        };
        if let Some(max) = self.caps.max_pages
            && self.fetched >= max
        {
            return Err(ApiError::call_failed("pagination limit reached")
                .annotate("max_pages", max)
                .with_request(|| request.snapshot()));
        }
        request.meta.page_index = self.fetched;
        Ok(Some(request))
    }

    async fn fetch(&mut self, request: BuiltRequest) -> Result<(M, W), ApiError> {
        let mut page = (self.page_call)(request);
        let first = match page.next().await {
            Some(Ok(v)) => v,
            Some(Err(e)) => return Err(e),
            None => return Err(ApiError::call_failed("page call returned empty")),
        };
        match page.next().await {
            None => Ok(first),
            Some(Err(e)) => Err(e),
            Some(Ok(second)) => Err(ApiError::call_failed("single page received two results")
                .with_detail(ErrorDetail::DuplicatePage {
                    first: format!("{:?}", first),
                    second: format!("{:?}", second),
                })),
        }
    }

    fn fail(&self, e: ApiError, previous: Option<&PreviousPage<M>>) -> ApiError {
        tracing::debug!(
            target: "broker_core::pagination",
            pages = self.fetched,
            kind = %e.kind(),
            "pagination failed"
        );
        let e = e.annotate("pages_received", self.fetched);
        match previous {
            Some(p) => e
                .annotate(
                    "previous_page.request",
                    format!("{} {}", p.request.method(), p.request.url),
                )
                .annotate("previous_page.metadata", format!("{:?}", p.metadata)),
            None => e,
        }
    }
}
