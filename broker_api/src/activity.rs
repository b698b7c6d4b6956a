use crate::models::{Activity, RawActivityPage};
use broker_core::prelude::*;
use chrono::NaiveDateTime;
use futures::stream::{BoxStream, TryStreamExt};

const JSON: &str = "application/json";
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const PAGE_SIZE: u32 = 50;

#[derive(Clone, Debug)]
struct Window {
    from: NaiveDateTime,
    to: Option<NaiveDateTime>,
}

/// Account history endpoints.
pub struct History<'a> {
    api: &'a ApiClient,
}

impl<'a> History<'a> {
    pub(crate) fn new(api: &'a ApiClient) -> Self {
        Self { api }
    }

    /// Account activity since `from` (until `to`, or now), one item per page.
    ///
    /// The first page is requested by date range; every later page follows
    /// the `metadata.paging.next` link of the page before it.
    pub fn activity(
        &self,
        from: NaiveDateTime,
        to: Option<NaiveDateTime>,
    ) -> BoxStream<'static, Result<Vec<Activity>, ApiError>> {
        let first = RequestTemplate::<Window>::get("history/activity")
            .version(3)
            .query(|w: &Window| {
                let mut items = vec![("from".to_owned(), w.from.format(DATE_FORMAT).to_string())];
                if let Some(to) = w.to {
                    items.push(("to".to_owned(), to.format(DATE_FORMAT).to_string()));
                }
                items.push(("pageSize".to_owned(), PAGE_SIZE.to_string()));
                Ok::<_, FxError>(items)
            });

        self.api.paginate(
            (first, Window { from, to }),
            |client: &ApiClient,
             (first, window): &(RequestTemplate<Window>, Window),
             previous: Option<&PreviousPage<Option<String>>>| {
                match previous {
                    None => client.prepare(first, window, Some(JSON)).map(Some),
                    Some(PreviousPage {
                        metadata: Some(next),
                        ..
                    }) => {
                        let template = RequestTemplate::<()>::get(next.clone()).version(3);
                        client.prepare(&template, &(), Some(JSON)).map(Some)
                    }
                    Some(_) => Ok(None),
                }
            },
            |client: WeakClient, request: BuiltRequest| async move {
                let exchange = client.exchange(request, &Expectations::json_ok()).await?;
                let page: RawActivityPage = exchange.json()?;
                let next = page.metadata.paging.next.filter(|n| !n.is_empty());
                Ok::<_, ApiError>((next, page.activities))
            },
        )
    }

    /// [`History::activity`] drained into one list.
    pub async fn all_activity(
        &self,
        from: NaiveDateTime,
        to: Option<NaiveDateTime>,
    ) -> Result<Vec<Activity>, ApiError> {
        self.activity(from, to)
            .try_fold(Vec::new(), |mut acc, page| async move {
                acc.extend(page);
                Ok(acc)
            })
            .await
    }
}
