use crate::models::{
    Market, MarketDetails, PageData, PriceBar, PricePage, RawPricePage, Resolution,
};
use broker_core::prelude::*;
use chrono::NaiveDateTime;
use futures::future::try_join_all;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

/// Largest number of epics the markets endpoint accepts in one call.
pub const MARKETS_BATCH: usize = 50;

const JSON: &str = "application/json";
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub(crate) fn validate_epic(epic: &str) -> Result<(), ApiError> {
    if epic.is_empty() {
        return Err(ApiError::invalid_request("epic is empty"));
    }
    // epics are dotted identifiers; anything else would be read as URL syntax
    if let Some(c) = epic
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(ApiError::invalid_request(format!(
            "epic {epic:?} contains the reserved character {c:?}"
        ))
        .annotate("epic", epic));
    }
    Ok(())
}

/// Price history window.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PriceQuery {
    pub resolution: Resolution,
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
    pub page_size: u32,
}

impl PriceQuery {
    pub fn new(resolution: Resolution, from: NaiveDateTime, to: NaiveDateTime) -> Self {
        Self {
            resolution,
            from,
            to,
            page_size: 20,
        }
    }

    #[inline]
    pub fn page_size(mut self, n: u32) -> Self {
        self.page_size = n;
        self
    }

    fn items(&self, page: u32) -> Vec<(String, String)> {
        vec![
            ("resolution".into(), self.resolution.as_str().into()),
            ("from".into(), self.from.format(DATE_FORMAT).to_string()),
            ("to".into(), self.to.format(DATE_FORMAT).to_string()),
            ("pageSize".into(), self.page_size.to_string()),
            ("pageNumber".into(), page.to_string()),
        ]
    }
}

/// Market data endpoints.
pub struct Markets<'a> {
    api: &'a ApiClient,
}

impl<'a> Markets<'a> {
    pub(crate) fn new(api: &'a ApiClient) -> Self {
        Self { api }
    }

    /// Details and snapshots for `epics`, in input order.
    ///
    /// Epics are sent in batches of [`MARKETS_BATCH`]; batches run
    /// concurrently up to the client's in-flight limit and the first failing
    /// batch fails the whole call.
    pub async fn markets<S: AsRef<str>>(&self, epics: &[S]) -> Result<Vec<Market>, ApiError> {
        let epics: Vec<String> = epics.iter().map(|e| e.as_ref().to_owned()).collect();
        for epic in &epics {
            validate_epic(epic)?;
        }
        if epics.is_empty() {
            return Ok(Vec::new());
        }
        let timezone = self.api.credentials().current().map(|c| c.timezone);

        let batches = epics.chunks(MARKETS_BATCH).map(|batch| {
            let template = RequestTemplate::<Vec<String>>::get("markets")
                .version(2)
                .query(|epics: &Vec<String>| {
                    Ok::<_, FxError>(vec![("epics".to_owned(), epics.join(","))])
                });
            let call = self
                .api
                .call(template, batch.to_vec())
                .expect_status([200])
                .expect_content_type(JSON);
            async move {
                let exchange = call.await?;
                exchange
                    .contextual_json::<MarketDetails>(timezone)
                    .map(|d| d.0)
            }
        });
        tracing::debug!(epics = epics.len(), "fetching market details");
        let pages = try_join_all(batches).await?;
        Ok(pages.into_iter().flatten().collect())
    }

    /// Price history of `epic`, one item per page, in page order.
    pub fn prices(
        &self,
        epic: &str,
        query: PriceQuery,
    ) -> BoxStream<'static, Result<PricePage, ApiError>> {
        if let Err(e) = validate_epic(epic) {
            return stream::once(async move { Err(e) }).boxed();
        }
        let template = RequestTemplate::<u32>::get(format!("prices/{epic}"))
            .version(3)
            .query(move |page: &u32| Ok::<_, FxError>(query.items(*page)));

        self.api.paginate(
            template,
            |client: &ApiClient,
             template: &RequestTemplate<u32>,
             previous: Option<&PreviousPage<PageData>>| {
                let page = match previous {
                    None => 1,
                    Some(p) => match p.metadata.next_page() {
                        Some(n) => n,
                        None => return Ok(None),
                    },
                };
                client.prepare(template, &page, Some(JSON)).map(Some)
            },
            |client: WeakClient, request: BuiltRequest| async move {
                let exchange = client.exchange(request, &Expectations::json_ok()).await?;
                let page: RawPricePage = exchange.json()?;
                let data = page.metadata.page_data;
                let out = PricePage {
                    number: data.page_number,
                    total: data.total_pages,
                    instrument_type: page.instrument_type,
                    bars: page.prices,
                };
                Ok::<_, ApiError>((data, out))
            },
        )
    }

    /// [`Markets::prices`] drained into one series.
    pub async fn all_prices(
        &self,
        epic: &str,
        query: PriceQuery,
    ) -> Result<Vec<PriceBar>, ApiError> {
        self.prices(epic, query)
            .try_fold(Vec::new(), |mut acc, page| async move {
                acc.extend(page.bars);
                Ok(acc)
            })
            .await
    }
}
