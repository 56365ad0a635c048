use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;
use crate::fetch::backend::COUNTS_PATH;
use crate::fetch::{Backend, HttpClient, fetch_json};
use crate::model::{CountedEvent, QueryParameters};
use crate::parser::{CountRecord, validate_counts};

/// Supplies the historical baseline for a set of query parameters.
#[async_trait]
pub trait HistoricalSource: Send + Sync {
    async fn fetch_counts(&self, params: QueryParameters) -> Result<Vec<CountedEvent>>;
}

#[async_trait]
impl<C: HttpClient> HistoricalSource for Backend<C> {
    /// Pages through the counts endpoint until a short page comes back.
    ///
    /// The approach filter is never sent: buckets always cover all four
    /// approaches and the filter is applied at display time.
    #[tracing::instrument(skip(self), fields(scope = %params.scope(), class = params.class.as_param()))]
    async fn fetch_counts(&self, params: QueryParameters) -> Result<Vec<CountedEvent>> {
        let scope = params.scope();
        let mut events = Vec::new();
        let mut offset = 0usize;
        let mut pages = 0usize;

        loop {
            let url = self.url(
                COUNTS_PATH,
                &[
                    ("date", scope.date_param()),
                    ("sensor", scope.sensor_id.to_string()),
                    ("approach", "All".to_string()),
                    ("class_", params.class.as_param().to_string()),
                    ("limit", self.page_size.to_string()),
                    ("offset", offset.to_string()),
                ],
            )?;

            let page: Vec<CountRecord> = fetch_json(&self.client, url, "counts").await?;
            pages += 1;
            let rows = page.len();
            debug!(offset, rows, "Counts page received");

            events.extend(validate_counts(&page, self.site));
            if rows < self.page_size {
                break;
            }
            offset += rows;
        }

        info!(events = events.len(), pages, "Historical fetch complete");
        Ok(events)
    }
}
