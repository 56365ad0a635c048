use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::fetch::backend::GAPS_PATH;
use crate::fetch::{Backend, HttpClient, fetch_json};
use crate::model::{AggregationScope, DowntimeInterval};
use crate::parser::{GapRecord, validate_gaps};

/// Supplies sensor outage intervals for a scope.
#[async_trait]
pub trait DowntimeSource: Send + Sync {
    async fn fetch_downtime(&self, scope: AggregationScope) -> Result<Vec<DowntimeInterval>>;
}

#[async_trait]
impl<C: HttpClient> DowntimeSource for Backend<C> {
    #[tracing::instrument(skip(self), fields(scope = %scope))]
    async fn fetch_downtime(&self, scope: AggregationScope) -> Result<Vec<DowntimeInterval>> {
        let url = self.url(
            GAPS_PATH,
            &[
                ("date", scope.date_param()),
                ("sensor", scope.sensor_id.to_string()),
            ],
        )?;
        let rows: Vec<GapRecord> = fetch_json(&self.client, url, "data_gaps").await?;
        let intervals = validate_gaps(&rows, scope.sensor_id, self.site);
        info!(intervals = intervals.len(), "Downtime fetch complete");
        Ok(intervals)
    }
}
