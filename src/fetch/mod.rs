//! Batch fetchers for the dashboard back end.
//!
//! [`HttpClient`] is the transport seam; [`Backend`] knows the endpoint
//! layout and implements [`HistoricalSource`] and [`DowntimeSource`].

mod basic;
mod client;

pub mod backend;
pub mod downtime;
pub mod historical;

pub use backend::Backend;
pub use basic::BasicClient;
pub use client::HttpClient;
pub use downtime::DowntimeSource;
pub use historical::HistoricalSource;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{DashboardError, Result};

/// GETs `url` and decodes a JSON body. Transport errors, non-success status
/// codes and undecodable bodies all become [`DashboardError::FetchFailure`].
pub async fn fetch_json<C, T>(client: &C, url: reqwest::Url, endpoint: &'static str) -> Result<T>
where
    C: HttpClient + ?Sized,
    T: DeserializeOwned,
{
    debug!(%url, endpoint, "GET");
    let req = reqwest::Request::new(reqwest::Method::GET, url);

    let resp = client
        .execute(req)
        .await
        .map_err(|e| DashboardError::fetch(endpoint, e))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(DashboardError::fetch(
            endpoint,
            format!("status {status}: {body}"),
        ));
    }

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| DashboardError::fetch(endpoint, e))?;
    serde_json::from_slice(&bytes).map_err(|e| DashboardError::fetch(endpoint, e))
}
