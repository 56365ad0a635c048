use crate::config::{DashboardConfig, SiteZone};
use crate::error::{DashboardError, Result};
use crate::fetch::HttpClient;

pub const COUNTS_PATH: &str = "/api/counts";
pub const GAPS_PATH: &str = "/api/data_gaps";
pub const STREAM_PATH: &str = "/api/counts/stream";

/// Endpoint layout of the dashboard back end over some [`HttpClient`].
pub struct Backend<C> {
    pub(crate) client: C,
    base: reqwest::Url,
    pub(crate) site: SiteZone,
    pub(crate) page_size: usize,
}

impl<C: HttpClient> Backend<C> {
    pub fn new(client: C, config: &DashboardConfig) -> Result<Self> {
        let base = reqwest::Url::parse(&config.backend_url).map_err(|e| {
            DashboardError::InvalidConfig {
                details: format!("backend url {:?}: {e}", config.backend_url),
            }
        })?;
        Ok(Self {
            client,
            base,
            site: config.site_zone,
            page_size: config.page_size,
        })
    }

    /// Joins `path` onto the base URL and appends the query pairs.
    pub fn url(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Url> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| DashboardError::fetch("url", e))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::fetch::HttpClient;

    /// Serves canned bodies keyed by `path?query` and records every request.
    #[derive(Default)]
    pub struct CannedClient {
        routes: HashMap<String, (u16, String)>,
        pub seen: Mutex<Vec<String>>,
    }

    impl CannedClient {
        pub fn route(mut self, path_and_query: &str, status: u16, body: &str) -> Self {
            self.routes
                .insert(path_and_query.to_string(), (status, body.to_string()));
            self
        }
    }

    #[async_trait]
    impl HttpClient for CannedClient {
        async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            let url = req.url();
            let key = match url.query() {
                Some(q) => format!("{}?{}", url.path(), q),
                None => url.path().to_string(),
            };
            self.seen.lock().unwrap().push(key.clone());
            let (status, body) = self
                .routes
                .get(&key)
                .cloned()
                .unwrap_or_else(|| (404, format!("no route for {key}")));
            let resp = http::Response::builder()
                .status(status)
                .body(body)
                .unwrap();
            Ok(reqwest::Response::from(resp))
        }
    }
}
