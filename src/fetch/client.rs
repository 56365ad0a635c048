use async_trait::async_trait;
use reqwest::{Request, Response};

/// Transport seam for every backend request. Tests substitute canned
/// responses here.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
