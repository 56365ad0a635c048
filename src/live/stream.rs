use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{LiveSource, SUBSCRIPTION_BUFFER, Subscription};
use crate::config::SiteZone;
use crate::error::{DashboardError, Result};
use crate::fetch::backend::STREAM_PATH;
use crate::fetch::{Backend, HttpClient};
use crate::model::{AggregationScope, CountedEvent};
use crate::parser::parse_live_line;

/// Newline-delimited JSON stream of counted events served by the back end.
pub struct StreamSource<C> {
    backend: Arc<Backend<C>>,
}

impl<C> StreamSource<C> {
    pub fn new(backend: Arc<Backend<C>>) -> Self {
        Self { backend }
    }
}

/// Splits complete lines off the front of `buf`, leaving any partial line.
pub(crate) fn take_lines(buf: &mut BytesMut) -> Vec<Bytes> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
        let mut line = buf.split_to(pos + 1);
        line.truncate(pos);
        if line.last() == Some(&b'\r') {
            line.truncate(pos - 1);
        }
        if !line.iter().all(u8::is_ascii_whitespace) {
            lines.push(line.freeze());
        }
    }
    lines
}

async fn forward_line(
    line: &[u8],
    site: SiteZone,
    tx: &mpsc::Sender<CountedEvent>,
) -> bool {
    match parse_live_line(line, site) {
        Ok(event) => tx.send(event).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Dropping malformed live event");
            true
        }
    }
}

#[async_trait]
impl<C: HttpClient + 'static> LiveSource for StreamSource<C> {
    #[tracing::instrument(skip(self), fields(scope = %scope))]
    async fn attach(&self, scope: AggregationScope) -> Result<Subscription> {
        let url = self.backend.url(
            STREAM_PATH,
            &[
                ("date", scope.date_param()),
                ("sensor", scope.sensor_id.to_string()),
            ],
        )?;
        let req = reqwest::Request::new(reqwest::Method::GET, url);
        let resp = self
            .backend
            .client
            .execute(req)
            .await
            .map_err(|e| DashboardError::Subscription {
                details: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(DashboardError::Subscription {
                details: format!("status {}", resp.status()),
            });
        }
        info!("Live stream attached");

        let site = self.backend.site;
        let (tx, events) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let pump = tokio::spawn(async move {
            let mut body = resp.bytes_stream();
            let mut buf = BytesMut::new();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(%scope, error = %e, "Live stream read failed");
                        return;
                    }
                };
                buf.extend_from_slice(&chunk);
                for line in take_lines(&mut buf) {
                    if !forward_line(&line, site, &tx).await {
                        return;
                    }
                }
            }
            if buf.has_remaining() {
                let tail = buf.split().freeze();
                if !tail.iter().all(u8::is_ascii_whitespace) {
                    forward_line(&tail, site, &tx).await;
                }
            }
            debug!(%scope, "Live stream ended");
        });

        Ok(Subscription::new(scope, events, Some(pump)))
    }
}
