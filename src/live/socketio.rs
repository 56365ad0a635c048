//! Socket.IO feed of the counts back end.
//!
//! The server broadcasts every counted event as a `counts_update` message to
//! all connected clients, whatever their scope. Scope filtering happens on
//! the aggregation side.

use async_trait::async_trait;
use futures::FutureExt;
use rust_socketio::asynchronous::{Client, ClientBuilder};
use rust_socketio::{Payload, TransportType};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{LiveSource, SUBSCRIPTION_BUFFER, Subscription};
use crate::config::{DashboardConfig, SiteZone};
use crate::error::{DashboardError, Result};
use crate::model::{AggregationScope, CountedEvent};
use crate::parser::{CountRecord, parse_live_line};

pub const COUNTS_EVENT: &str = "counts_update";

/// Opens a Socket.IO connection and forwards raw `counts_update` payloads.
///
/// The connection stays up until `payloads` is closed by its receiver.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, url: &str, payloads: mpsc::Sender<Payload>) -> Result<()>;
}

/// [`SocketConnector`] over `rust_socketio`, websocket transport only.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketIoClient;

fn subscription_error(e: impl ToString) -> DashboardError {
    DashboardError::Subscription {
        details: e.to_string(),
    }
}

#[async_trait]
impl SocketConnector for SocketIoClient {
    async fn connect(&self, url: &str, payloads: mpsc::Sender<Payload>) -> Result<()> {
        let forward = payloads.clone();
        let client = ClientBuilder::new(url)
            .transport_type(TransportType::Websocket)
            .on(COUNTS_EVENT, move |payload: Payload, _socket: Client| {
                let tx = forward.clone();
                async move {
                    let _ = tx.send(payload).await;
                }
                .boxed()
            })
            .on("error", |payload: Payload, _socket: Client| {
                async move {
                    warn!(?payload, "Socket.IO error");
                }
                .boxed()
            })
            .connect()
            .await
            .map_err(subscription_error)?;

        tokio::spawn(async move {
            payloads.closed().await;
            if let Err(e) = client.disconnect().await {
                warn!(error = %e, "Socket.IO disconnect failed");
            }
        });
        Ok(())
    }
}

/// Decodes every counted event carried by one payload.
///
/// Malformed entries are logged and skipped.
pub fn events_from_payload(payload: &Payload, site: SiteZone) -> Vec<CountedEvent> {
    match payload {
        Payload::Text(values) => {
            let mut events = Vec::new();
            for value in values {
                collect_value(value, site, &mut events);
            }
            events
        }
        Payload::Binary(bytes) => match parse_live_line(bytes, site) {
            Ok(event) => vec![event],
            Err(e) => {
                warn!(error = %e, "Dropping malformed live event");
                Vec::new()
            }
        },
        other => {
            warn!(payload = ?other, "Ignoring unsupported Socket.IO payload");
            Vec::new()
        }
    }
}

fn collect_value(value: &Value, site: SiteZone, events: &mut Vec<CountedEvent>) {
    if let Value::Array(items) = value {
        for item in items {
            collect_value(item, site, events);
        }
        return;
    }
    let event = serde_json::from_value::<CountRecord>(value.clone())
        .map_err(|e| DashboardError::malformed("record", e.to_string()))
        .and_then(|record| record.validate(site));
    match event {
        Ok(event) => events.push(event),
        Err(e) => warn!(error = %e, "Dropping malformed live event"),
    }
}

/// Live source bound to the back end's Socket.IO endpoint.
pub struct SocketIoSource<S> {
    connector: S,
    url: String,
    site: SiteZone,
}

impl<S: SocketConnector> SocketIoSource<S> {
    pub fn new(connector: S, config: &DashboardConfig) -> Result<Self> {
        let url = reqwest::Url::parse(&config.backend_url)
            .and_then(|base| base.join(&config.socketio_path))
            .map_err(|e| DashboardError::InvalidConfig {
                details: format!("socket.io url {:?}: {e}", config.socketio_path),
            })?;
        Ok(Self {
            connector,
            url: url.to_string(),
            site: config.site_zone,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl<S: SocketConnector + 'static> LiveSource for SocketIoSource<S> {
    #[tracing::instrument(skip(self), fields(scope = %scope, url = %self.url))]
    async fn attach(&self, scope: AggregationScope) -> Result<Subscription> {
        let (raw_tx, mut raw_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.connector.connect(&self.url, raw_tx).await?;
        info!("Socket.IO feed attached");

        let site = self.site;
        let (tx, events) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let pump = tokio::spawn(async move {
            while let Some(payload) = raw_rx.recv().await {
                for event in events_from_payload(&payload, site) {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            debug!(%scope, "Socket.IO feed ended");
        });

        Ok(Subscription::new(scope, events, Some(pump)))
    }
}
