//! Live event subscriptions.
//!
//! A [`LiveSource`] attaches to a push channel for one scope and hands back a
//! [`Subscription`]. Dropping the subscription detaches it. Sources are free
//! to deliver events for other scopes; the aggregation side rejects them.

pub mod hub;
pub mod socketio;
pub mod stream;

pub use hub::Hub;
pub use socketio::{SocketIoClient, SocketIoSource};
pub use stream::StreamSource;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::model::{AggregationScope, CountedEvent};

/// Capacity of the per-subscription event queue.
pub const SUBSCRIPTION_BUFFER: usize = 1024;

#[async_trait]
pub trait LiveSource: Send + Sync {
    async fn attach(&self, scope: AggregationScope) -> Result<Subscription>;
}

/// An attached live channel. Events arrive in channel order.
#[derive(Debug)]
pub struct Subscription {
    scope: AggregationScope,
    events: mpsc::Receiver<CountedEvent>,
    pump: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wraps a receiver fed by `pump`; the pump is aborted on drop.
    pub fn new(
        scope: AggregationScope,
        events: mpsc::Receiver<CountedEvent>,
        pump: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            scope,
            events,
            pump,
        }
    }

    pub fn scope(&self) -> AggregationScope {
        self.scope
    }

    /// Next event, or `None` once the channel has closed.
    pub async fn recv(&mut self) -> Option<CountedEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
