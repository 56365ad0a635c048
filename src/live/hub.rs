use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::{LiveSource, SUBSCRIPTION_BUFFER, Subscription};
use crate::error::Result;
use crate::model::{AggregationScope, CountedEvent};

/// In-process fan-out of counted events for every scope.
///
/// Subscribers receive all published events regardless of scope, just like
/// a shared socket channel would deliver them.
#[derive(Debug, Clone)]
pub struct Hub {
    tx: broadcast::Sender<CountedEvent>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event; returns how many subscribers saw it.
    pub fn publish(&self, event: CountedEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(SUBSCRIPTION_BUFFER)
    }
}

#[async_trait]
impl LiveSource for Hub {
    async fn attach(&self, scope: AggregationScope) -> Result<Subscription> {
        let mut rx = self.tx.subscribe();
        let (tx, events) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let pump = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%scope, skipped, "Live subscriber lagged, events lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(%scope, "Hub pump finished");
        });

        Ok(Subscription::new(scope, events, Some(pump)))
    }
}
