//! Event loop that ties fetchers, the live subscription and the scope state
//! machine together.
//!
//! Everything runs on one task. Fetches are spawned and report back over a
//! channel tagged with the generation they were started under; the loop
//! never blocks on them.

use anyhow::Result;
use chrono::NaiveDate;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::aggregate::Series;
use crate::config::DashboardConfig;
use crate::error::DashboardError;
use crate::fetch::{DowntimeSource, HistoricalSource};
use crate::live::{LiveSource, Subscription};
use crate::model::{
    AggregationScope, ApproachFilter, ClassFilter, CountedEvent, DowntimeInterval, QueryParameters,
};
use crate::overlay::OverlayRegion;
use crate::scope::{Generation, Phase, ScopeDriver, Transition};

/// Everything a presentation surface needs to draw one frame.
#[derive(Debug)]
pub struct Frame<'a> {
    pub params: QueryParameters,
    pub phase: Phase,
    pub generation: Generation,
    pub series: Series<'a>,
    pub downtime: &'a [DowntimeInterval],
    pub overlay: Vec<OverlayRegion>,
    pub degraded: bool,
}

impl<'a> Frame<'a> {
    /// `None` while no parameters are bound.
    pub fn capture(driver: &'a ScopeDriver) -> Option<Self> {
        let params = driver.params()?;
        Some(Self {
            params,
            phase: driver.phase(),
            generation: driver.generation(),
            series: driver.series(),
            downtime: driver.downtime(),
            overlay: driver.overlay(),
            degraded: driver.degraded(),
        })
    }
}

/// Consumer of rendered frames (chart, table, log, ...).
pub trait Surface {
    fn render(&mut self, frame: &Frame<'_>) -> Result<()>;
}

/// One operator edit to the query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamChange {
    Date(NaiveDate),
    Sensor(i64),
    Approach(ApproachFilter),
    Class(ClassFilter),
}

impl ParamChange {
    pub fn apply(self, params: QueryParameters) -> QueryParameters {
        match self {
            ParamChange::Date(d) => params.with_date(d),
            ParamChange::Sensor(s) => params.with_sensor(s),
            ParamChange::Approach(a) => params.with_approach(a),
            ParamChange::Class(c) => params.with_class(c),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Set(QueryParameters),
    Change(ParamChange),
    Refresh,
    Quit,
}

impl FromStr for Command {
    type Err = DashboardError;

    /// Parses operator input such as `sensor 2`, `date 2024-01-02`,
    /// `approach NB`, `class All`, `refresh` or `quit`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        let arg = parts.next().unwrap_or_default();
        let bad = |details: String| DashboardError::InvalidConfig { details };

        let change = match verb {
            "refresh" => return Ok(Command::Refresh),
            "quit" | "exit" => return Ok(Command::Quit),
            "date" => ParamChange::Date(
                NaiveDate::parse_from_str(arg, "%Y-%m-%d")
                    .map_err(|e| bad(format!("date {arg:?}: {e}")))?,
            ),
            "sensor" => ParamChange::Sensor(
                arg.parse()
                    .map_err(|e| bad(format!("sensor {arg:?}: {e}")))?,
            ),
            "approach" => ParamChange::Approach(arg.parse()?),
            "class" => ParamChange::Class(arg.parse()?),
            other => return Err(bad(format!("unknown command {other:?}"))),
        };
        Ok(Command::Change(change))
    }
}

enum FetchMessage {
    Baseline(
        Generation,
        std::result::Result<Vec<CountedEvent>, DashboardError>,
    ),
    Downtime(
        Generation,
        std::result::Result<Vec<DowntimeInterval>, DashboardError>,
    ),
}

/// Owns the state machine plus the resources bound to the current scope.
pub struct Dashboard<S, L> {
    source: Arc<S>,
    live: Arc<L>,
    driver: ScopeDriver,
    poll_interval: Option<Duration>,
    subscription: Option<Subscription>,
    inflight: Vec<JoinHandle<()>>,
    results_tx: mpsc::Sender<FetchMessage>,
    results_rx: mpsc::Receiver<FetchMessage>,
}

impl<S, L> Dashboard<S, L>
where
    S: HistoricalSource + DowntimeSource + 'static,
    L: LiveSource + 'static,
{
    pub fn new(source: Arc<S>, live: Arc<L>, config: &DashboardConfig) -> Self {
        let (results_tx, results_rx) = mpsc::channel(16);
        Self {
            source,
            live,
            driver: ScopeDriver::new(config.overlap_window),
            poll_interval: config.poll_interval,
            subscription: None,
            inflight: Vec::new(),
            results_tx,
            results_rx,
        }
    }

    pub fn driver(&self) -> &ScopeDriver {
        &self.driver
    }

    /// Runs until `commands` closes or a `Quit` arrives.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        surface: &mut dyn Surface,
    ) -> Result<ScopeDriver> {
        let mut ticker = self.poll_interval.map(|period| {
            let mut t = tokio::time::interval_at(Instant::now() + period, period);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            t
        });

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command, surface).await? {
                        break;
                    }
                }
                Some(message) = self.results_rx.recv() => {
                    if self.handle_fetch(message) {
                        self.render(surface)?;
                    }
                }
                event = next_live(&mut self.subscription) => match event {
                    Some(event) => {
                        if self.driver.on_live_event(event).changed_state() {
                            self.render(surface)?;
                        }
                    }
                    None => {
                        let scope = self.subscription.take().map(|s| s.scope().to_string());
                        warn!(?scope, "Live subscription closed; waiting for next refresh");
                    }
                },
                _ = next_tick(&mut ticker) => {
                    self.refresh().await;
                    self.render(surface)?;
                }
            }
        }

        self.cancel_inflight();
        self.subscription = None;
        info!("Dashboard loop stopped");
        Ok(self.driver)
    }

    /// Returns `false` when the loop should stop.
    async fn handle_command(&mut self, command: Command, surface: &mut dyn Surface) -> Result<bool> {
        let next = match command {
            Command::Quit => return Ok(false),
            Command::Refresh => {
                self.refresh().await;
                self.render(surface)?;
                return Ok(true);
            }
            Command::Set(params) => params,
            Command::Change(change) => match self.driver.params() {
                Some(current) => change.apply(current),
                None => {
                    warn!(?change, "Ignoring change before any scope is set");
                    return Ok(true);
                }
            },
        };

        match self.driver.set_params(next) {
            Transition::Unchanged => {}
            Transition::Reproject => self.render(surface)?,
            Transition::Rebaseline {
                generation,
                scope,
                resubscribe,
            } => {
                self.cancel_inflight();
                if resubscribe || self.subscription.is_none() {
                    self.resubscribe(scope).await;
                }
                self.spawn_fetches(generation, next);
                self.render(surface)?;
            }
        }
        Ok(true)
    }

    /// Starts a new Loading phase for the current scope. The old buckets
    /// stay on screen until the new baseline lands.
    async fn refresh(&mut self) {
        let Some(generation) = self.driver.refresh() else {
            return;
        };
        let Some(params) = self.driver.params() else {
            return;
        };
        self.cancel_inflight();
        let bound = self.subscription.as_ref().map(Subscription::scope);
        if bound != Some(params.scope()) {
            self.resubscribe(params.scope()).await;
        }
        self.spawn_fetches(generation, params);
    }

    /// Replaces the live subscription. The old one is detached first.
    async fn resubscribe(&mut self, scope: AggregationScope) {
        self.subscription = None;
        match self.live.attach(scope).await {
            Ok(sub) => {
                debug!(%scope, "Live subscription attached");
                self.subscription = Some(sub);
            }
            Err(e) => error!(error = %e, %scope, "Live subscription failed, continuing without"),
        }
    }

    fn spawn_fetches(&mut self, generation: Generation, params: QueryParameters) {
        let source = Arc::clone(&self.source);
        let tx = self.results_tx.clone();
        self.inflight.push(tokio::spawn(async move {
            let result = source.fetch_counts(params).await;
            let _ = tx.send(FetchMessage::Baseline(generation, result)).await;
        }));

        let source = Arc::clone(&self.source);
        let tx = self.results_tx.clone();
        let scope = params.scope();
        self.inflight.push(tokio::spawn(async move {
            let result = source.fetch_downtime(scope).await;
            let _ = tx.send(FetchMessage::Downtime(generation, result)).await;
        }));
    }

    fn cancel_inflight(&mut self) {
        for handle in self.inflight.drain(..) {
            handle.abort();
        }
    }

    fn handle_fetch(&mut self, message: FetchMessage) -> bool {
        self.inflight.retain(|h| !h.is_finished());
        match message {
            FetchMessage::Baseline(generation, result) => self.driver.on_baseline(generation, result),
            FetchMessage::Downtime(generation, result) => self.driver.on_downtime(generation, result),
        }
    }

    fn render(&self, surface: &mut dyn Surface) -> Result<()> {
        if let Some(frame) = Frame::capture(&self.driver) {
            surface.render(&frame)?;
        }
        Ok(())
    }
}

async fn next_live(subscription: &mut Option<Subscription>) -> Option<CountedEvent> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
