//! CLI entry point for the intersection traffic dashboard.
//!
//! `watch` keeps a live view of one scope, `snapshot` prints a one-off hourly
//! table from the back end and `aggregate` buckets a local counts CSV.

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use traffic_dashboard::{
    aggregate::Aggregator,
    config::{DashboardConfig, LiveTransport, SiteZone},
    dashboard::{Command, Dashboard, Surface},
    fetch::{Backend, BasicClient, DowntimeSource, HistoricalSource},
    live::{LiveSource, SocketIoClient, SocketIoSource, StreamSource},
    model::{ApproachFilter, ClassFilter, QueryParameters},
    output::{
        JsonSurface, TableSurface, append_rows, chart_rows, downtime_rows, hourly_rows,
        overlay_json, page, render_downtime, render_table,
    },
    overlay::overlay_regions,
    parser::{CountRecord, validate_counts},
};

#[derive(Parser)]
#[command(name = "traffic_dashboard")]
#[command(about = "Live hourly traffic counts for an instrumented intersection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Overrides for values otherwise read from the environment.
#[derive(Args, Debug, Default)]
struct BackendArgs {
    /// Base URL of the counts back end (BACKEND_URL)
    #[arg(long)]
    backend_url: Option<String>,

    /// Site time zone, an IANA name or an offset such as +02:00 (SITE_TIMEZONE)
    #[arg(long)]
    site_tz: Option<SiteZone>,

    /// Rows per page for historical fetches (PAGE_SIZE)
    #[arg(long)]
    page_size: Option<usize>,
}

#[derive(Args, Debug)]
struct ScopeArgs {
    /// Day to aggregate, YYYY-MM-DD
    #[arg(short, long)]
    date: NaiveDate,

    /// Sensor id
    #[arg(short, long, default_value_t = 1)]
    sensor: i64,

    /// Approach to display (NB, SB, EB, WB or All)
    #[arg(short, long, default_value = "All")]
    approach: ApproachFilter,

    /// Vehicle class to count (car, truck, bus, pedestrian or All)
    #[arg(short, long, default_value = "All")]
    class: ClassFilter,
}

impl ScopeArgs {
    fn params(&self) -> QueryParameters {
        QueryParameters::new(self.date, self.sensor)
            .with_approach(self.approach)
            .with_class(self.class)
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow one scope live; reads commands such as `sensor 2` from stdin
    Watch {
        #[command(flatten)]
        scope: ScopeArgs,

        #[command(flatten)]
        backend: BackendArgs,

        /// Re-fetch the baseline every N seconds, 0 disables (POLL_INTERVAL_SECS)
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Live feed: socketio or stream (LIVE_TRANSPORT)
        #[arg(long)]
        live: Option<LiveTransport>,

        #[arg(short, long, value_enum, default_value_t = Format::Table)]
        format: Format,
    },
    /// Fetch one day once and print the hourly table
    Snapshot {
        #[command(flatten)]
        scope: ScopeArgs,

        #[command(flatten)]
        backend: BackendArgs,

        /// Rows per page of the hourly table
        #[arg(long, default_value_t = 24)]
        limit: usize,

        /// First row of the page
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// CSV file to append the hourly rows to
        #[arg(long)]
        csv: Option<String>,

        #[arg(short, long, value_enum, default_value_t = Format::Table)]
        format: Format,
    },
    /// Bucket a local counts CSV (time,class,sensor_id,approach) by hour
    Aggregate {
        /// CSV export of counted events
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[command(flatten)]
        scope: ScopeArgs,

        /// Site time zone for bucketing (SITE_TIMEZONE)
        #[arg(long)]
        site_tz: Option<SiteZone>,

        /// CSV file to append the hourly rows to
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/traffic_dashboard.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("traffic_dashboard.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            scope,
            backend,
            poll_interval,
            live,
            format,
        } => {
            let mut config = load_config(&backend)?;
            if let Some(secs) = poll_interval {
                config.set_poll_interval_secs(secs);
            }
            if let Some(transport) = live {
                config.live_transport = transport;
            }
            watch(config, scope.params(), format).await?;
        }
        Commands::Snapshot {
            scope,
            backend,
            limit,
            offset,
            csv,
            format,
        } => {
            let config = load_config(&backend)?;
            snapshot(&config, scope.params(), limit, offset, csv.as_deref(), format).await?;
        }
        Commands::Aggregate {
            input,
            scope,
            site_tz,
            output,
        } => {
            let config = load_config(&BackendArgs {
                site_tz,
                ..BackendArgs::default()
            })?;
            aggregate_file(&config, &input, scope.params(), output.as_deref())?;
        }
    }

    Ok(())
}

/// Environment first, then any CLI overrides.
fn load_config(args: &BackendArgs) -> Result<DashboardConfig> {
    let mut config = DashboardConfig::from_env()?;
    if let Some(url) = &args.backend_url {
        config.backend_url = url.clone();
    }
    if let Some(zone) = args.site_tz {
        config.site_zone = zone;
    }
    if let Some(n) = args.page_size {
        config.page_size = n;
    }
    config.validate()?;
    debug!(?config, "Configuration loaded");
    Ok(config)
}

#[tracing::instrument(skip(config), fields(scope = %params.scope(), live = ?config.live_transport))]
async fn watch(config: DashboardConfig, params: QueryParameters, format: Format) -> Result<()> {
    let fetcher = Arc::new(Backend::new(BasicClient::new(config.http_timeout)?, &config)?);
    match config.live_transport {
        LiveTransport::SocketIo => {
            let live = Arc::new(SocketIoSource::new(SocketIoClient, &config)?);
            run_watch(fetcher, live, &config, params, format).await
        }
        LiveTransport::Stream => {
            let streamer = Arc::new(Backend::new(BasicClient::streaming()?, &config)?);
            let live = Arc::new(StreamSource::new(streamer));
            run_watch(fetcher, live, &config, params, format).await
        }
    }
}

async fn run_watch<L: LiveSource + 'static>(
    fetcher: Arc<Backend<BasicClient>>,
    live: Arc<L>,
    config: &DashboardConfig,
    params: QueryParameters,
    format: Format,
) -> Result<()> {
    let (tx, rx) = mpsc::channel(32);
    tx.send(Command::Set(params)).await?;
    tokio::spawn(read_commands(tx));

    let mut surface: Box<dyn Surface> = match format {
        Format::Json => Box::new(JsonSurface::new(std::io::stdout())),
        Format::Table => Box::new(TableSurface::new(std::io::stdout())),
    };

    let dashboard = Dashboard::new(fetcher, live, config);
    let driver = dashboard.run(rx, surface.as_mut()).await?;
    info!(
        generation = driver.generation(),
        total = driver.aggregator().state().total(),
        "Watch finished"
    );
    Ok(())
}

/// Forwards operator commands from stdin until EOF or Ctrl+C.
async fn read_commands(tx: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match line.parse::<Command>() {
                        Ok(command) => {
                            if tx.send(command).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, input = line, "Ignoring command"),
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    return;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                let _ = tx.send(Command::Quit).await;
                return;
            }
        }
    }
}

#[tracing::instrument(skip(config, csv, format), fields(scope = %params.scope()))]
async fn snapshot(
    config: &DashboardConfig,
    params: QueryParameters,
    limit: usize,
    offset: usize,
    csv: Option<&str>,
    format: Format,
) -> Result<()> {
    let backend = Backend::new(BasicClient::new(config.http_timeout)?, config)?;
    let (events, downtime) = tokio::try_join!(
        backend.fetch_counts(params),
        backend.fetch_downtime(params.scope())
    )?;

    let mut aggregator = Aggregator::new(params.class);
    aggregator.reset_baseline(params.scope(), &events);
    let series = aggregator.current_series();
    let rows = hourly_rows(&series, params.date, params.approach);
    info!(
        events = events.len(),
        downtime = downtime.len(),
        "Snapshot fetched"
    );

    if let Some(path) = csv {
        append_rows(path, &rows)?;
        info!(path, rows = rows.len(), "Hourly rows appended");
    }

    let page = page(&rows, offset, limit);
    let gaps = downtime_rows(&downtime);
    match format {
        Format::Json => {
            let doc = serde_json::json!({
                "scope": params.scope().to_string(),
                "chart": chart_rows(&series, params.approach),
                "overlay": overlay_json(&overlay_regions(&downtime, params.date)),
                "hourly": page,
                "downtime": gaps,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Format::Table => {
            print!("{}", render_table(&page.data));
            print!("{}", render_downtime(&gaps));
        }
    }
    Ok(())
}

#[tracing::instrument(skip(config, input, output), fields(input = %input.display(), scope = %params.scope()))]
fn aggregate_file(
    config: &DashboardConfig,
    input: &Path,
    params: QueryParameters,
    output: Option<&str>,
) -> Result<()> {
    let mut reader = csv::Reader::from_path(input)?;
    let records = reader
        .deserialize::<CountRecord>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let events = validate_counts(&records, config.site_zone);

    let mut aggregator = Aggregator::new(params.class);
    let total = aggregator.reset_baseline(params.scope(), &events).total();
    info!(
        records = records.len(),
        valid = events.len(),
        counted = total,
        "Counts aggregated"
    );

    let rows = hourly_rows(&aggregator.current_series(), params.date, params.approach);
    match output {
        Some(path) => {
            append_rows(path, &rows)?;
            info!(path, rows = rows.len(), "Hourly rows appended");
        }
        None => print!("{}", render_table(&rows)),
    }
    Ok(())
}
