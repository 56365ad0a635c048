//! Runtime configuration: environment variables (optionally from `.env`)
//! with CLI overrides layered on top.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DashboardError, Result};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_OVERLAP_WINDOW_SECS: i64 = 120;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SOCKETIO_PATH: &str = "/ws/socket.io/";

/// Push channel the `watch` loop subscribes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LiveTransport {
    /// `counts_update` messages on the back end's Socket.IO endpoint.
    #[default]
    SocketIo,
    /// Newline-delimited JSON from the counts stream endpoint.
    Stream,
}

impl FromStr for LiveTransport {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "socketio" | "socket.io" => Ok(LiveTransport::SocketIo),
            "stream" | "ndjson" => Ok(LiveTransport::Stream),
            other => Err(invalid(format!("live transport {other:?}"))),
        }
    }
}

/// Time zone of the sensor site; all hour bucketing follows its wall clock.
///
/// A named zone tracks daylight saving, so a summer and a winter day of the
/// same site bucket by the local hour the operator actually saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteZone {
    Fixed(FixedOffset),
    Named(Tz),
}

impl SiteZone {
    pub fn utc() -> Self {
        SiteZone::Fixed(utc())
    }

    /// Re-expresses `ts` in the offset the site observed at that instant.
    pub fn convert(&self, ts: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        match self {
            SiteZone::Fixed(offset) => ts.with_timezone(offset),
            SiteZone::Named(tz) => ts.with_timezone(tz).fixed_offset(),
        }
    }

    /// Attaches the site offset to a wall-clock time.
    ///
    /// A repeated hour at a fall-back transition resolves to its first
    /// occurrence. Times skipped by a spring-forward yield `None`.
    pub fn localize(&self, naive: &NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        match self {
            SiteZone::Fixed(offset) => offset.from_local_datetime(naive).single(),
            SiteZone::Named(tz) => tz
                .from_local_datetime(naive)
                .earliest()
                .map(|dt| dt.fixed_offset()),
        }
    }
}

impl Default for SiteZone {
    fn default() -> Self {
        Self::utc()
    }
}

impl fmt::Display for SiteZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteZone::Fixed(offset) => write!(f, "{offset}"),
            SiteZone::Named(tz) => f.write_str(tz.name()),
        }
    }
}

impl FromStr for SiteZone {
    type Err = DashboardError;

    /// Accepts `Z`, `UTC`, a signed `+HH:MM` offset or an IANA zone name
    /// such as `America/New_York`.
    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
            return Ok(Self::utc());
        }
        if raw.starts_with(['+', '-']) {
            return raw
                .parse::<FixedOffset>()
                .map(SiteZone::Fixed)
                .map_err(|e| invalid(format!("site offset {raw:?}: {e}")));
        }
        raw.parse::<Tz>()
            .map(SiteZone::Named)
            .map_err(|e| invalid(format!("site time zone {raw:?}: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    pub backend_url: String,
    pub site_zone: SiteZone,
    /// `None` disables periodic refresh.
    pub poll_interval: Option<Duration>,
    /// Rows requested per page from the counts endpoint.
    pub page_size: usize,
    pub overlap_window: TimeDelta,
    pub http_timeout: Duration,
    pub live_transport: LiveTransport,
    /// Socket.IO endpoint, relative to `backend_url`.
    pub socketio_path: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            site_zone: SiteZone::utc(),
            poll_interval: None,
            page_size: DEFAULT_PAGE_SIZE,
            overlap_window: TimeDelta::seconds(DEFAULT_OVERLAP_WINDOW_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            live_transport: LiveTransport::default(),
            socketio_path: DEFAULT_SOCKETIO_PATH.to_string(),
        }
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn invalid(details: impl Into<String>) -> DashboardError {
    DashboardError::InvalidConfig {
        details: details.into(),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| invalid(format!("{name}={raw:?}: {e}")))
}

impl DashboardConfig {
    /// Builds a config from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; `from_env` uses the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(url) = lookup("BACKEND_URL") {
            cfg.backend_url = url;
        }
        if let Some(raw) = lookup("SITE_TIMEZONE") {
            cfg.site_zone = raw.parse()?;
        }
        if let Some(raw) = lookup("POLL_INTERVAL_SECS") {
            cfg.set_poll_interval_secs(parse_number("POLL_INTERVAL_SECS", &raw)?);
        }
        if let Some(raw) = lookup("PAGE_SIZE") {
            cfg.page_size = parse_number("PAGE_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("OVERLAP_WINDOW_SECS") {
            cfg.overlap_window = TimeDelta::seconds(parse_number("OVERLAP_WINDOW_SECS", &raw)?);
        }
        if let Some(raw) = lookup("HTTP_TIMEOUT_SECS") {
            cfg.http_timeout = Duration::from_secs(parse_number("HTTP_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = lookup("LIVE_TRANSPORT") {
            cfg.live_transport = raw.parse()?;
        }
        if let Some(path) = lookup("SOCKETIO_PATH") {
            cfg.socketio_path = path;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// `0` disables polling.
    pub fn set_poll_interval_secs(&mut self, secs: u64) {
        self.poll_interval = (secs > 0).then(|| Duration::from_secs(secs));
    }

    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.backend_url)
            .map_err(|e| invalid(format!("backend url {:?}: {e}", self.backend_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "backend url must be http(s), got {}",
                url.scheme()
            )));
        }
        if self.page_size == 0 {
            return Err(invalid("page size must be positive"));
        }
        if self.overlap_window < TimeDelta::zero() {
            return Err(invalid("overlap window must not be negative"));
        }
        if self.socketio_path.trim().is_empty() {
            return Err(invalid("socket.io path must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let cfg = DashboardConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, DashboardConfig::default());
        assert!(cfg.poll_interval.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let cfg = DashboardConfig::from_lookup(lookup(&[
            ("BACKEND_URL", "https://counts.example.org"),
            ("SITE_TIMEZONE", "-05:00"),
            ("POLL_INTERVAL_SECS", "30"),
            ("PAGE_SIZE", "250"),
        ]))
        .unwrap();
        assert_eq!(cfg.backend_url, "https://counts.example.org");
        assert_eq!(
            cfg.site_zone,
            SiteZone::Fixed(FixedOffset::west_opt(5 * 3600).unwrap())
        );
        assert_eq!(cfg.poll_interval, Some(Duration::from_secs(30)));
        assert_eq!(cfg.page_size, 250);
    }

    #[test]
    fn test_live_transport_selection() {
        let cfg = DashboardConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.live_transport, LiveTransport::SocketIo);
        assert_eq!(cfg.socketio_path, "/ws/socket.io/");

        let cfg = DashboardConfig::from_lookup(lookup(&[
            ("LIVE_TRANSPORT", "Stream"),
            ("SOCKETIO_PATH", "/live/socket.io/"),
        ]))
        .unwrap();
        assert_eq!(cfg.live_transport, LiveTransport::Stream);
        assert_eq!(cfg.socketio_path, "/live/socket.io/");
        assert!(DashboardConfig::from_lookup(lookup(&[("LIVE_TRANSPORT", "carrier-pigeon")])).is_err());
    }

    #[test]
    fn test_zero_poll_interval_disables_polling() {
        let cfg = DashboardConfig::from_lookup(lookup(&[("POLL_INTERVAL_SECS", "0")])).unwrap();
        assert!(cfg.poll_interval.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(DashboardConfig::from_lookup(lookup(&[("PAGE_SIZE", "0")])).is_err());
        assert!(DashboardConfig::from_lookup(lookup(&[("PAGE_SIZE", "many")])).is_err());
        assert!(DashboardConfig::from_lookup(lookup(&[("BACKEND_URL", "ftp://x")])).is_err());
        assert!(DashboardConfig::from_lookup(lookup(&[("SITE_TIMEZONE", "Mars/Olympus")])).is_err());
    }

    #[test]
    fn test_parse_site_zone_forms() {
        assert_eq!("Z".parse::<SiteZone>().unwrap(), SiteZone::utc());
        assert_eq!(
            "+02:00".parse::<SiteZone>().unwrap(),
            SiteZone::Fixed(FixedOffset::east_opt(7200).unwrap())
        );
        assert_eq!(
            "America/New_York".parse::<SiteZone>().unwrap(),
            SiteZone::Named(chrono_tz::America::New_York)
        );
    }

    #[test]
    fn test_named_zone_follows_daylight_saving() {
        let zone: SiteZone = "America/New_York".parse().unwrap();
        let at = |d: &str| NaiveDateTime::parse_from_str(d, "%Y-%m-%d %H:%M:%S").unwrap();

        let winter = zone.localize(&at("2024-01-15 08:00:00")).unwrap();
        let summer = zone.localize(&at("2024-07-15 08:00:00")).unwrap();
        assert_eq!(winter.offset().local_minus_utc(), -5 * 3600);
        assert_eq!(summer.offset().local_minus_utc(), -4 * 3600);

        let utc_noon = DateTime::parse_from_rfc3339("2024-07-15T12:00:00Z").unwrap();
        assert_eq!(zone.convert(&utc_noon).to_rfc3339(), "2024-07-15T08:00:00-04:00");
    }

    #[test]
    fn test_named_zone_skipped_and_repeated_hours() {
        let zone: SiteZone = "America/New_York".parse().unwrap();
        let at = |d: &str| NaiveDateTime::parse_from_str(d, "%Y-%m-%d %H:%M:%S").unwrap();

        assert!(zone.localize(&at("2024-03-10 02:30:00")).is_none());
        let repeated = zone.localize(&at("2024-11-03 01:30:00")).unwrap();
        assert_eq!(repeated.offset().local_minus_utc(), -4 * 3600);
    }
}
