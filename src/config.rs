use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use tracing::warn;

pub const DEFAULT_OVERBOOK_LIMIT: u32 = 3;
pub const DEFAULT_TZ_AVAILABILITY: Tz = chrono_tz::America::Argentina::Buenos_Aires;
pub const DEFAULT_PUMP_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Extra concurrent bookings allowed beyond the first in an overlapping window.
    pub overbook_limit: u32,
    /// Zone the weekly availability rules are written in.
    pub tz_availability: Tz,
    pub outbox_path: PathBuf,
    pub pump_interval: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            overbook_limit: DEFAULT_OVERBOOK_LIMIT,
            tz_availability: DEFAULT_TZ_AVAILABILITY,
            outbox_path: PathBuf::from("./data/outbox.log"),
            pump_interval: DEFAULT_PUMP_INTERVAL,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            overbook_limit: parse_or(&lookup, "SCHED_OVERBOOK_LIMIT", defaults.overbook_limit),
            tz_availability: parse_or(&lookup, "SCHED_TZ_AVAILABILITY", defaults.tz_availability),
            outbox_path: lookup("SCHED_OUTBOX_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.outbox_path),
            pump_interval: Duration::from_secs(parse_or(
                &lookup,
                "SCHED_PUMP_INTERVAL_SECS",
                defaults.pump_interval.as_secs(),
            )),
            compact_threshold: parse_or(
                &lookup,
                "SCHED_COMPACT_THRESHOLD",
                defaults.compact_threshold,
            ),
            metrics_port: lookup("SCHED_METRICS_PORT").and_then(|s| s.parse().ok()),
        }
    }

    /// Bookings allowed to overlap any single window.
    pub fn max_concurrent(&self) -> usize {
        self.overbook_limit as usize + 1
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{key}={raw:?} is not valid, using default");
            default
        }),
    }
}
