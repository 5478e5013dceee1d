//! Process configuration, read once at startup from `BOOKINGS_*` environment
//! variables and handed to each component's constructor.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::model::RoomId;

const DEFAULT_ROOMS: &str = "1:General's Quarters,2:Major's Suite";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("invalid room entry {0:?}, expected <id>:<name>")]
    InvalidRoom(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    /// Bounded queue between request handlers and the dispatcher worker.
    pub queue_capacity: usize,
    pub delivery_timeout: Duration,
    pub from: String,
    /// Staff mailbox that receives a notice for every new reservation.
    pub staff: String,
    /// Directory of `*.html` mail templates overriding the built-ins.
    pub templates_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Compact the WAL once this many appends accumulated since the last compaction.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    /// Default bound on lock waits and WAL hand-off for booking mutations.
    pub storage_timeout: Duration,
    pub shutdown_grace: Duration,
    /// Rooms ensured to exist at startup.
    pub rooms: Vec<(RoomId, String)>,
    pub mail: MailConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(60),
            storage_timeout: Duration::from_millis(2000),
            shutdown_grace: Duration::from_secs(10),
            rooms: parse_rooms(DEFAULT_ROOMS).unwrap_or_default(),
            mail: MailConfig {
                queue_capacity: 1024,
                delivery_timeout: Duration::from_millis(5000),
                from: "reservations@localhost".into(),
                staff: "staff@localhost".into(),
                templates_dir: None,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("BOOKINGS_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = get("BOOKINGS_METRICS_PORT") {
            config.metrics_port = Some(parse("BOOKINGS_METRICS_PORT", &v)?);
        }
        if let Some(v) = get("BOOKINGS_COMPACT_THRESHOLD") {
            config.compact_threshold = parse("BOOKINGS_COMPACT_THRESHOLD", &v)?;
        }
        if let Some(v) = get("BOOKINGS_COMPACT_INTERVAL_SECS") {
            config.compact_interval = Duration::from_secs(parse("BOOKINGS_COMPACT_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = get("BOOKINGS_STORAGE_TIMEOUT_MS") {
            config.storage_timeout = Duration::from_millis(parse("BOOKINGS_STORAGE_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("BOOKINGS_SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace = Duration::from_secs(parse("BOOKINGS_SHUTDOWN_GRACE_SECS", &v)?);
        }
        if let Some(v) = get("BOOKINGS_ROOMS") {
            config.rooms = parse_rooms(&v)?;
        }
        if let Some(v) = get("BOOKINGS_MAIL_QUEUE") {
            let capacity: usize = parse("BOOKINGS_MAIL_QUEUE", &v)?;
            if capacity == 0 {
                return Err(ConfigError::Invalid { key: "BOOKINGS_MAIL_QUEUE", value: v });
            }
            config.mail.queue_capacity = capacity;
        }
        if let Some(v) = get("BOOKINGS_MAIL_TIMEOUT_MS") {
            config.mail.delivery_timeout = Duration::from_millis(parse("BOOKINGS_MAIL_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("BOOKINGS_MAIL_FROM") {
            config.mail.from = v;
        }
        if let Some(v) = get("BOOKINGS_STAFF_EMAIL") {
            config.mail.staff = v;
        }
        if let Some(v) = get("BOOKINGS_TEMPLATES_DIR") {
            config.mail.templates_dir = Some(PathBuf::from(v));
        }
        Ok(config)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

/// `"1:General's Quarters,2:Major's Suite"` → `[(1, "General's Quarters"), (2, "Major's Suite")]`
fn parse_rooms(list: &str) -> Result<Vec<(RoomId, String)>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, name) = entry
                .split_once(':')
                .ok_or_else(|| ConfigError::InvalidRoom(entry.to_string()))?;
            let id: RoomId = id
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidRoom(entry.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ConfigError::InvalidRoom(entry.to_string()));
            }
            Ok((id, name.to_string()))
        })
        .collect()
}
