use std::path::PathBuf;
use std::str::FromStr;

use crate::auth::AuthorizationCodes;
use crate::topology::Topology;

/// Default cap on a single upload body.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Process configuration, read from `HOSTEL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub topology_path: Option<PathBuf>,
    pub payment_codes: AuthorizationCodes,
    pub staff_token: Option<String>,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub max_upload_bytes: usize,
    pub reminders: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            topology_path: None,
            payment_codes: AuthorizationCodes::default(),
            staff_token: None,
            metrics_port: None,
            compact_threshold: 1000,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            reminders: true,
        }
    }
}

fn parsed<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Unparseable values fall back to the default.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind: get("HOSTEL_BIND").unwrap_or(defaults.bind),
            port: parsed(get("HOSTEL_PORT"), defaults.port),
            data_dir: get("HOSTEL_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            topology_path: get("HOSTEL_TOPOLOGY").filter(|p| !p.is_empty()).map(PathBuf::from),
            payment_codes: get("HOSTEL_PAYMENT_CODES")
                .map_or(defaults.payment_codes, |list| AuthorizationCodes::parse(&list)),
            staff_token: get("HOSTEL_STAFF_TOKEN").filter(|t| !t.is_empty()),
            metrics_port: get("HOSTEL_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            compact_threshold: parsed(get("HOSTEL_COMPACT_THRESHOLD"), defaults.compact_threshold),
            max_upload_bytes: parsed(get("HOSTEL_MAX_UPLOAD_BYTES"), defaults.max_upload_bytes),
            reminders: parsed(get("HOSTEL_REMINDERS"), defaults.reminders),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("hostel.wal")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// The configured layout file, or the built-in layout when none is set.
    pub fn topology(&self) -> std::io::Result<Topology> {
        match &self.topology_path {
            Some(path) => Topology::load(path),
            None => Ok(Topology::default()),
        }
    }
}
