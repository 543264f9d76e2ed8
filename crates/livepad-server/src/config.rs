//! Server configuration, read once from the environment at startup.
//!
//! Every setting has a default, and a value that does not parse is logged
//! and replaced by that default rather than aborting startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use livepad_shared::constants::{
    APP_NAME, DEFAULT_HTTP_PORT, DEFAULT_MAX_FILES, DEFAULT_MAX_NOTES, DEFAULT_SWEEP_INTERVAL_SECS,
    MAX_FILE_SIZE, UPLOAD_RATE_LIMIT, UPLOAD_RATE_WINDOW_SECS,
};
use livepad_shared::types::RoomLifetime;
use livepad_store::RoomLimits;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for HTTP and WebSocket traffic.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Directory holding the room database.
    /// Env: `DATA_DIR`
    /// Default: `./data`
    pub data_dir: PathBuf,

    /// Database name; the file is `<DATA_DIR>/<DB_NAME>.db`.
    /// Env: `DB_NAME`
    /// Default: `livepad`
    pub db_name: String,

    /// Filesystem path where uploaded (encrypted) file bytes are stored.
    /// Env: `BLOB_STORAGE_PATH`
    /// Default: `./data/uploads`
    pub blob_storage_path: PathBuf,

    /// Env: `MAX_NOTES_PER_ROOM`, default 4.
    pub max_notes: usize,

    /// Env: `MAX_FILES_PER_ROOM`, default 8.
    pub max_files: usize,

    /// Maximum upload size in bytes.
    /// Env: `MAX_FILE_SIZE`
    /// Default: 100 MiB
    pub max_file_size: usize,

    /// How often expired rooms are swept.
    /// Env: `SWEEP_INTERVAL_SECS`
    /// Default: 3600
    pub sweep_interval: Duration,

    /// Lifetime of a new room when the client does not pick one.
    /// Env: `DEFAULT_ROOM_LIFETIME`
    /// Default: `1d`
    pub default_lifetime: RoomLifetime,

    /// Lifetimes clients may pick.
    /// Env: `ALLOWED_ROOM_LIFETIMES` (comma separated)
    /// Default: `3h,1d,7d,30d`
    pub allowed_lifetimes: Vec<RoomLifetime>,

    /// Env: `UPLOAD_RATE_LIMIT`, default 20.
    pub upload_rate_limit: u32,

    /// Env: `UPLOAD_RATE_WINDOW_SECS`, default 600.
    pub upload_rate_window: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            data_dir: PathBuf::from("./data"),
            db_name: APP_NAME.to_string(),
            blob_storage_path: PathBuf::from("./data/uploads"),
            max_notes: DEFAULT_MAX_NOTES,
            max_files: DEFAULT_MAX_FILES,
            max_file_size: MAX_FILE_SIZE,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            default_lifetime: RoomLifetime::OneDay,
            allowed_lifetimes: RoomLifetime::ALL.to_vec(),
            upload_rate_limit: UPLOAD_RATE_LIMIT,
            upload_rate_window: Duration::from_secs(UPLOAD_RATE_WINDOW_SECS),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(dir) = get("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(name) = get("DB_NAME") {
            if !name.is_empty() {
                config.db_name = name;
            }
        }

        config.blob_storage_path = match get("BLOB_STORAGE_PATH") {
            Some(path) => PathBuf::from(path),
            None => config.data_dir.join("uploads"),
        };

        parse_into(&get, "MAX_NOTES_PER_ROOM", &mut config.max_notes);
        parse_into(&get, "MAX_FILES_PER_ROOM", &mut config.max_files);
        parse_into(&get, "MAX_FILE_SIZE", &mut config.max_file_size);
        parse_into(&get, "UPLOAD_RATE_LIMIT", &mut config.upload_rate_limit);

        let mut secs = config.sweep_interval.as_secs();
        parse_into(&get, "SWEEP_INTERVAL_SECS", &mut secs);
        config.sweep_interval = Duration::from_secs(secs.max(1));

        let mut secs = config.upload_rate_window.as_secs();
        parse_into(&get, "UPLOAD_RATE_WINDOW_SECS", &mut secs);
        config.upload_rate_window = Duration::from_secs(secs.max(1));

        if let Some(list) = get("ALLOWED_ROOM_LIFETIMES") {
            match parse_lifetimes(&list) {
                Ok(lifetimes) if !lifetimes.is_empty() => config.allowed_lifetimes = lifetimes,
                Ok(_) => tracing::warn!("Empty ALLOWED_ROOM_LIFETIMES, using default"),
                Err(e) => tracing::warn!(error = %e, "Invalid ALLOWED_ROOM_LIFETIMES, using default"),
            }
        }

        parse_into(&get, "DEFAULT_ROOM_LIFETIME", &mut config.default_lifetime);
        if !config.allowed_lifetimes.contains(&config.default_lifetime) {
            tracing::warn!(
                default = %config.default_lifetime,
                "DEFAULT_ROOM_LIFETIME is not an allowed lifetime, allowing it"
            );
            config.allowed_lifetimes.push(config.default_lifetime);
        }

        config
    }

    /// Path of the room database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.db", self.db_name))
    }

    pub fn room_limits(&self) -> RoomLimits {
        RoomLimits {
            max_notes: self.max_notes,
            max_files: self.max_files,
        }
    }

    /// The lifetime a new room gets: the requested one if allowed, else the
    /// default.
    pub fn resolve_lifetime(&self, requested: Option<RoomLifetime>) -> RoomLifetime {
        match requested {
            Some(lifetime) if self.allowed_lifetimes.contains(&lifetime) => lifetime,
            Some(lifetime) => {
                tracing::debug!(requested = %lifetime, "Lifetime not allowed, using default");
                self.default_lifetime
            }
            None => self.default_lifetime,
        }
    }
}

/// Overwrite `slot` with the parsed env value, keeping the default (and
/// logging) when it does not parse.
fn parse_into<T>(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = get(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(e) => tracing::warn!(key, value = %raw, error = %e, "Invalid value, using default"),
        }
    }
}

fn parse_lifetimes(list: &str) -> Result<Vec<RoomLifetime>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}
