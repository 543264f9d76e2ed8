/// Application name
pub const APP_NAME: &str = "livepad";

/// Maximum number of text notes a room may hold
pub const DEFAULT_MAX_NOTES: usize = 4;

/// Maximum number of files a room may hold
pub const DEFAULT_MAX_FILES: usize = 8;

/// Maximum upload size in bytes (100 MiB)
pub const MAX_FILE_SIZE: usize = 100 * 1024 * 1024;

/// Expiry sweep period in seconds (hourly)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Uploads allowed per room per rate window
pub const UPLOAD_RATE_LIMIT: u32 = 20;

/// Upload rate window in seconds (10 minutes)
pub const UPLOAD_RATE_WINDOW_SECS: u64 = 600;

/// Room ids are hex digests of 16 to 32 bytes
pub const ROOM_ID_MIN_BYTES: usize = 16;
pub const ROOM_ID_MAX_BYTES: usize = 32;

/// Events buffered per connection before fan-out starts dropping
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default HTTP / WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Path prefix of file locators handed out to clients
pub const FILE_LOCATOR_PREFIX: &str = "/files/";
