use std::time::Duration;

// supervision
pub const RETRY_PAUSE: Duration = Duration::from_secs(5);
pub const LOG_PREFIX: &str = "[external source] ";

// transport defaults
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const READ_BUFFER_COUNT: usize = 512;
pub const READ_BUFFER_SIZE: usize = 2048;
pub const MAX_HANDSHAKE_SIZE: usize = 64 * 1024;

// connections
pub const DEFAULT_TCP_PORT: u16 = 8554;
pub const DEFAULT_TLS_PORT: u16 = 8555;
pub const USER_AGENT: &str = concat!("pullcast/", env!("CARGO_PKG_VERSION"));
