use std::time::Duration;

// Default tracing filter when neither an explicit level nor RUST_LOG is given.
// Recoverable loop conditions surface as warnings; everything else stays quiet.
pub const DEFAULT_LOG_FILTER: &str = "warn,jobwatch=warn";

// How often the Linux backend rescans /proc while blocked in next_event.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub const KIB: u64 = 1 << 10;
pub const MIB: u64 = 1 << 20;
pub const GIB: u64 = 1 << 30;

// Image-name buffer length in UTF-16 units (MAX_PATH + 1).
pub const MAX_IMAGE_NAME: usize = 261;

// Exit status of a forked child whose exec failed after it was resumed.
pub const EXEC_FAILED_STATUS: i32 = 127;
