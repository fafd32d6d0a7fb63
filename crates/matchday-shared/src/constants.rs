/// Application name
pub const APP_NAME: &str = "Matchday";

/// Separator between the two participant ids of a room id.
/// Never occurs in a hyphenated UUID.
pub const ROOM_SEPARATOR: char = '_';

/// Maximum message length in characters, after trimming
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Maximum display name length in characters
pub const MAX_DISPLAY_NAME_CHARS: usize = 64;

/// Default polling interval advertised to clients without a live channel
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;

/// Bounds for the advertised polling interval
pub const MIN_POLL_INTERVAL_SECS: u64 = 1;
pub const MAX_POLL_INTERVAL_SECS: u64 = 5;

/// Typing indicators are cleared after this much silence
pub const DEFAULT_TYPING_TTL_SECS: u64 = 5;

/// Outbound queue length per live connection
pub const DEFAULT_CONNECTION_QUEUE: usize = 256;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Reconnect backoff bounds for live-channel clients
pub const RECONNECT_BASE_MS: u64 = 500;
pub const RECONNECT_MAX_MS: u64 = 30_000;
