/// Application name
pub const APP_NAME: &str = "Courier";

/// Maximum encoded size of a single wire frame in bytes (256 KiB)
pub const MAX_FRAME_SIZE: usize = 262_144;

/// Maximum message content size in bytes (16 KiB)
pub const MAX_CONTENT_LEN: usize = 16 * 1024;

/// Username length bounds (in characters)
pub const MIN_USERNAME_LEN: usize = 1;
pub const MAX_USERNAME_LEN: usize = 32;

/// Maximum group name length (in characters)
pub const MAX_GROUP_NAME_LEN: usize = 64;

/// Upper bound on `search_users` results
pub const MAX_SEARCH_RESULTS: u32 = 50;

/// Session tokens are this many random bytes, hex-encoded on the wire
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Default TCP port for the chat protocol
pub const DEFAULT_CHAT_PORT: u16 = 5000;

/// Default HTTP status API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
