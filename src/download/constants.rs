//! Constants for the download module (timeouts, redirects).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle time allowed between reads of a response body.
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Maximum HTTP redirects followed per request.
pub const MAX_REDIRECTS: usize = 10;
