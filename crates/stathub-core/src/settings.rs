//! Process-wide settings, read from the environment once at startup.

use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable overriding the request timeout, in milliseconds.
pub const REQUEST_TIMEOUT_ENV: &str = "STATHUB_REQUEST_TIMEOUT";

/// Request timeout applied when the environment does not override it.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Settings resolved from the environment.
#[derive(Clone, Copy, Debug)]
pub struct Settings {
    /// How long a request waits for its reply before resolving with the
    /// synthetic timeout error.
    pub request_timeout: Duration,
}

impl Settings {
    /// Process-wide settings, resolved on first use and fixed thereafter.
    pub fn get() -> &'static Settings {
        static SETTINGS: OnceLock<Settings> = OnceLock::new();
        SETTINGS.get_or_init(Self::from_env)
    }

    fn from_env() -> Self {
        let raw = std::env::var(REQUEST_TIMEOUT_ENV).ok();
        Self {
            request_timeout: Duration::from_millis(parse_timeout_ms(raw.as_deref())),
        }
    }
}

/// Parse the timeout override; absent or non-numeric values fall back to
/// the default.
fn parse_timeout_ms(raw: Option<&str>) -> u64 {
    raw.and_then(|value| value.trim().parse().ok())
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS)
}
