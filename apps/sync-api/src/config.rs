use std::time::Duration;

/// Sync API configuration, loaded from environment variables.
///
/// The WebSocket tunables are deliberately plain inputs rather than derived
/// values; the only relationship enforced is that the keepalive interval must
/// stay shorter than the idle-read deadline, otherwise healthy connections
/// would be reaped between pings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// HS256 secret used by the default token verifier.
    pub token_secret: String,
    /// Maximum size of a single inbound WebSocket message, in bytes.
    pub max_frame_bytes: usize,
    /// Deadline for a single outbound write (serialize + flush).
    pub write_timeout: Duration,
    /// Idle-read deadline; reset on every inbound frame, including pongs.
    pub idle_timeout: Duration,
    /// Keepalive ping interval. Must be shorter than `idle_timeout`.
    pub ping_interval: Duration,
    /// Capacity of each connection's outbound mailbox.
    pub mailbox_capacity: usize,
    /// Capacity of the hub's internal command queue.
    pub dispatch_capacity: usize,
    /// How often the hub sweeps for empty rooms.
    pub reap_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing
    /// or the keepalive/idle relationship is violated.
    pub fn from_env() -> Self {
        let config = Self {
            port: parsed_var("PORT", 4003),
            token_secret: required_var("TOKEN_SECRET"),
            max_frame_bytes: parsed_var("WS_MAX_FRAME_BYTES", 262_144),
            write_timeout: Duration::from_secs(parsed_var("WS_WRITE_TIMEOUT_SECS", 10)),
            idle_timeout: Duration::from_secs(parsed_var("WS_IDLE_TIMEOUT_SECS", 60)),
            ping_interval: Duration::from_secs(parsed_var("WS_PING_INTERVAL_SECS", 25)),
            mailbox_capacity: parsed_var("WS_MAILBOX_CAPACITY", 256),
            dispatch_capacity: parsed_var("HUB_DISPATCH_CAPACITY", 1024),
            reap_interval: Duration::from_secs(parsed_var("HUB_REAP_INTERVAL_SECS", 30)),
        };

        assert!(
            config.ping_interval < config.idle_timeout,
            "WS_PING_INTERVAL_SECS must be shorter than WS_IDLE_TIMEOUT_SECS"
        );

        config
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_ping_inside_idle_window() {
        let config = Config {
            port: 4003,
            token_secret: "secret".to_string(),
            max_frame_bytes: 262_144,
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(25),
            mailbox_capacity: 256,
            dispatch_capacity: 1024,
            reap_interval: Duration::from_secs(30),
        };
        assert!(config.ping_interval < config.idle_timeout);
    }
}
