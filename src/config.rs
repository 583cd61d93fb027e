//! Server Configuration
//!
//! Defaults suit a single public server; every knob can be overridden from
//! the environment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::game::moves::MovePolicy;
use crate::game::room::RoomConfig;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 3001;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound queue length per connection.
    pub channel_capacity: usize,
    /// Server version string.
    pub version: String,
    /// Round tuning applied to every room.
    pub room: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            max_connections: 1000,
            channel_capacity: 64,
            version: crate::VERSION.to_string(),
            room: RoomConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys keep their defaults;
    /// unparsable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let rooms = defaults.room;

        let host: IpAddr = parse_or(&lookup, "BIND_HOST", defaults.bind_addr.ip());
        let port: u16 = parse_or(&lookup, "PORT", defaults.bind_addr.port());
        let counting_ms: u64 = parse_or(&lookup, "COUNTING_MS", rooms.counting_delay.as_millis() as u64);
        let reset_ms: u64 = parse_or(&lookup, "RESET_MS", rooms.reset_delay.as_millis() as u64);
        let strict = lookup("STRICT_MOVES")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Self {
            bind_addr: SocketAddr::new(host, port),
            max_connections: parse_or(&lookup, "MAX_CONNECTIONS", defaults.max_connections),
            channel_capacity: defaults.channel_capacity,
            version: defaults.version,
            room: RoomConfig {
                round_secs: parse_or(&lookup, "ROUND_SECS", rooms.round_secs),
                buzz_secs: parse_or(&lookup, "BUZZ_SECS", rooms.buzz_secs),
                counting_delay: Duration::from_millis(counting_ms),
                reset_delay: Duration::from_millis(reset_ms),
                race_rooms: parse_or(&lookup, "RACE_ROOMS", rooms.race_rooms),
                move_policy: if strict { MovePolicy::Strict } else { MovePolicy::Trusted },
                max_draws: rooms.max_draws,
            },
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid {}={:?}, using default", key, raw);
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 3001);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.room.round_secs, 120);
        assert_eq!(config.room.buzz_secs, 30);
        assert_eq!(config.room.move_policy, MovePolicy::Trusted);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("PORT", "9000"),
            ("BIND_HOST", "127.0.0.1"),
            ("ROUND_SECS", "60"),
            ("COUNTING_MS", "0"),
            ("RACE_ROOMS", "2"),
            ("STRICT_MOVES", "true"),
        ]));

        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.room.round_secs, 60);
        assert!(config.room.counting_delay.is_zero());
        assert_eq!(config.room.race_rooms, 2);
        assert_eq!(config.room.move_policy, MovePolicy::Strict);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("PORT", "not-a-port"),
            ("BUZZ_SECS", "-4"),
            ("MAX_CONNECTIONS", ""),
        ]));

        assert_eq!(config.bind_addr.port(), 3001);
        assert_eq!(config.room.buzz_secs, 30);
        assert_eq!(config.max_connections, 1000);
    }
}
