//! Server configuration from environment.

use std::env;

use rescue_core::ServerConfig;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Read a [`ServerConfig`] from `RESCUE_*` environment variables, falling
/// back to the defaults documented for each field. This is the coordination
/// engine's only concrete source of configuration - there is no interactive
/// config menu in the core, so whatever launcher wraps this process is free
/// to set these instead.
pub fn config_from_env() -> ServerConfig {
    let defaults = ServerConfig::default();
    ServerConfig {
        port: env_or("RESCUE_PORT", defaults.port),
        max_drones: env_or("RESCUE_MAX_DRONES", defaults.max_drones),
        map_width: env_or("RESCUE_MAP_WIDTH", defaults.map_width),
        map_height: env_or("RESCUE_MAP_HEIGHT", defaults.map_height),
        survivor_spawn_rate_s: env_or("RESCUE_SURVIVOR_SPAWN_RATE_S", defaults.survivor_spawn_rate_s),
        drone_speed: env_or("RESCUE_DRONE_SPEED", defaults.drone_speed),
        status_update_interval_s: env_or(
            "RESCUE_STATUS_UPDATE_INTERVAL_S",
            defaults.status_update_interval_s,
        ),
        heartbeat_interval_s: env_or("RESCUE_HEARTBEAT_INTERVAL_S", defaults.heartbeat_interval_s),
        heartbeat_miss_threshold: env_or(
            "RESCUE_HEARTBEAT_MISS_THRESHOLD",
            defaults.heartbeat_miss_threshold,
        ),
        reconnect_grace_s: env_or("RESCUE_RECONNECT_GRACE_S", defaults.reconnect_grace_s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_to_default_when_unset() {
        // Use a key that will never legitimately be set in CI.
        let value: u16 = env_or("RESCUE_TEST_UNSET_KEY_XYZ", 4242);
        assert_eq!(value, 4242);
    }
}
