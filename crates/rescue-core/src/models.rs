//! Core data models for the rescue coordination system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cell on the bounded 2-D map. Always clamped to `[0, width) x [0, height)`
/// by whoever constructs it from an untrusted source (telemetry, CLI args).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Clamp this coordinate into `[0, width) x [0, height)`.
    pub fn clamped(self, width: i32, height: i32) -> Self {
        Self {
            x: self.x.clamp(0, width.saturating_sub(1).max(0)),
            y: self.y.clamp(0, height.saturating_sub(1).max(0)),
        }
    }
}

/// Manhattan distance between two coordinates. The system's sole distance
/// metric: no diagonal movement, no obstacle routing.
pub fn manhattan_distance(a: Coord, b: Coord) -> i64 {
    (a.x as i64 - b.x as i64).abs() + (a.y as i64 - b.y as i64).abs()
}

/// Server-recorded status of a drone. Only the server ever transitions a
/// record to `Disconnected`; the IDLE/ON_MISSION transitions are driven by
/// dispatch and mission completion (see the non-demotion rule on
/// [`DroneStatus::apply_report`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroneStatus {
    Idle,
    OnMission,
    Disconnected,
}

impl DroneStatus {
    /// Apply a client-reported status ("idle"/"busy") to the current
    /// server-side status, honoring the non-demotion rule: a drone
    /// reporting idle while the server still has it ON_MISSION does not
    /// get demoted to IDLE. Only MISSION_COMPLETE may do that (see the
    /// session's handling of that message, not this function).
    pub fn apply_report(self, reported_idle: bool) -> Self {
        match self {
            DroneStatus::OnMission => DroneStatus::OnMission,
            DroneStatus::Disconnected => DroneStatus::Disconnected,
            DroneStatus::Idle => {
                if reported_idle {
                    DroneStatus::Idle
                } else {
                    DroneStatus::OnMission
                }
            }
        }
    }
}

/// Lifecycle of a single incident (survivor report).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Waiting,
    Assigned,
    Helped,
}

/// A survivor incident: the unit of work dispatched to a drone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub coord: Coord,
    pub info: String,
    pub discovery_time: DateTime<Utc>,
    pub status: IncidentStatus,
}

impl Incident {
    pub fn new(coord: Coord, info: impl Into<String>, discovery_time: DateTime<Utc>) -> Self {
        Self {
            coord,
            info: info.into(),
            discovery_time,
            status: IncidentStatus::Waiting,
        }
    }
}

/// Server coordination parameters. Produced externally (the reference
/// implementation reads them from the environment, see
/// `rescue_server::config::Config`) - the core never reads the
/// environment itself.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub port: u16,
    pub max_drones: usize,
    pub map_width: i32,
    pub map_height: i32,
    pub survivor_spawn_rate_s: u64,
    pub drone_speed: u32,
    pub status_update_interval_s: u64,
    pub heartbeat_interval_s: u64,
    pub heartbeat_miss_threshold: u32,
    pub reconnect_grace_s: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 2100,
            max_drones: 64,
            map_width: 100,
            map_height: 100,
            survivor_spawn_rate_s: 5,
            drone_speed: 1,
            status_update_interval_s: 5,
            heartbeat_interval_s: 10,
            heartbeat_miss_threshold: 3,
            reconnect_grace_s: 25,
        }
    }
}

/// Parse a drone's textual id into the numeric id used for tie-breaking in
/// nearest-drone selection. Strips one leading `D`/`d` if present.
///
/// `"D7"` -> `7`, `"d12"` -> `12`, `"42"` -> `42`. Anything else that
/// doesn't parse as an integer after stripping falls back to `0`, so a
/// malformed id never panics the dispatcher - it just loses the tie-break.
pub fn parse_drone_numeric_id(drone_id: &str) -> u64 {
    let trimmed = drone_id.trim();
    let rest = trimmed
        .strip_prefix('D')
        .or_else(|| trimmed.strip_prefix('d'))
        .unwrap_or(trimmed);
    rest.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manhattan_distance_basic() {
        assert_eq!(manhattan_distance(Coord::new(0, 0), Coord::new(3, 4)), 7);
        assert_eq!(manhattan_distance(Coord::new(10, 10), Coord::new(9, 9)), 2);
        assert_eq!(manhattan_distance(Coord::new(5, 5), Coord::new(5, 5)), 0);
    }

    #[test]
    fn coord_clamps_into_map() {
        let c = Coord::new(-5, 200).clamped(20, 20);
        assert_eq!(c, Coord::new(0, 19));
    }

    #[test]
    fn non_demotion_rule_keeps_on_mission() {
        let status = DroneStatus::OnMission;
        assert_eq!(status.apply_report(true), DroneStatus::OnMission);
    }

    #[test]
    fn idle_report_keeps_idle_status() {
        let status = DroneStatus::Idle;
        assert_eq!(status.apply_report(true), DroneStatus::Idle);
    }

    #[test]
    fn drone_id_parsing_strips_prefix() {
        assert_eq!(parse_drone_numeric_id("D7"), 7);
        assert_eq!(parse_drone_numeric_id("d12"), 12);
        assert_eq!(parse_drone_numeric_id("42"), 42);
        assert_eq!(parse_drone_numeric_id("bogus"), 0);
    }
}
