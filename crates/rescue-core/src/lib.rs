//! Rescue Core - shared data model and concurrency primitives for the drone
//! rescue coordinator.
//!
//! This crate has NO networking dependencies: it is the pure logic and the
//! bounded containers that both the server and the drone agent build on.

pub mod bounded_list;
pub mod codec;
pub mod models;

pub use bounded_list::{BoundedList, BoundedListError, Handle};
pub use models::{
    manhattan_distance, parse_drone_numeric_id, Coord, DroneStatus, Incident, IncidentStatus,
    ServerConfig,
};
