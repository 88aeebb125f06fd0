//! Reference drone agent (C8): connects to a rescue server, handshakes,
//! then runs a communication task (reads assignments and heartbeats) and a
//! movement task (steps toward the current mission target and reports
//! status) side by side, the way `rescue-server`'s session splits its
//! reader loop from its writer task.

pub mod agent;

pub use agent::{AgentConfig, DroneAgent};
