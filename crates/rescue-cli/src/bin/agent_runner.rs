//! Runs a single reference drone agent against a rescue server.

use clap::Parser;
use rescue_agent::{AgentConfig, DroneAgent};
use rescue_core::Coord;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Connect one drone agent to a rescue-server instance")]
struct Args {
    /// Drone id sent in the handshake, e.g. "D7".
    #[arg(long)]
    drone_id: String,

    /// Server address, e.g. "127.0.0.1:2100".
    #[arg(long, default_value = "127.0.0.1:2100")]
    server: String,

    #[arg(long, default_value_t = 0)]
    start_x: i32,
    #[arg(long, default_value_t = 0)]
    start_y: i32,
    #[arg(long, default_value_t = 2.0)]
    max_speed: f64,
    #[arg(long, default_value_t = 100.0)]
    battery_capacity: f64,
    #[arg(long, default_value_t = 1.0)]
    payload: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let agent = DroneAgent::new(AgentConfig {
        drone_id: args.drone_id,
        server_addr: args.server,
        start: Coord::new(args.start_x, args.start_y),
        max_speed: args.max_speed,
        battery_capacity: args.battery_capacity,
        payload: args.payload,
    });
    agent.run().await
}
