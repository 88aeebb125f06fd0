//! Spins up several reference drone agents against a running rescue-server,
//! scattered at random starting positions. Useful for watching dispatch and
//! reassignment behavior end to end without hand-rolling a fleet.

use clap::Parser;
use rand::Rng;
use rescue_agent::{AgentConfig, DroneAgent};
use rescue_core::Coord;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Run a small fleet of reference drone agents against a rescue-server instance")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:2100")]
    server: String,

    #[arg(long, default_value_t = 5)]
    drones: u32,

    #[arg(long, default_value_t = 100)]
    map_width: i32,
    #[arg(long, default_value_t = 100)]
    map_height: i32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut handles = Vec::new();

    for i in 0..args.drones {
        let mut rng = rand::rng();
        let start = Coord::new(
            rng.random_range(0..args.map_width.max(1)),
            rng.random_range(0..args.map_height.max(1)),
        );
        let agent = DroneAgent::new(AgentConfig {
            drone_id: format!("D{i}"),
            server_addr: args.server.clone(),
            start,
            max_speed: 2.0,
            battery_capacity: 100.0,
            payload: 1.0,
        });
        info!(drone_id = format!("D{i}"), start = ?start, "launching demo drone");
        handles.push(tokio::spawn(async move { agent.run().await }));
    }

    for handle in handles {
        if let Err(err) = handle.await {
            error!(error = %err, "demo drone task panicked");
        }
    }
    Ok(())
}
