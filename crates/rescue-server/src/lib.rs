//! Emergency drone coordination server.
//!
//! Wires together the fleet registry (C2), incident queue (C3), wire codec
//! (C4), per-connection sessions (C5), the dispatcher (C6) and the liveness
//! monitor (C7) behind a plain TCP accept loop (C9, in `main.rs`).

pub mod config;
pub mod dispatcher;
pub mod incident_queue;
pub mod liveness;
pub mod registry;
pub mod session;
pub mod spawner;

use std::sync::Arc;

use rescue_core::ServerConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

use dispatcher::Dispatcher;
use incident_queue::IncidentQueue;
use liveness::{FleetActivity, LivenessMonitor};
use registry::DroneRegistry;
use session::ConnectionSession;
use spawner::SurvivorSpawner;

/// Everything the running server needs, bundled so `main.rs` can hand it to
/// the accept loop and the background tasks alike.
pub struct Server {
    pub config: ServerConfig,
    pub registry: Arc<DroneRegistry>,
    pub incidents: Arc<IncidentQueue>,
    pub dispatcher: Arc<Dispatcher>,
    pub liveness: Arc<LivenessMonitor>,
    pub spawner: Arc<SurvivorSpawner>,
    pub activity: Arc<FleetActivity>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(DroneRegistry::new(config.max_drones));
        let incidents = Arc::new(IncidentQueue::new(config.max_drones.saturating_mul(4).max(64)));
        let activity = FleetActivity::new();
        let mission_ttl_s = (config.heartbeat_interval_s * config.heartbeat_miss_threshold as u64).max(30) as i64;
        let dispatcher = Dispatcher::new(registry.clone(), incidents.clone(), mission_ttl_s);
        let liveness = LivenessMonitor::new(
            registry.clone(),
            incidents.clone(),
            activity.clone(),
            config.heartbeat_interval_s,
            config.heartbeat_miss_threshold,
            config.reconnect_grace_s,
        );
        let spawner = SurvivorSpawner::new(
            incidents.clone(),
            config.map_width,
            config.map_height,
            config.survivor_spawn_rate_s,
        );
        Self {
            config,
            registry,
            incidents,
            dispatcher,
            liveness,
            spawner,
            activity,
        }
    }

    /// Run the accept loop and background tasks until `shutdown` fires.
    /// Each background task is supervised the way `spawn_supervised_loop`
    /// does in the reference main: if it returns or panics before shutdown,
    /// it is logged and restarted rather than silently dropped.
    pub async fn run(self: Arc<Self>, shutdown: broadcast::Sender<()>) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(target: "server", %addr, "listening for drone connections");
        self.serve(listener, shutdown).await
    }

    /// Like [`Server::run`], but takes an already-bound listener. Lets
    /// tests bind to an ephemeral port and read back the chosen address
    /// before the accept loop starts.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: broadcast::Sender<()>) -> anyhow::Result<()> {
        spawn_supervised_loop("dispatcher", shutdown.clone(), {
            let dispatcher = self.dispatcher.clone();
            move |rx| {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.run(rx).await }
            }
        });
        spawn_supervised_loop("liveness", shutdown.clone(), {
            let liveness = self.liveness.clone();
            let watchdog_tx = shutdown.clone();
            move |rx| {
                let liveness = liveness.clone();
                let watchdog_tx = watchdog_tx.clone();
                async move { liveness.run(rx, watchdog_tx).await }
            }
        });
        spawn_supervised_loop("survivor-spawner", shutdown.clone(), {
            let spawner = self.spawner.clone();
            move |rx| {
                let spawner = spawner.clone();
                async move { spawner.run(rx).await }
            }
        });

        let mut shutdown_rx = shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(target: "server", "accept loop shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            error!(target: "server", error = %err, "accept failed");
                            continue;
                        }
                    };
                    let session = ConnectionSession::new(
                        peer.to_string(),
                        self.registry.clone(),
                        self.incidents.clone(),
                        self.activity.clone(),
                        self.config.status_update_interval_s,
                        self.config.heartbeat_interval_s,
                    );
                    tokio::spawn(async move {
                        session.run(stream).await;
                    });
                }
            }
        }
    }
}

/// Spawn a background loop, restarting it if it returns or panics before
/// `shutdown` fires. Mirrors the teacher binary's supervised-task pattern.
fn spawn_supervised_loop<F, Fut>(name: &'static str, shutdown: broadcast::Sender<()>, make_future: F)
where
    F: Fn(broadcast::Receiver<()>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let rx = shutdown.subscribe();
            match tokio::spawn(make_future(rx)).await {
                Ok(()) => {
                    // A clean return means the task observed shutdown itself.
                    info!(target: "server", task = name, "background task exited");
                    break;
                }
                Err(join_err) if join_err.is_panic() => {
                    error!(target: "server", task = name, "background task panicked, restarting");
                }
                Err(_) => break,
            }
        }
    });
}
