//! Survivor spawner: generates incidents at `survivor_spawn_rate_s` and
//! pushes them onto the incident queue's normal lane. Mirrors the teacher's
//! periodic `tokio::select! { shutdown ... ticker.tick() ... }` background
//! loop shape (see its mission loop).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rescue_core::{Coord, Incident};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::incident_queue::SharedIncidentQueue;

pub struct SurvivorSpawner {
    incidents: SharedIncidentQueue,
    map_width: i32,
    map_height: i32,
    spawn_rate_s: u64,
}

impl SurvivorSpawner {
    pub fn new(
        incidents: SharedIncidentQueue,
        map_width: i32,
        map_height: i32,
        spawn_rate_s: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            incidents,
            map_width,
            map_height,
            spawn_rate_s,
        })
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.spawn_rate_s.max(1)));
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(target: "server", "survivor spawner shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let incident = self.random_incident();
                    if let Err(err) = self.incidents.push_normal(incident).await {
                        warn!(target: "server", error = %err, "incident queue closed, dropping spawned survivor");
                    }
                }
            }
        }
    }

    fn random_incident(&self) -> Incident {
        let mut rng = rand::rng();
        let coord = Coord::new(
            rng.random_range(0..self.map_width.max(1)),
            rng.random_range(0..self.map_height.max(1)),
        );
        Incident::new(coord, "survivor reported", Utc::now())
    }
}
