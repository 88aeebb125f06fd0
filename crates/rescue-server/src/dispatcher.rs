//! Incident dispatch (C6).
//!
//! One task drains [`IncidentQueue::pop_for_dispatch`] and assigns each
//! incident to the nearest idle drone (Manhattan distance, lowest numeric
//! id breaking ties). When no drone is idle, the incident goes back onto
//! the priority queue after a short backoff rather than spinning hot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use rescue_core::{manhattan_distance, parse_drone_numeric_id, Coord, DroneStatus, Incident};
use tokio::sync::broadcast;
use tracing::{info, warn};

use rescue_core::codec::Message;
use crate::incident_queue::SharedIncidentQueue;
use crate::registry::{DroneRecord, DroneRegistry};

const NO_IDLE_DRONE_BACKOFF: Duration = Duration::from_secs(1);

pub struct Dispatcher {
    registry: Arc<DroneRegistry>,
    incidents: SharedIncidentQueue,
    mission_ttl_s: i64,
    next_mission_id: AtomicU64,
    dispatched_total: AtomicU64,
    requeued_total: AtomicU64,
    /// Cumulative `now - discovery_time` (milliseconds) across every
    /// assignment, alongside `dispatched_total`, for an average-wait stat.
    total_wait_ms: AtomicU64,
}

struct Candidate {
    record: DroneRecord,
    distance: i64,
    numeric_id: u64,
    location: Coord,
}

impl Dispatcher {
    pub fn new(registry: Arc<DroneRegistry>, incidents: SharedIncidentQueue, mission_ttl_s: i64) -> Arc<Self> {
        Arc::new(Self {
            registry,
            incidents,
            mission_ttl_s,
            next_mission_id: AtomicU64::new(1),
            dispatched_total: AtomicU64::new(0),
            requeued_total: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
        })
    }

    /// `(dispatched_total, requeued_total, total_wait_ms)`. Average wait is
    /// `total_wait_ms / dispatched_total`.
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.dispatched_total.load(Ordering::Relaxed),
            self.requeued_total.load(Ordering::Relaxed),
            self.total_wait_ms.load(Ordering::Relaxed),
        )
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(target: "server", "dispatcher shutting down");
                    break;
                }
                incident = self.incidents.pop_for_dispatch() => {
                    self.dispatch_one(incident).await;
                }
            }
        }
    }

    async fn dispatch_one(&self, incident: Incident) {
        loop {
            match self.assign_to_nearest(&incident).await {
                Ok(()) => {
                    self.dispatched_total.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(incident_back) => {
                    self.requeued_total.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(NO_IDLE_DRONE_BACKOFF).await;
                    if let Err(err) = self.incidents.requeue_orphaned(incident_back).await {
                        warn!(target: "server", error = %err, "failed to requeue incident awaiting an idle drone");
                        return;
                    }
                    return;
                }
            }
        }
    }

    /// Scan the fleet for idle drones, ranked nearest-first with the lowest
    /// numeric drone id breaking ties, and try each in turn until one
    /// accepts the mission. Returns the incident back (unmodified) if no
    /// drone could be reached.
    async fn assign_to_nearest(&self, incident: &Incident) -> Result<(), Incident> {
        let mut candidates = Vec::new();
        for record in self.registry.snapshot().await {
            let inner = record.lock().await;
            if inner.status == DroneStatus::Idle && inner.outbox.is_some() {
                candidates.push(Candidate {
                    record: record.clone(),
                    distance: manhattan_distance(inner.location, incident.coord),
                    numeric_id: parse_drone_numeric_id(&inner.drone_id),
                    location: inner.location,
                });
            }
        }
        candidates.sort_by(|a, b| a.distance.cmp(&b.distance).then(a.numeric_id.cmp(&b.numeric_id)));

        for candidate in candidates {
            if self.try_assign(&candidate, incident).await {
                return Ok(());
            }
        }
        Err(incident.clone())
    }

    async fn try_assign(&self, candidate: &Candidate, incident: &Incident) -> bool {
        let mission_id = self.next_mission_id.fetch_add(1, Ordering::Relaxed);
        let expiry = Utc::now() + ChronoDuration::seconds(self.mission_ttl_s);
        let checksum = mission_checksum(mission_id, incident.coord);

        let message = Message::AssignMission {
            mission_id,
            priority: "medium".to_string(),
            target: incident.coord,
            expiry,
            checksum,
        };

        let mut inner = candidate.record.lock().await;
        let Some(outbox) = inner.outbox.clone() else {
            return false;
        };
        drop(inner);

        if outbox.send(message).await.is_err() {
            return false;
        }

        let mut inner = candidate.record.lock().await;
        inner.status = DroneStatus::OnMission;
        inner.current_mission_id = Some(mission_id);
        inner.current_incident = Some(incident.clone());
        let drone_id = inner.drone_id.clone();
        drop(inner);

        let wait_ms = (Utc::now() - incident.discovery_time).num_milliseconds().max(0) as u64;
        self.total_wait_ms.fetch_add(wait_ms, Ordering::Relaxed);

        info!(
            target: "server",
            drone_id = %drone_id,
            mission_id,
            distance = candidate.distance,
            drone_location = ?candidate.location,
            target = ?incident.coord,
            "assigned mission"
        );
        true
    }
}

/// A cheap, deterministic integrity token for an assignment. Not
/// cryptographic - just enough for a drone to notice a corrupted or replayed
/// assignment.
fn mission_checksum(mission_id: u64, target: Coord) -> String {
    let mixed = mission_id
        ^ ((target.x as u64) << 16)
        ^ (target.y as u64);
    format!("{mixed:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic() {
        assert_eq!(mission_checksum(7, Coord::new(3, 4)), mission_checksum(7, Coord::new(3, 4)));
    }

    #[test]
    fn checksum_differs_by_target() {
        assert_ne!(mission_checksum(7, Coord::new(3, 4)), mission_checksum(7, Coord::new(3, 5)));
    }
}
