//! The drone fleet registry (C2).
//!
//! One [`DroneRecord`] per known drone, keyed by its textual id. Lock
//! ordering is mandatory and matches the rest of the server: registry lock
//! -> record lock -> (elsewhere) list lock. No task may hold a record lock
//! while doing network I/O.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rescue_core::{Coord, DroneStatus, Incident};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};

use rescue_core::codec::Message;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("fleet is at capacity ({max_drones} drones)")]
    Full { max_drones: usize },
}

/// Everything the server tracks about one drone. Cheap to clone (an `Arc`),
/// expensive to lock for long - keep critical sections short.
#[derive(Clone)]
pub struct DroneRecord(Arc<Mutex<DroneRecordInner>>);

pub struct DroneRecordInner {
    pub drone_id: String,
    pub status: DroneStatus,
    pub location: Coord,
    pub battery: f64,
    pub speed: f64,
    pub last_seen: DateTime<Utc>,
    pub missed_heartbeats: u32,
    pub current_mission_id: Option<u64>,
    /// The incident behind `current_mission_id`, kept so an eviction mid
    /// mission can requeue it instead of losing the survivor report.
    pub current_incident: Option<Incident>,
    /// Set while the connection is down but within the reconnect grace
    /// period; `None` means either connected, or evicted outright.
    pub disconnect_grace_started: Option<DateTime<Utc>>,
    /// Outbound channel to this drone's connection session, if currently
    /// connected. `None` while disconnected.
    pub outbox: Option<mpsc::Sender<Message>>,
}

impl DroneRecord {
    fn new(drone_id: String, location: Coord) -> Self {
        Self(Arc::new(Mutex::new(DroneRecordInner {
            drone_id,
            status: DroneStatus::Idle,
            location,
            battery: 100.0,
            speed: 1.0,
            last_seen: Utc::now(),
            missed_heartbeats: 0,
            current_mission_id: None,
            current_incident: None,
            disconnect_grace_started: None,
            outbox: None,
        })))
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, DroneRecordInner> {
        self.0.lock().await
    }
}

/// The fleet-wide registry. `drones` is behind its own lock (the
/// "registry lock"); each `DroneRecord` carries its own lock (the "record
/// lock"), acquired only after the registry lock that handed it out has
/// been released, per the mandated lock order.
///
/// Deliberately a `RwLock<HashMap<..>>` rather than routing through
/// `BoundedList` (see `incident_queue`): registry lookup is keyed by
/// `drone_id` and happens on every inbound frame, so a map gives O(1)
/// lookup where a list would mean a linear scan per message. Capacity is
/// still bounded at `max_drones`, same as the list-backed queue - see
/// `register` below. Documented here rather than converted, per review.
pub struct DroneRegistry {
    drones: RwLock<HashMap<String, DroneRecord>>,
    max_drones: usize,
}

impl DroneRegistry {
    pub fn new(max_drones: usize) -> Self {
        Self {
            drones: RwLock::new(HashMap::new()),
            max_drones,
        }
    }

    /// Register a brand-new drone, or return the existing record if the id
    /// is already known (a reconnect uses [`DroneRegistry::lookup`]
    /// instead, but registering twice is harmless and idempotent).
    pub async fn register(
        &self,
        drone_id: &str,
        location: Coord,
    ) -> Result<DroneRecord, RegistryError> {
        let mut drones = self.drones.write().await;
        if let Some(existing) = drones.get(drone_id) {
            return Ok(existing.clone());
        }
        if drones.len() >= self.max_drones {
            return Err(RegistryError::Full {
                max_drones: self.max_drones,
            });
        }
        let record = DroneRecord::new(drone_id.to_string(), location);
        drones.insert(drone_id.to_string(), record.clone());
        Ok(record)
    }

    pub async fn lookup(&self, drone_id: &str) -> Option<DroneRecord> {
        self.drones.read().await.get(drone_id).cloned()
    }

    pub async fn evict(&self, drone_id: &str) -> Option<DroneRecord> {
        self.drones.write().await.remove(drone_id)
    }

    pub async fn len(&self) -> usize {
        self.drones.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot the current records. Used by the liveness monitor and the
    /// dispatcher's nearest-drone scan; never holds the registry lock while
    /// touching a record lock, or while doing I/O.
    pub async fn snapshot(&self) -> Vec<DroneRecord> {
        self.drones.read().await.values().cloned().collect()
    }
}
