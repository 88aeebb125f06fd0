//! Liveness monitoring (C7): heartbeat sender, heartbeat checker,
//! transport-disconnect-grace eviction, and the fleet-wide watchdog.
//!
//! Runs on a single tick every `heartbeat_interval_s`. Each tick it sends a
//! `HEARTBEAT` to every connected drone and bumps its miss counter; a
//! `HEARTBEAT_RESPONSE` (handled in [`crate::session`]) resets that counter
//! back to zero. A drone that misses `heartbeat_miss_threshold` in a row is
//! evicted immediately - any incident it was holding is requeued onto the
//! priority lane in the same step. The reconnect grace window is reserved
//! for the transport-disconnect path (a session's read loop exiting, see
//! [`crate::session`]): that path alone sets `disconnect_grace_started`,
//! and `evict_expired` here reaps it once the grace period elapses with no
//! reconnect. Each tick also checks [`FleetActivity`]: if no valid frame has
//! been received from any drone in `WATCHDOG_TIMEOUT_S`, the monitor fires
//! the shutdown broadcast itself and stops.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rescue_core::DroneStatus;
use tokio::sync::broadcast;
use tracing::{info, warn};

use rescue_core::codec::Message;
use crate::incident_queue::SharedIncidentQueue;
use crate::registry::DroneRegistry;

/// 60 s with no valid frame from any drone shuts the supervisor down.
const WATCHDOG_TIMEOUT_S: i64 = 60;

/// Fleet-wide "last valid frame received from any drone" clock. One
/// instance is shared between every [`crate::session::ConnectionSession`]
/// (which calls [`FleetActivity::touch`] on each successfully decoded
/// frame) and the [`LivenessMonitor`] watchdog check.
pub struct FleetActivity {
    last_frame_unix_s: AtomicI64,
}

impl FleetActivity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            last_frame_unix_s: AtomicI64::new(Utc::now().timestamp()),
        })
    }

    pub fn touch(&self) {
        self.last_frame_unix_s.store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    fn idle_for_secs(&self) -> i64 {
        Utc::now().timestamp() - self.last_frame_unix_s.load(Ordering::Relaxed)
    }
}

pub struct LivenessMonitor {
    registry: Arc<DroneRegistry>,
    incidents: SharedIncidentQueue,
    activity: Arc<FleetActivity>,
    heartbeat_interval_s: u64,
    miss_threshold: u32,
    reconnect_grace_s: i64,
}

impl LivenessMonitor {
    pub fn new(
        registry: Arc<DroneRegistry>,
        incidents: SharedIncidentQueue,
        activity: Arc<FleetActivity>,
        heartbeat_interval_s: u64,
        miss_threshold: u32,
        reconnect_grace_s: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            incidents,
            activity,
            heartbeat_interval_s,
            miss_threshold,
            reconnect_grace_s: reconnect_grace_s as i64,
        })
    }

    /// `shutdown_tx` is used only to fire the watchdog; `shutdown_rx` is
    /// what tells this loop to stop (either because the watchdog fired or
    /// because something else - SIGTERM, a test - did).
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>, shutdown_tx: broadcast::Sender<()>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.heartbeat_interval_s.max(1)));
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(target: "server", "liveness monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.send_heartbeats().await;
                    self.evict_expired().await;
                    let idle_s = self.activity.idle_for_secs();
                    if idle_s >= WATCHDOG_TIMEOUT_S {
                        warn!(target: "server", idle_s, "watchdog: no inbound drone traffic, shutting down");
                        let _ = shutdown_tx.send(());
                        break;
                    }
                }
            }
        }
    }

    async fn send_heartbeats(&self) {
        for record in self.registry.snapshot().await {
            let mut inner = record.lock().await;
            let Some(outbox) = inner.outbox.clone() else {
                continue;
            };
            inner.missed_heartbeats += 1;
            let drone_id = inner.drone_id.clone();
            let missed = inner.missed_heartbeats;
            drop(inner);

            if outbox
                .send(Message::Heartbeat { timestamp: Utc::now() })
                .await
                .is_err()
            {
                warn!(target: "server", drone_id = %drone_id, "heartbeat send failed, outbox closed");
                continue;
            }
            if missed >= self.miss_threshold {
                self.evict_on_heartbeat_timeout(&drone_id).await;
            }
        }
    }

    /// A drone that misses `miss_threshold` heartbeats in a row is evicted
    /// on the spot, not after a grace window - the grace window is only for
    /// a dropped TCP connection, where a reconnect under the same id is
    /// still plausible.
    async fn evict_on_heartbeat_timeout(&self, drone_id: &str) {
        let Some(record) = self.registry.lookup(drone_id).await else {
            return;
        };
        let mut inner = record.lock().await;
        inner.outbox = None;
        let orphaned_incident = inner.current_incident.take();
        inner.status = DroneStatus::Disconnected;
        drop(inner);

        self.registry.evict(drone_id).await;
        warn!(target: "server", drone_id = %drone_id, threshold = self.miss_threshold, "missed heartbeat threshold, evicting drone");

        if let Some(mut incident) = orphaned_incident {
            incident.status = rescue_core::IncidentStatus::Waiting;
            if let Err(err) = self.incidents.requeue_orphaned(incident).await {
                warn!(target: "server", drone_id = %drone_id, error = %err, "failed to requeue orphaned incident");
            }
        }
    }

    /// Reaps drones stuck in a transport-disconnect grace window (set only
    /// by [`crate::session`] when a connection's read loop exits). Heartbeat
    /// timeouts never go through this path - they evict immediately in
    /// [`Self::evict_on_heartbeat_timeout`].
    async fn evict_expired(&self) {
        let now = Utc::now();
        for record in self.registry.snapshot().await {
            let mut inner = record.lock().await;
            let Some(started) = inner.disconnect_grace_started else {
                continue;
            };
            if (now - started).num_seconds() < self.reconnect_grace_s {
                continue;
            }
            let drone_id = inner.drone_id.clone();
            let orphaned_incident = inner.current_incident.take();
            inner.status = DroneStatus::Disconnected;
            drop(inner);

            self.registry.evict(&drone_id).await;
            info!(target: "server", drone_id = %drone_id, grace_s = self.reconnect_grace_s, "reconnect grace expired, evicting drone");

            if let Some(mut incident) = orphaned_incident {
                incident.status = rescue_core::IncidentStatus::Waiting;
                if let Err(err) = self.incidents.requeue_orphaned(incident).await {
                    warn!(target: "server", drone_id = %drone_id, error = %err, "failed to requeue orphaned incident");
                }
            }
        }
    }
}
