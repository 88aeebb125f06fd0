//! Per-connection state machine (C5).
//!
//! Each accepted TCP connection runs one `ConnectionSession` to completion.
//! `AwaitingHandshake -> Steady -> disconnect`; a later reconnect under the
//! same `drone_id` picks the existing [`DroneRecord`] back up rather than
//! creating a new one, which is how a drone survives a blip without losing
//! its in-flight mission.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use rescue_core::{Coord, DroneStatus};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use rescue_core::codec::{self, HandshakeConfig, Message, ERROR_BAD_REQUEST, ERROR_FRAME_TOO_LARGE, MAX_FRAME_BYTES};
use crate::incident_queue::SharedIncidentQueue;
use crate::liveness::FleetActivity;
use crate::registry::DroneRegistry;

pub struct ConnectionSession {
    session_id: String,
    peer: String,
    registry: Arc<DroneRegistry>,
    incidents: SharedIncidentQueue,
    activity: Arc<FleetActivity>,
    status_update_interval_s: u64,
    heartbeat_interval_s: u64,
}

/// A send handle shared between the read loop and the writer task. The
/// spec requires a single-writer-at-a-time discipline per connection; this
/// mutex is that discipline.
type FramedWriter = Arc<Mutex<futures::stream::SplitSink<Framed<TcpStream, LinesCodec>, String>>>;

impl ConnectionSession {
    pub fn new(
        peer: String,
        registry: Arc<DroneRegistry>,
        incidents: SharedIncidentQueue,
        activity: Arc<FleetActivity>,
        status_update_interval_s: u64,
        heartbeat_interval_s: u64,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            peer,
            registry,
            incidents,
            activity,
            status_update_interval_s,
            heartbeat_interval_s,
        }
    }

    pub async fn run(self, stream: TcpStream) {
        let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
        let (writer, mut reader) = framed.split();
        let writer: FramedWriter = Arc::new(Mutex::new(writer));

        let drone_id = match self.await_handshake(&mut reader, &writer).await {
            Some(id) => id,
            None => return,
        };

        let record = match self.registry.lookup(&drone_id).await {
            Some(record) => record,
            None => {
                warn!(target: "server", drone_id = %drone_id, "record vanished right after handshake");
                return;
            }
        };

        let (outbox_tx, mut outbox_rx) = mpsc::channel::<Message>(32);
        {
            let mut inner = record.lock().await;
            inner.outbox = Some(outbox_tx);
            inner.disconnect_grace_started = None;
            inner.last_seen = Utc::now();
        }

        let writer_task_writer = writer.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = outbox_rx.recv().await {
                if let Ok(line) = codec::encode(&msg) {
                    let line = line.trim_end_matches('\n').to_string();
                    let mut sink = writer_task_writer.lock().await;
                    if sink.send(line).await.is_err() {
                        break;
                    }
                }
            }
        });

        info!(target: "server", drone_id = %drone_id, session_id = %self.session_id, peer = %self.peer, "session entered steady state");

        loop {
            let line = match tokio::time::timeout(
                Duration::from_secs(self.heartbeat_interval_s.saturating_mul(3).max(5)),
                reader.next(),
            )
            .await
            {
                Ok(Some(Ok(line))) => line,
                Ok(Some(Err(err))) => {
                    self.handle_frame_error(err, &writer).await;
                    break;
                }
                Ok(None) => {
                    debug!(target: "server", drone_id = %drone_id, "connection closed by peer");
                    break;
                }
                Err(_) => {
                    warn!(target: "server", drone_id = %drone_id, "read timed out, treating as disconnect");
                    break;
                }
            };

            match codec::decode(&line) {
                Ok(message) => {
                    self.activity.touch();
                    self.handle_message(&drone_id, message, &record, &writer).await;
                }
                Err(err) => {
                    warn!(target: "server", drone_id = %drone_id, error = %err, "malformed message");
                    self.send(&writer, Message::error(ERROR_BAD_REQUEST, err.to_string()))
                        .await;
                }
            }
        }

        writer_task.abort();
        let mut inner = record.lock().await;
        inner.outbox = None;
        inner.disconnect_grace_started = Some(Utc::now());
        info!(target: "server", drone_id = %drone_id, session_id = %self.session_id, "session disconnected, entering reconnect grace");
    }

    async fn await_handshake(
        &self,
        reader: &mut futures::stream::SplitStream<Framed<TcpStream, LinesCodec>>,
        writer: &FramedWriter,
    ) -> Option<String> {
        let line = match tokio::time::timeout(Duration::from_secs(10), reader.next()).await {
            Ok(Some(Ok(line))) => line,
            _ => {
                debug!(target: "server", peer = %self.peer, "no handshake received, dropping connection");
                return None;
            }
        };

        let decoded = codec::decode(&line);
        if decoded.is_ok() {
            self.activity.touch();
        }
        let (drone_id, _capabilities) = match decoded {
            Ok(Message::Handshake {
                drone_id,
                capabilities,
            }) => (drone_id, capabilities),
            Ok(other) => {
                self.send(
                    writer,
                    Message::error(ERROR_BAD_REQUEST, format!("expected HANDSHAKE, got {}", other.kind())),
                )
                .await;
                return None;
            }
            Err(err) => {
                self.send(writer, Message::error(ERROR_BAD_REQUEST, err.to_string()))
                    .await;
                return None;
            }
        };

        let origin = Coord::new(0, 0);
        match self.registry.register(&drone_id, origin).await {
            Ok(_) => {}
            Err(err) => {
                self.send(writer, Message::error(ERROR_BAD_REQUEST, err.to_string()))
                    .await;
                return None;
            }
        }

        let ack = Message::HandshakeAck {
            session_id: self.session_id.clone(),
            config: HandshakeConfig {
                status_update_interval: self.status_update_interval_s,
                heartbeat_interval: self.heartbeat_interval_s,
            },
        };
        self.send(writer, ack).await;
        Some(drone_id)
    }

    async fn handle_message(
        &self,
        drone_id: &str,
        message: Message,
        record: &crate::registry::DroneRecord,
        writer: &FramedWriter,
    ) {
        match message {
            Message::StatusUpdate {
                location,
                status,
                battery,
                speed,
                ..
            } => {
                let mut inner = record.lock().await;
                inner.location = location;
                inner.battery = battery;
                inner.speed = speed;
                inner.status = inner.status.apply_report(status.is_idle());
                inner.last_seen = Utc::now();
            }
            Message::MissionComplete {
                mission_id,
                success,
                ..
            } => {
                let mut inner = record.lock().await;
                let completed_incident = if inner.current_mission_id == Some(mission_id) {
                    inner.current_mission_id = None;
                    inner.status = DroneStatus::Idle;
                    inner.current_incident.take()
                } else {
                    None
                };
                inner.last_seen = Utc::now();
                drop(inner);
                if let Some(incident) = completed_incident {
                    if success {
                        self.incidents.mark_helped(&incident).await;
                    }
                }
                info!(target: "server", drone_id = %drone_id, mission_id, success, "mission complete");
            }
            Message::HeartbeatResponse { .. } => {
                let mut inner = record.lock().await;
                inner.missed_heartbeats = 0;
                inner.last_seen = Utc::now();
            }
            Message::Heartbeat { .. } => {
                let mut inner = record.lock().await;
                inner.last_seen = Utc::now();
                drop(inner);
                self.send(
                    writer,
                    Message::HeartbeatResponse {
                        drone_id: drone_id.to_string(),
                        timestamp: Utc::now(),
                    },
                )
                .await;
            }
            other => {
                warn!(target: "server", drone_id = %drone_id, kind = other.kind(), "unexpected message in steady state");
                self.send(
                    writer,
                    Message::error(ERROR_BAD_REQUEST, format!("unexpected {} in steady state", other.kind())),
                )
                .await;
            }
        }
    }

    async fn handle_frame_error(&self, err: LinesCodecError, writer: &FramedWriter) {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                warn!(target: "server", peer = %self.peer, "frame exceeded max length");
                self.send(writer, Message::error(ERROR_FRAME_TOO_LARGE, "frame too large")).await;
            }
            LinesCodecError::Io(io_err) => {
                debug!(target: "server", peer = %self.peer, error = %io_err, "connection io error");
            }
        }
    }

    async fn send(&self, writer: &FramedWriter, message: Message) {
        if let Ok(line) = codec::encode(&message) {
            let line = line.trim_end_matches('\n').to_string();
            let mut sink = writer.lock().await;
            let _ = sink.send(line).await;
        }
    }
}
