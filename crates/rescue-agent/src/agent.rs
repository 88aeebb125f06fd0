use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use rescue_core::codec::{
    self, Capabilities, Message, ReportedStatus, MAX_FRAME_BYTES,
};
use rescue_core::Coord;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub drone_id: String,
    pub server_addr: String,
    pub start: Coord,
    pub max_speed: f64,
    pub battery_capacity: f64,
    pub payload: f64,
}

struct MissionState {
    mission_id: u64,
    target: Coord,
}

struct AgentState {
    location: Coord,
    battery: f64,
    mission: Option<MissionState>,
}

/// A running drone agent. Owns its connection's lifetime; `run` resolves
/// once the connection closes (normally only on a fatal I/O error - there
/// is no graceful stop request over the wire in this protocol).
pub struct DroneAgent {
    config: AgentConfig,
    state: Arc<Mutex<AgentState>>,
}

impl DroneAgent {
    pub fn new(config: AgentConfig) -> Self {
        let state = Arc::new(Mutex::new(AgentState {
            location: config.start,
            battery: config.battery_capacity,
            mission: None,
        }));
        Self { config, state }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let stream = TcpStream::connect(&self.config.server_addr).await?;
        let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
        let (mut writer, mut reader) = framed.split();

        writer
            .send(line(&Message::Handshake {
                drone_id: self.config.drone_id.clone(),
                capabilities: Capabilities {
                    max_speed: self.config.max_speed,
                    battery_capacity: self.config.battery_capacity,
                    payload: self.config.payload,
                },
            })?)
            .await?;

        let ack = match reader.next().await {
            Some(Ok(raw)) => codec::decode(&raw)?,
            Some(Err(err)) => anyhow::bail!("connection error awaiting handshake ack: {err}"),
            None => anyhow::bail!("server closed connection before handshake ack"),
        };
        let (status_update_interval_s, heartbeat_interval_s) = match ack {
            Message::HandshakeAck { config, .. } => {
                (config.status_update_interval, config.heartbeat_interval)
            }
            other => anyhow::bail!("expected HANDSHAKE_ACK, got {}", other.kind()),
        };

        info!(
            target: "drone",
            drone_id = %self.config.drone_id,
            status_update_interval_s,
            "handshake complete"
        );

        let (outbox_tx, mut outbox_rx) = mpsc::channel::<Message>(32);

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = outbox_rx.recv().await {
                if let Ok(encoded) = line(&msg) {
                    if writer.send(encoded).await.is_err() {
                        break;
                    }
                } else {
                    warn!(target: "drone", "failed to encode outgoing message");
                }
            }
        });

        // Initial report at (0,0) idle, before the movement task starts.
        send_status_update(&self.config, &self.state, &outbox_tx).await;

        let movement_task = tokio::spawn(run_movement(self.config.clone(), self.state.clone(), outbox_tx.clone()));

        let comm_result = run_communication(
            self.config.clone(),
            self.state.clone(),
            outbox_tx.clone(),
            &mut reader,
            heartbeat_interval_s,
        )
        .await;

        movement_task.abort();
        drop(outbox_tx);
        let _ = writer_task.await;
        comm_result
    }
}

fn line(msg: &Message) -> Result<String, rescue_core::codec::CodecError> {
    let encoded = codec::encode(msg)?;
    Ok(encoded.trim_end_matches('\n').to_string())
}

async fn run_communication(
    config: AgentConfig,
    state: Arc<Mutex<AgentState>>,
    outbox: mpsc::Sender<Message>,
    reader: &mut (impl futures::Stream<Item = Result<String, tokio_util::codec::LinesCodecError>> + Unpin),
    heartbeat_interval_s: u64,
) -> anyhow::Result<()> {
    loop {
        let timeout = tokio::time::timeout(
            Duration::from_secs(heartbeat_interval_s.saturating_mul(3).max(5)),
            reader.next(),
        )
        .await;
        let raw = match timeout {
            Ok(Some(Ok(raw))) => raw,
            Ok(Some(Err(err))) => anyhow::bail!("connection error: {err}"),
            Ok(None) => {
                info!(target: "drone", drone_id = %config.drone_id, "server closed connection");
                return Ok(());
            }
            Err(_) => anyhow::bail!("no message from server within heartbeat window"),
        };

        match codec::decode(&raw) {
            Ok(Message::AssignMission {
                mission_id, target, ..
            }) => {
                let mut guard = state.lock().await;
                guard.mission = Some(MissionState { mission_id, target });
                info!(target: "drone", drone_id = %config.drone_id, mission_id, target = ?target, "mission assigned");
            }
            Ok(Message::Heartbeat { .. }) => {
                let _ = outbox
                    .send(Message::HeartbeatResponse {
                        drone_id: config.drone_id.clone(),
                        timestamp: Utc::now(),
                    })
                    .await;
            }
            Ok(Message::Error { code, message, .. }) => {
                warn!(target: "drone", drone_id = %config.drone_id, code, message = %message, "server reported an error");
            }
            Ok(other) => {
                warn!(target: "drone", drone_id = %config.drone_id, kind = other.kind(), "unexpected message from server");
            }
            Err(err) => {
                warn!(target: "drone", drone_id = %config.drone_id, error = %err, "malformed message from server");
            }
        }
    }
}

async fn run_movement(config: AgentConfig, state: Arc<Mutex<AgentState>>, outbox: mpsc::Sender<Message>) {
    let mut move_ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        move_ticker.tick().await;
        step_toward_target(&config, &state, &outbox).await;
    }
}

/// Move one step: x first, then y, matching the dispatcher's Manhattan
/// metric and giving a deterministic, easy-to-assert trajectory for tests.
/// After the step, always reports `busy`; on arrival, also sends
/// `MISSION_COMPLETE` followed by an `idle` report, clearing the mission.
async fn step_toward_target(config: &AgentConfig, state: &Arc<Mutex<AgentState>>, outbox: &mpsc::Sender<Message>) {
    let mission = {
        let guard = state.lock().await;
        match &guard.mission {
            Some(mission) => (mission.mission_id, mission.target),
            None => return,
        }
    };
    let (mission_id, target) = mission;

    let arrived = {
        let mut guard = state.lock().await;
        let mut loc = guard.location;
        let speed = config.max_speed.max(1.0) as i32;
        if loc.x != target.x {
            let step = speed.min((target.x - loc.x).abs());
            loc.x += step * (target.x - loc.x).signum();
        } else if loc.y != target.y {
            let step = speed.min((target.y - loc.y).abs());
            loc.y += step * (target.y - loc.y).signum();
        }
        guard.location = loc;
        guard.battery = (guard.battery - 0.1).max(0.0);
        loc == target
    };

    // Mission is still set at this point even on the arrival step, so this
    // reports busy; the idle report follows MISSION_COMPLETE below.
    send_status_update(config, state, outbox).await;

    if arrived {
        {
            let mut guard = state.lock().await;
            guard.mission = None;
        }
        info!(target: "drone", drone_id = %config.drone_id, mission_id, "arrived at target");
        let _ = outbox
            .send(Message::MissionComplete {
                drone_id: config.drone_id.clone(),
                mission_id,
                timestamp: Utc::now(),
                success: true,
                details: "survivor reached".to_string(),
            })
            .await;
        send_status_update(config, state, outbox).await;
    }
}

async fn send_status_update(config: &AgentConfig, state: &Arc<Mutex<AgentState>>, outbox: &mpsc::Sender<Message>) {
    let guard = state.lock().await;
    let status = if guard.mission.is_some() {
        ReportedStatus::Busy
    } else {
        ReportedStatus::Idle
    };
    let message = Message::StatusUpdate {
        drone_id: config.drone_id.clone(),
        timestamp: Utc::now(),
        location: guard.location,
        status,
        battery: guard.battery,
        speed: config.max_speed,
    };
    drop(guard);
    let _ = outbox.send(message).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_config() -> AgentConfig {
        AgentConfig {
            drone_id: "D1".into(),
            server_addr: "127.0.0.1:0".into(),
            start: Coord::new(0, 0),
            max_speed: 2.0,
            battery_capacity: 100.0,
            payload: 1.0,
        }
    }

    #[tokio::test]
    async fn step_moves_x_before_y() {
        let config = test_config();
        let state = Arc::new(Mutex::new(AgentState {
            location: Coord::new(0, 0),
            battery: 100.0,
            mission: Some(MissionState {
                mission_id: 1,
                target: Coord::new(4, 4),
            }),
        }));
        let (tx, _rx) = mpsc::channel(8);

        step_toward_target(&config, &state, &tx).await;
        let loc = state.lock().await.location;
        assert_eq!(loc, Coord::new(2, 0));
    }

    #[tokio::test]
    async fn arrival_clears_mission_and_reports_completion() {
        let config = test_config();
        let state = Arc::new(Mutex::new(AgentState {
            location: Coord::new(2, 0),
            battery: 100.0,
            mission: Some(MissionState {
                mission_id: 1,
                target: Coord::new(2, 0),
            }),
        }));
        let (tx, mut rx) = mpsc::channel(8);

        step_toward_target(&config, &state, &tx).await;
        assert!(state.lock().await.mission.is_none());

        let busy_report = rx.recv().await.expect("busy status update sent");
        match busy_report {
            Message::StatusUpdate { status, .. } => assert_eq!(status, ReportedStatus::Busy),
            _ => panic!("wrong message"),
        }

        let completion = rx.recv().await.expect("mission complete sent");
        match completion {
            Message::MissionComplete { success, .. } => assert!(success),
            _ => panic!("wrong message"),
        }

        let idle_report = rx.recv().await.expect("idle status update sent");
        match idle_report {
            Message::StatusUpdate { status, .. } => assert_eq!(status, ReportedStatus::Idle),
            _ => panic!("wrong message"),
        }
    }
}
