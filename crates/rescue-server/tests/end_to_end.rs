//! End-to-end scenarios against a real `TcpListener` on an ephemeral port:
//! handshake, nearest-drone dispatch, mission completion and heartbeat
//! eviction with requeue.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rescue_core::codec::{self, Capabilities, Message, ReportedStatus};
use rescue_core::{Coord, ServerConfig};
use rescue_server::Server;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LinesCodec};

type Conn = Framed<TcpStream, LinesCodec>;

async fn start_server(config: ServerConfig) -> (std::net::SocketAddr, Arc<Server>, broadcast::Sender<()>) {
    let server = Arc::new(Server::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, _) = broadcast::channel(4);
    let serve_shutdown = shutdown_tx.clone();
    let serve_server = server.clone();
    tokio::spawn(async move {
        let _ = serve_server.serve(listener, serve_shutdown).await;
    });
    (addr, server, shutdown_tx)
}

fn fast_test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        max_drones: 8,
        map_width: 20,
        map_height: 20,
        survivor_spawn_rate_s: 3600, // tests spawn incidents explicitly unless noted
        drone_speed: 1,
        status_update_interval_s: 2,
        heartbeat_interval_s: 1,
        heartbeat_miss_threshold: 2,
        reconnect_grace_s: 2,
    }
}

async fn connect(addr: std::net::SocketAddr) -> Conn {
    let stream = TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, LinesCodec::new_with_max_length(2048))
}

async fn send(conn: &mut Conn, message: &Message) {
    let line = codec::encode(message).unwrap();
    conn.send(line.trim_end_matches('\n').to_string()).await.unwrap();
}

async fn recv(conn: &mut Conn) -> Message {
    let line = tokio::time::timeout(Duration::from_secs(5), conn.next())
        .await
        .expect("timed out waiting for a message")
        .expect("connection closed")
        .expect("frame error");
    codec::decode(&line).unwrap()
}

async fn handshake(conn: &mut Conn, drone_id: &str) {
    send(
        conn,
        &Message::Handshake {
            drone_id: drone_id.to_string(),
            capabilities: Capabilities {
                max_speed: 2.0,
                battery_capacity: 100.0,
                payload: 1.0,
            },
        },
    )
    .await;
    match recv(conn).await {
        Message::HandshakeAck { .. } => {}
        other => panic!("expected HANDSHAKE_ACK, got {}", other.kind()),
    }
}

#[tokio::test]
async fn handshake_completes_and_heartbeat_round_trips() {
    let (addr, _server, _shutdown) = start_server(fast_test_config()).await;
    let mut conn = connect(addr).await;
    handshake(&mut conn, "D1").await;

    // The liveness monitor should heartbeat us within ~1s.
    match recv(&mut conn).await {
        Message::Heartbeat { .. } => {}
        other => panic!("expected HEARTBEAT, got {}", other.kind()),
    }
}

#[tokio::test]
async fn nearest_idle_drone_is_dispatched() {
    let (addr, server, _shutdown) = start_server(fast_test_config()).await;

    let mut far = connect(addr).await;
    handshake(&mut far, "D1").await;
    send(
        &mut far,
        &Message::StatusUpdate {
            drone_id: "D1".into(),
            timestamp: chrono::Utc::now(),
            location: Coord::new(0, 0),
            status: ReportedStatus::Idle,
            battery: 100.0,
            speed: 1.0,
        },
    )
    .await;

    let mut near = connect(addr).await;
    handshake(&mut near, "D2").await;
    send(
        &mut near,
        &Message::StatusUpdate {
            drone_id: "D2".into(),
            timestamp: chrono::Utc::now(),
            location: Coord::new(9, 9),
            status: ReportedStatus::Idle,
            battery: 100.0,
            speed: 1.0,
        },
    )
    .await;

    // Let both status updates land before the incident is pushed.
    tokio::time::sleep(Duration::from_millis(200)).await;
    server
        .incidents
        .push_normal(rescue_core::Incident::new(Coord::new(10, 10), "survivor", chrono::Utc::now()))
        .await
        .unwrap();

    let assignment = loop {
        match recv(&mut near).await {
            Message::AssignMission { target, .. } => break target,
            Message::Heartbeat { .. } => continue,
            other => panic!("unexpected message on near drone: {}", other.kind()),
        }
    };
    assert_eq!(assignment, Coord::new(10, 10));
}

#[tokio::test]
async fn mission_complete_frees_the_drone() {
    let (addr, server, _shutdown) = start_server(fast_test_config()).await;
    let mut conn = connect(addr).await;
    handshake(&mut conn, "D1").await;
    send(
        &mut conn,
        &Message::StatusUpdate {
            drone_id: "D1".into(),
            timestamp: chrono::Utc::now(),
            location: Coord::new(0, 0),
            status: ReportedStatus::Idle,
            battery: 100.0,
            speed: 1.0,
        },
    )
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    server
        .incidents
        .push_normal(rescue_core::Incident::new(Coord::new(1, 1), "survivor", chrono::Utc::now()))
        .await
        .unwrap();

    let mission_id = loop {
        match recv(&mut conn).await {
            Message::AssignMission { mission_id, .. } => break mission_id,
            Message::Heartbeat { .. } => continue,
            other => panic!("unexpected message: {}", other.kind()),
        }
    };

    send(
        &mut conn,
        &Message::MissionComplete {
            drone_id: "D1".into(),
            mission_id,
            timestamp: chrono::Utc::now(),
            success: true,
            details: "done".into(),
        },
    )
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let record = server.registry.lookup("D1").await.unwrap();
    let inner = record.lock().await;
    assert_eq!(inner.status, rescue_core::DroneStatus::Idle);
    assert!(inner.current_mission_id.is_none());
}

#[tokio::test]
async fn oversize_frame_is_rejected() {
    let (addr, _server, _shutdown) = start_server(fast_test_config()).await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut conn = Framed::new(stream, LinesCodec::new_with_max_length(2048));

    let huge = "x".repeat(4096);
    // Bypass our own max-length writer guard to simulate a misbehaving peer.
    use tokio::io::AsyncWriteExt;
    {
        let raw = conn.get_mut();
        raw.write_all(huge.as_bytes()).await.unwrap();
        raw.write_all(b"\n").await.unwrap();
    }

    // The session should close the connection rather than hang.
    let result = tokio::time::timeout(Duration::from_secs(5), conn.next()).await;
    match result {
        Ok(None) | Err(_) => {}
        Ok(Some(Err(_))) => {}
        Ok(Some(Ok(_))) => panic!("expected the connection to close or error on an oversize frame"),
    }
}
