use avc_control::{CommandGateway, Mission, MissionConfig, TelemetrySink};
use avc_monitor::{Broadcaster, ObserverServer};
use avc_nav::NavigatorConfig;
use avc_proto::{CommandReply, Envelope, EnvelopeKind, MissionState, Pose, TelemetrySnapshot};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};

async fn next_envelope(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Option<Envelope> {
    let line = timeout(Duration::from_secs(5), lines.next_line()).await.expect("timed out").unwrap()?;
    Some(serde_json::from_str(&line).unwrap())
}

async fn next_reply(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> CommandReply {
    let env = next_envelope(lines).await.expect("connection closed");
    assert_eq!(env.kind, EnvelopeKind::Response);
    serde_json::from_str(&env.message).unwrap()
}

fn snapshot() -> TelemetrySnapshot {
    TelemetrySnapshot {
        ts_unix_ms: 1,
        state: MissionState::Stopped,
        pose: Pose::default(),
        target_waypoint_index: None,
        target_waypoint: None,
        distance_to_target_m: None,
        bearing_to_target_deg: None,
        waypoint_count: 0,
        throttle: 0.0,
        steering: 0.0,
        max_throttle: 0.5,
        compass_calibrated: false,
        satellites: 0,
        accuracy_m: 0.0,
    }
}

#[tokio::test]
async fn commands_and_telemetry_share_one_connection() {
    let mission = Arc::new(Mutex::new(Mission::new(
        MissionConfig::default(),
        NavigatorConfig::default(),
        Instant::now(),
    )));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gateway = CommandGateway::new(mission.clone(), std::env::temp_dir(), shutdown_rx.clone());
    let broadcaster = Arc::new(Broadcaster::new(32));

    let server = ObserverServer::bind("127.0.0.1:0", broadcaster.clone(), gateway).await.unwrap();
    let addr = server.local_addr().unwrap();
    let server_task = tokio::spawn(server.run(shutdown_rx));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();

    for _ in 0..100 {
        if broadcaster.observer_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(broadcaster.observer_count(), 1);

    wr.write_all(b"{\"type\":\"command\",\"command\":\"stop\"}\n").await.unwrap();
    let reply = next_reply(&mut lines).await;
    assert!(reply.success, "{:?}", reply.message);
    assert_eq!(mission.lock().unwrap().state(), MissionState::Stopped);

    wr.write_all(b"this is not json\n").await.unwrap();
    assert!(!next_reply(&mut lines).await.success);

    wr.write_all(b"{\"type\":\"subscribe\"}\n").await.unwrap();
    assert!(!next_reply(&mut lines).await.success);

    wr.write_all(b"{\"type\":\"command\",\"command\":\"set-max-throttle\",\"params\":{\"throttle\":2}}\n")
        .await
        .unwrap();
    let reply = next_reply(&mut lines).await;
    assert!(!reply.success);
    assert!(reply.message.unwrap().contains("out of range"));

    broadcaster.publish(&snapshot());
    let env = next_envelope(&mut lines).await.unwrap();
    assert_eq!(env.kind, EnvelopeKind::Telemetry);
    let snap: TelemetrySnapshot = serde_json::from_str(&env.message).unwrap();
    assert_eq!(snap.state, MissionState::Stopped);

    shutdown_tx.send(true).unwrap();
    server_task.await.unwrap().unwrap();
    broadcaster.close();
    assert!(next_envelope(&mut lines).await.is_none());
}
