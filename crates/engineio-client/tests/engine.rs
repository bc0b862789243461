mod fixture;

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use engineio_client::{
    CloseReason, Engine, EngineConfig, EngineEvent, EngineState, Packet, WsFrame,
};
use fixture::MockConnector;
use tokio::sync::mpsc;
use url::Url;

fn config() -> EngineConfig {
    EngineConfig::new(Url::parse("http://localhost:8087").unwrap())
}

fn polling_config() -> EngineConfig {
    let mut config = config();
    config.force_polling = true;
    config
}

async fn next_event(events: &mut mpsc::Receiver<EngineEvent>) -> EngineEvent {
    events.recv().await.expect("engine event channel closed")
}

/// The next message event, skipping heartbeat noise
async fn next_message(events: &mut mpsc::Receiver<EngineEvent>) -> String {
    loop {
        match next_event(events).await {
            EngineEvent::Message(msg) => return msg,
            EngineEvent::Ping | EngineEvent::Pong => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

async fn next_close(events: &mut mpsc::Receiver<EngineEvent>) -> CloseReason {
    loop {
        if let EngineEvent::Closed(reason) = next_event(events).await {
            return reason;
        }
    }
}

#[tokio::test]
async fn polling_message_flow() {
    let mock = MockConnector::new();
    let (engine, mut events) = Engine::connect(polling_config(), Arc::new(mock.clone()))
        .await
        .unwrap();
    assert_eq!(engine.state(), EngineState::Open);
    assert_eq!(engine.handshake().sid, "sid0");

    // Inbound: a message wrapped in the polling envelope
    mock.push_packets(&[Packet::Message("2[\"hello\"]".into())]);
    assert_eq!(next_message(&mut events).await, "2[\"hello\"]");

    // Outbound: envelope framing with a character-counted length prefix
    engine.send("42[\"x\"]".to_owned()).unwrap();
    let post = mock.wait_for_post(|body| body.contains("42[\"x\"]")).await;
    assert_eq!(post, "8:442[\"x\"]");

    engine.close();
    assert_eq!(next_close(&mut events).await, CloseReason::Deliberate);
    assert_eq!(engine.state(), EngineState::Closed);
    // The close packet went out on the wire
    mock.wait_for_post(|body| body == "1:1").await;
}

#[tokio::test]
async fn multiple_messages_in_one_poll_response_stay_ordered() {
    let mock = MockConnector::new();
    let (_engine, mut events) = Engine::connect(polling_config(), Arc::new(mock.clone()))
        .await
        .unwrap();

    mock.push_packets(&[
        Packet::Message("2[\"first\"]".into()),
        Packet::Message("2[\"second\"]".into()),
        Packet::Message("2[\"third\"]".into()),
    ]);
    assert_eq!(next_message(&mut events).await, "2[\"first\"]");
    assert_eq!(next_message(&mut events).await, "2[\"second\"]");
    assert_eq!(next_message(&mut events).await, "2[\"third\"]");
}

#[tokio::test]
async fn binary_over_polling_is_base64() {
    let mock = MockConnector::new();
    let (engine, mut events) = Engine::connect(polling_config(), Arc::new(mock.clone()))
        .await
        .unwrap();

    engine
        .send_with_bins("45-[\"bin\"]".to_owned(), vec![Bytes::from_static(&[1, 2, 3])])
        .unwrap();
    let post = mock.wait_for_post(|body| body.contains("b4")).await;
    // The message and its attachment share one atomic request
    assert_eq!(post, "11:445-[\"bin\"]6:b4AQID");

    // Inbound binary arrives as a base64 packet in the envelope
    mock.push_packets(&[Packet::Binary(Bytes::from_static(&[4, 5]))]);
    loop {
        match next_event(&mut events).await {
            EngineEvent::Binary(data) => {
                assert_eq!(data, Bytes::from_static(&[4, 5]));
                break;
            }
            EngineEvent::Ping | EngineEvent::Pong => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

#[tokio::test]
async fn upgrade_race_commits_to_exactly_one_transport() {
    let mock = MockConnector::new().with_websocket();
    let (engine, _events) = Engine::connect(config(), Arc::new(mock.clone()))
        .await
        .unwrap();

    let mut session = mock.next_ws_session().await;
    assert_eq!(session.next_frame().await, WsFrame::Text("2probe".into()));

    // Sent while the race is unresolved: must not travel over polling
    engine.send("42[\"held\"]".to_owned()).unwrap();

    session.send_packet(&Packet::PongProbe);
    assert_eq!(session.next_frame().await, WsFrame::Text("5".into()));
    assert_eq!(session.next_frame().await, WsFrame::Text("442[\"held\"]".into()));

    engine.send("42[\"after\"]".to_owned()).unwrap();
    assert_eq!(session.next_frame().await, WsFrame::Text("442[\"after\"]".into()));

    // No frame was ever sent on both transports
    assert!(
        mock.posts()
            .iter()
            .all(|body| !body.contains("held") && !body.contains("after"))
    );

    // Binary is framed for the websocket now: sentinel byte, not base64
    engine
        .send_with_bins("45-[\"b\"]".to_owned(), vec![Bytes::from_static(&[7, 8])])
        .unwrap();
    assert_eq!(session.next_frame().await, WsFrame::Text("445-[\"b\"]".into()));
    assert_eq!(
        session.next_frame().await,
        WsFrame::Binary(Bytes::from_static(&[0x04, 7, 8]))
    );
}

#[tokio::test]
async fn lost_probe_websocket_falls_back_to_polling() {
    let mock = MockConnector::new().with_websocket();
    let (engine, _events) = Engine::connect(config(), Arc::new(mock.clone()))
        .await
        .unwrap();

    let mut session = mock.next_ws_session().await;
    assert_eq!(session.next_frame().await, WsFrame::Text("2probe".into()));

    engine.send("42[\"x\"]".to_owned()).unwrap();
    // The websocket dies before acknowledging the probe
    drop(session);

    // The held message is flushed over the surviving polling transport
    mock.wait_for_post(|body| body.contains("42[\"x\"]")).await;
}

#[tokio::test(start_paused = true)]
async fn heartbeat_keeps_the_session_alive() {
    let mock = MockConnector::new().with_heartbeat(1_000, 3_000);
    let (engine, mut events) = Engine::connect(polling_config(), Arc::new(mock.clone()))
        .await
        .unwrap();

    let mut pongs = 0;
    while pongs < 5 {
        match next_event(&mut events).await {
            EngineEvent::Pong => pongs += 1,
            EngineEvent::Ping => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(engine.state(), EngineState::Open);
}

#[tokio::test(start_paused = true)]
async fn missed_pongs_close_the_session() {
    let mock = MockConnector::new().with_heartbeat(1_000, 3_000);
    mock.auto_pong(false);
    let (engine, mut events) = Engine::connect(polling_config(), Arc::new(mock.clone()))
        .await
        .unwrap();

    assert_eq!(next_close(&mut events).await, CloseReason::HeartbeatTimeout);
    assert_eq!(engine.state(), EngineState::Closed);
}

#[tokio::test]
async fn expired_sid_triggers_a_single_silent_rehandshake() {
    let mock = MockConnector::new();
    let (engine, mut events) = Engine::connect(polling_config(), Arc::new(mock.clone()))
        .await
        .unwrap();
    assert_eq!(mock.handshake_count(), 1);

    mock.fail_next_post_with(1);
    engine.send("42[\"x\"]".to_owned()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while mock.handshake_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("engine never re-handshook");

    // The session survived and keeps delivering messages
    assert_eq!(engine.state(), EngineState::Open);
    mock.push_packets(&[Packet::Message("2[\"still alive\"]".into())]);
    assert_eq!(next_message(&mut events).await, "2[\"still alive\"]");
}

#[tokio::test]
async fn server_close_packet_ends_the_session() {
    let mock = MockConnector::new();
    let (_engine, mut events) = Engine::connect(polling_config(), Arc::new(mock.clone()))
        .await
        .unwrap();

    mock.push_packets(&[Packet::Close]);
    assert_eq!(next_close(&mut events).await, CloseReason::TransportClose);
}

#[tokio::test]
async fn handshake_failure_is_reported() {
    let mock = MockConnector::new();
    mock.fail_handshakes(1);
    let res = Engine::connect(polling_config(), Arc::new(mock.clone())).await;
    assert!(res.is_err());
}
