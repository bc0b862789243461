
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use engineio_client::EngineState;
use fixture::{MockServer, connected_client, wait_until};
use socketio_client::{ConnectionState, Value, event};

#[tokio::test]
async fn root_namespace_connects_on_engine_open() {
    let server = MockServer::new();
    let client = server.client().build();
    let socket = client.socket("/");

    let connects = Arc::new(AtomicUsize::new(0));
    let counter = connects.clone();
    socket.on(event::CONNECT, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    client.connect().await.unwrap();
    assert_eq!(socket.state(), ConnectionState::Connected);
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(client.engine_state(), EngineState::Open);
}

#[tokio::test]
async fn custom_namespace_waits_for_the_server_echo() {
    let server = MockServer::new();
    let client = server.client().namespace("/swift").build();
    let socket = client.socket("/swift");

    // Echo the namespace connect once the client asks for it
    let echo = server.clone();
    tokio::spawn(async move {
        echo.wait_for_post(|body| body.contains("40/swift")).await;
        echo.push_message("0/swift,");
    });

    client.connect().await.unwrap();
    assert_eq!(socket.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn events_dispatch_in_arrival_order() {
    let server = MockServer::new();
    let client = connected_client(&server).await;
    let socket = client.socket("/");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    socket.on("test", move |args, _| {
        sink.lock().unwrap().push(args[0].clone());
    });

    server.push_message("2[\"test\",\"foo bar\"]");
    server.push_message("2[\"test\",\"second\"]");

    wait_until(|| seen.lock().unwrap().len() == 2).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Value::from("foo bar"), Value::from("second")]
    );
}

#[tokio::test]
async fn handlers_can_answer_with_the_bound_ack_emitter() {
    let server = MockServer::new();
    let client = connected_client(&server).await;
    let socket = client.socket("/");

    socket.on("needsack", |_, ack| {
        assert!(ack.expects_ack());
        ack.send(vec![Value::from("ok")]).unwrap();
    });

    server.push_message("21[\"needsack\"]");
    // The reply correlates by the received packet id
    let post = server.wait_for_post(|body| body.contains("31[\"ok\"]")).await;
    assert!(post.contains("431[\"ok\"]"));
}

#[tokio::test]
async fn once_fires_exactly_once_and_off_suppresses() {
    let server = MockServer::new();
    let client = connected_client(&server).await;
    let socket = client.socket("/");

    let once_count = Arc::new(AtomicUsize::new(0));
    let counter = once_count.clone();
    socket.once("ev", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let off_count = Arc::new(AtomicUsize::new(0));
    let counter = off_count.clone();
    let off_id = socket.on("ev", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    socket.off_id(off_id);

    server.push_message("2[\"ev\"]");
    server.push_message("2[\"ev\"]");
    // A later event proves both earlier ones were dispatched
    let done = Arc::new(AtomicUsize::new(0));
    let counter = done.clone();
    socket.on("done", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    server.push_message("2[\"done\"]");
    wait_until(|| done.load(Ordering::SeqCst) == 1).await;

    assert_eq!(once_count.load(Ordering::SeqCst), 1);
    assert_eq!(off_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_namespace_packets_are_dropped() {
    let server = MockServer::new();
    let client = connected_client(&server).await;
    let socket = client.socket("/");

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    socket.on("ev", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    server.push_message("2/nowhere,[\"ev\"]");
    server.push_message("2[\"ev\"]");
    wait_until(|| seen.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn error_packets_are_observable_while_connecting() {
    let server = MockServer::new();
    let client = server
        .client()
        .namespace("/swift")
        .connect_timeout(std::time::Duration::from_millis(200))
        .build();
    let socket = client.socket("/swift");

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    socket.on(event::ERROR, move |args, _| {
        sink.lock().unwrap().push(args.to_vec());
    });

    let reject = server.clone();
    tokio::spawn(async move {
        reject.wait_for_post(|body| body.contains("40/swift")).await;
        reject.push_message("4/swift,\"Auth failed\"");
    });

    let res = client.connect().await;
    assert!(res.is_err());
    assert_eq!(errors.lock().unwrap()[0], vec![Value::from("Auth failed")]);
}

#[tokio::test]
async fn server_disconnect_packet_forces_the_socket_down() {
    let server = MockServer::new();
    let client = connected_client(&server).await;
    let socket = client.socket("/");

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = reasons.clone();
    socket.on(event::DISCONNECT, move |args, _| {
        sink.lock().unwrap().push(args[0].clone());
    });

    server.push_message("1");
    wait_until(|| socket.state() == ConnectionState::Disconnected).await;
    assert_eq!(
        reasons.lock().unwrap()[0],
        Value::from("server namespace disconnect")
    );
}

#[tokio::test]
async fn binary_event_is_dispatched_only_once_complete() {
    let server = MockServer::new();
    let client = connected_client(&server).await;
    let socket = client.socket("/");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    socket.on("bin", move |args, _| {
        sink.lock().unwrap().push(args.to_vec());
    });

    let marker = Arc::new(AtomicUsize::new(0));
    let counter = marker.clone();
    socket.on("marker", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // Header first, blob in a later poll: no dispatch until it arrived
    server.push_message("51-[\"bin\",{\"_placeholder\":true,\"num\":0}]");
    server.push_message("2[\"marker\"]");
    wait_until(|| marker.load(Ordering::SeqCst) == 1).await;
    assert!(seen.lock().unwrap().is_empty());

    server.push_packets(&[engineio_client::Packet::Binary(Bytes::from_static(b"X"))]);
    wait_until(|| !seen.lock().unwrap().is_empty()).await;
    assert_eq!(
        seen.lock().unwrap()[0],
        vec![Value::Bytes(Bytes::from_static(b"X"))]
    );
}

#[tokio::test]
async fn binary_emit_travels_with_its_attachments() {
    let server = MockServer::new();
    let client = connected_client(&server).await;
    let socket = client.socket("/");

    socket
        .emit(
            "upload",
            vec![Value::Bytes(Bytes::from_static(&[1, 2, 3]))],
        )
        .unwrap();

    // One atomic POST: the placeholder header and the base64 blob
    let post = server.wait_for_post(|body| body.contains("b4")).await;
    assert!(post.contains("451-[\"upload\",{\"_placeholder\":true,\"num\":0}]"));
    assert!(post.contains("b4AQID"));
}

#[tokio::test]
async fn leaving_a_namespace_keeps_the_engine_up() {
    let server = MockServer::new();
    let client = connected_client(&server).await;
    let swift = client.socket("/swift");

    let echo = server.clone();
    tokio::spawn(async move {
        echo.wait_for_post(|body| body.contains("40/swift")).await;
        echo.push_message("0/swift,");
    });
    swift.connect().await.unwrap();

    swift.disconnect().unwrap();
    server.wait_for_post(|body| body.contains("41/swift")).await;
    assert_eq!(swift.state(), ConnectionState::Disconnected);
    assert_eq!(client.engine_state(), EngineState::Open);
    assert_eq!(client.socket("/").state(), ConnectionState::Connected);
}

#[tokio::test]
async fn emit_when_not_connected_is_rejected() {
    let server = MockServer::new();
    let client = server.client().build();
    let socket = client.socket("/");
    assert!(socket.emit("ev", Vec::new()).is_err());
}
