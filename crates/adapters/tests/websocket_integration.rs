use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use nlsql_adapters::websocket::WebSocketConnector;
use nlsql_core::chart_spec::ChartOptions;
use nlsql_core::chat_session::{ChatSession, InboundOutcome};
use nlsql_core::connection_manager::{
    ConnectionCommands, ConnectionEvent, ConnectionManager, ConnectionState, FrameSocket,
    SocketConnector,
};
use nlsql_core::reconnect_policy::ReconnectPolicy;
use nlsql_core::settings::UserSettings;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let address = listener.local_addr().expect("listener should have address");
    (listener, format!("ws://{address}/agent"))
}

/// Accepts one client and answers every query with a streamed reply, a
/// result set and a completion marker.
async fn scripted_backend(listener: TcpListener) {
    let (stream, _) = listener.accept().await.expect("client should connect");
    let mut socket = tokio_tungstenite::accept_async(stream)
        .await
        .expect("handshake should succeed");

    while let Some(Ok(message)) = socket.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let frame: Value = serde_json::from_str(&text).expect("client frame should be JSON");
        let query = frame["query"].as_str().unwrap_or_default().to_string();

        let replies = [
            json!({"event": "prompt", "setting": {"stream": true}, "data": {"message": "SELECT "}}),
            json!({"event": "prompt", "setting": {"stream": true}, "data": {"message": "* FROM sales"}}),
            json!({"event": "system", "data": {"message": format!("received: {query}")}}),
            json!({
                "event": "db_result",
                "data": {
                    "sql_query": "SELECT * FROM sales",
                    "rows": [{"Category": "A", "Count": 5}, {"Category": "B", "Count": 10}],
                    "columns": [{"name": "Category"}, {"name": "Count"}]
                }
            }),
            json!({"event": "completion", "data": {}}),
        ];
        for reply in replies {
            socket
                .send(Message::Text(reply.to_string()))
                .await
                .expect("reply should send");
        }
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("event should arrive in time")
        .expect("connection task should be running")
}

#[tokio::test(flavor = "current_thread")]
async fn socket_round_trips_text_frames() {
    let (listener, endpoint) = bind().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("client should connect");
        let mut socket = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake should succeed");
        if let Some(Ok(Message::Text(text))) = socket.next().await {
            socket
                .send(Message::Text(format!("echo:{text}")))
                .await
                .expect("echo should send");
        }
        socket.close(None).await.expect("server close should succeed");
    });

    let connector = WebSocketConnector::default();
    let mut socket = connector
        .open(&endpoint)
        .await
        .expect("socket should open");
    socket
        .send_text(r#"{"query":"ping"}"#)
        .await
        .expect("frame should send");

    let reply = tokio::time::timeout(WAIT, socket.next_frame())
        .await
        .expect("reply should arrive")
        .expect("socket should still be open")
        .expect("reply should be a text frame");
    assert_eq!(reply, r#"echo:{"query":"ping"}"#);

    let closed = tokio::time::timeout(WAIT, socket.next_frame())
        .await
        .expect("close should arrive");
    assert!(closed.is_none());

    server.await.expect("server task should finish");
}

#[tokio::test(flavor = "current_thread")]
async fn refused_connection_surfaces_transport_error() {
    let (listener, endpoint) = bind().await;
    drop(listener);

    let connector = WebSocketConnector::new(Duration::from_secs(2));
    let result = connector.open(&endpoint).await;
    assert!(result.is_err());
}

#[tokio::test(flavor = "current_thread")]
async fn session_streams_a_full_turn_over_a_real_socket() {
    let (listener, endpoint) = bind().await;
    let server = tokio::spawn(scripted_backend(listener));

    let mut connection = ConnectionManager::spawn(
        WebSocketConnector::default(),
        endpoint,
        ReconnectPolicy::new(Duration::from_millis(50), 1),
    );
    let mut session = ChatSession::new(UserSettings::new("sakila", ""), ChartOptions::default());

    connection.handle.connect();
    while session.connection_state() != ConnectionState::Connected {
        let event = next_event(&mut connection.events).await;
        session.apply_connection_event(&event);
    }

    let response_id = session
        .submit("sales by category", &connection.handle)
        .expect("submission should be accepted");

    loop {
        let event = next_event(&mut connection.events).await;
        if session.apply_connection_event(&event) == InboundOutcome::Finished {
            break;
        }
    }

    let placeholder = session
        .message(&response_id)
        .expect("response placeholder should exist");
    assert!(!placeholder.is_loading);
    assert!(placeholder.result.is_some());
    assert!(session
        .messages()
        .iter()
        .any(|message| message.content == "received: sales by category"));

    let record = &session.finished_records()[0];
    assert_eq!(record.accumulated_text, "SELECT * FROM sales");
    let spec = session.chart_spec(&response_id).expect("chart spec");
    assert_eq!((spec.x_key.as_str(), spec.y_key.as_str()), ("Category", "Count"));

    connection.handle.shutdown();
    tokio::time::timeout(WAIT, connection.task)
        .await
        .expect("connection task should stop")
        .expect("connection task should not panic");
    server.abort();
}
