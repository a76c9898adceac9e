//! End-to-end tests over a real WebSocket.
//!
//! Each test starts a small echo server on a free port: it sends a snapshot
//! on connect and answers every upload with the matching update.

use cloudvar_sync::websocket;
use cloudvar_sync::{
    CloudConfig, CloudSession, CloudValue, ConnectionState, OutgoingMessage, SendMessageKind,
    ServerMessage, Timing,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

const SNAPSHOT: &str = r#"{"type":"snapshot","payload":{
    "public_variables":[{"cvid":"c1","name":"score","value":3}],
    "private_variables":[],
    "lists":[{"cvid":"l1","name":"names","value":[]}]
}}"#;

/// How the test server treats a connection after the snapshot.
#[derive(Clone, Copy)]
enum Behavior {
    Echo,
    DropAfterSnapshot,
}

fn echo_for(text: &str) -> Option<String> {
    let upload = OutgoingMessage::decode(text).ok()?;
    let reply = match upload.kind {
        SendMessageKind::UpdatePublicVariable => ServerMessage::PublicVariableUpdate(upload.payload),
        SendMessageKind::UpdatePrivateVariable => {
            ServerMessage::PrivateVariableUpdate(upload.payload)
        }
        SendMessageKind::UpdateList => ServerMessage::ListUpdate(upload.payload),
    };
    reply.encode().ok()
}

/// Start a server on a free port, return the port.
async fn start_test_server(behavior: Behavior) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut writer, mut reader) = ws.split();
                if writer.send(Message::Text(SNAPSHOT.into())).await.is_err() {
                    return;
                }
                if let Behavior::DropAfterSnapshot = behavior {
                    return;
                }
                while let Some(Ok(frame)) = reader.next().await {
                    if let Message::Text(text) = frame {
                        if let Some(reply) = echo_for(text.as_str()) {
                            if writer.send(Message::Text(reply.into())).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

#[tokio::test]
async fn test_local_edit_round_trips_through_server() {
    let port = start_test_server(Behavior::Echo).await;
    let (transport, events) = websocket::connect(format!("ws://127.0.0.1:{port}"), Timing::Disabled);
    let session = CloudSession::new(transport.clone(), &CloudConfig::default()).unwrap();

    let driver = async {
        let score = session.public_variables().get("score").await.unwrap();
        assert_eq!(score.get(), CloudValue::from(3));

        let result = timeout(Duration::from_secs(2), score.set(42)).await;
        assert_eq!(result, Ok(Ok(())));
        assert_eq!(score.get(), CloudValue::from(42));

        let names = session.lists().get("names").await.unwrap();
        let result = timeout(Duration::from_secs(2), names.push("ada")).await;
        assert_eq!(result, Ok(Ok(())));
        assert_eq!(names.join(","), "ada");

        transport.close();
    };

    let finished = timeout(Duration::from_secs(5), async {
        tokio::join!(session.run(events), driver);
    })
    .await;
    assert!(finished.is_ok(), "session should stop after close");
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_dropped_connection_without_reconnect_closes_session() {
    let port = start_test_server(Behavior::DropAfterSnapshot).await;
    let (transport, events) = websocket::connect(format!("ws://127.0.0.1:{port}"), Timing::Disabled);
    let session = CloudSession::new(transport, &CloudConfig::default()).unwrap();

    let finished = timeout(Duration::from_secs(2), session.run(events)).await;
    assert!(finished.is_ok(), "session should stop once the server drops");
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_unreachable_server_closes_session() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let (transport, events) = websocket::connect(format!("ws://127.0.0.1:{port}"), Timing::Disabled);
    let session = CloudSession::new(transport, &CloudConfig::default()).unwrap();

    let finished = timeout(Duration::from_secs(2), session.run(events)).await;
    assert!(finished.is_ok());
    let err = session.public_variables().get("score").await.unwrap_err();
    assert_eq!(err, cloudvar_sync::CloudError::Closed);
}
