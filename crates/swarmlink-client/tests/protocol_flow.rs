//! End-to-end flow: envelopes arrive on the connector's receive loop,
//! get dispatched to the simple messaging protocol, and protocol
//! responses travel back out through the connector's send path.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsFrame;

use swarmlink_client::{Connector, MessageHandler};
use swarmlink_protocols::{NetworkProtocol, OutboundSender, SimpleMessaging};
use swarmlink_wire::Message;

struct TestServer {
    port: u16,
    push_tx: mpsc::UnboundedSender<String>,
    recv_rx: mpsc::UnboundedReceiver<String>,
}

/// Accepts one connection, acknowledges registration, then relays
/// frames between the test body and the client.
async fn spawn_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();
    let (recv_tx, recv_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let _register = ws.next().await.unwrap().unwrap();
        let ack = json!({
            "type": "system_response",
            "command": "register_agent",
            "success": true,
            "network_name": "flownet",
        });
        ws.send(WsFrame::Text(ack.to_string())).await.unwrap();

        loop {
            tokio::select! {
                outgoing = push_rx.recv() => match outgoing {
                    Some(text) => {
                        if ws.send(WsFrame::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                incoming = ws.next() => match incoming {
                    Some(Ok(WsFrame::Text(text))) => {
                        let _ = recv_tx.send(text);
                    }
                    Some(Ok(WsFrame::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                },
            }
        }
    });

    TestServer {
        port,
        push_tx,
        recv_rx,
    }
}

/// Routes protocol responses out through the agent's connector.
struct ConnectorSender {
    connector: Arc<Connector>,
}

#[async_trait]
impl OutboundSender for ConnectorSender {
    fn local_id(&self) -> String {
        self.connector.agent_id().to_string()
    }

    async fn send_protocol_message(&self, message: Message) -> bool {
        self.connector.send_protocol_message(message).await
    }
}

/// Feeds inbound protocol messages into the protocol pipeline.
struct ProtocolDispatch {
    protocol: Arc<SimpleMessaging>,
}

#[async_trait]
impl MessageHandler for ProtocolDispatch {
    async fn handle(&self, message: Message) {
        self.protocol.process_protocol_message(message).await;
    }
}

async fn wired_agent(server: &TestServer) -> (Arc<Connector>, Arc<SimpleMessaging>) {
    let connector = Connector::new("127.0.0.1", server.port, "a1", Map::new());
    let protocol = Arc::new(SimpleMessaging::new().unwrap());
    protocol.register_agent("a1", &Map::new());
    assert!(protocol.register_with_network(Arc::new(ConnectorSender {
        connector: connector.clone(),
    })));
    connector.register_message_handler(
        "protocol_message",
        Arc::new(ProtocolDispatch {
            protocol: protocol.clone(),
        }),
    );
    assert!(connector.connect().await);
    (connector, protocol)
}

#[tokio::test]
async fn delete_request_for_unknown_file_answers_over_the_wire() {
    let mut server = spawn_server().await;
    let (_connector, _protocol) = wired_agent(&server).await;

    let request = json!({
        "type": "message",
        "data": {
            "message_id": "req-42",
            "sender_id": "a2",
            "message_type": "protocol_message",
            "protocol": "simple_messaging",
            "content": { "action": "delete_file", "file_id": "ghost" },
        },
    });
    server.push_tx.send(request.to_string()).unwrap();

    let raw = server.recv_rx.recv().await.unwrap();
    let value: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["type"], "message");
    assert_eq!(value["data"]["message_type"], "protocol_message");
    assert_eq!(value["data"]["content"]["action"], "file_deletion_response");
    assert_eq!(value["data"]["content"]["success"], false);
    assert_eq!(value["data"]["content"]["error"], "File not found");
    assert_eq!(value["data"]["content"]["request_id"], "req-42");
    assert_eq!(value["data"]["direction"], "outbound");
}

#[tokio::test]
async fn stored_attachment_is_downloadable_over_the_wire() {
    let mut server = spawn_server().await;
    let (_connector, protocol) = wired_agent(&server).await;

    // Attachment arrives in a direct message and gets stored.
    let inbound = Message::direct("a1", {
        let mut content = Map::new();
        content.insert(
            "files".to_string(),
            json!([{ "content": BASE64.encode(b"hi"), "filename": "a.txt" }]),
        );
        content
    });
    let processed = protocol.process_direct_message(inbound).await.unwrap();
    let file_id = processed.content["files"][0]["file_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(processed.content["files"][0]["size"], 2);

    // A peer requests it back through the connector's receive loop.
    let request = json!({
        "type": "message",
        "data": {
            "message_id": "req-7",
            "sender_id": "a2",
            "message_type": "protocol_message",
            "protocol": "simple_messaging",
            "content": { "action": "get_file", "file_id": file_id },
        },
    });
    server.push_tx.send(request.to_string()).unwrap();

    let raw = server.recv_rx.recv().await.unwrap();
    let value: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["data"]["content"]["action"], "file_download_response");
    assert_eq!(value["data"]["content"]["success"], true);
    assert_eq!(value["data"]["content"]["request_id"], "req-7");
    let encoded = value["data"]["content"]["content"].as_str().unwrap();
    assert_eq!(BASE64.decode(encoded).unwrap(), b"hi");
}
