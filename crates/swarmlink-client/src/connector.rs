//! Connector — one logical connection per agent.
//!
//! [`Connector::connect`] performs the registration handshake (the one
//! synchronous request/response exchange in this layer), then spawns a
//! supervised receive-loop task. All later system requests are
//! fire-and-forget; correlation with their responses happens through
//! handlers registered with [`Connector::register_system_handler`].
//!
//! The receive loop is sequential: handlers are awaited inline, so a
//! slow handler delays every subsequent receive on the connection.
//! That is a deliberate simplicity/latency tradeoff, not a bug.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use swarmlink_wire::{
    decode_envelope, encode_envelope, Direction, Envelope, Message, SystemRequest,
    SystemResponse, WireError, GET_PROTOCOL_MANIFEST, LIST_AGENTS, LIST_PROTOCOLS,
    REGISTER_AGENT,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsFrame>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Errors from the connector layer.
///
/// Public operations the wire contract defines as boolean-returning
/// (`connect`, `send_*`, `disconnect`) log these and map them to `false`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),
    #[error("Registration rejected by network")]
    RegistrationRejected,
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Not connected")]
    NotConnected,
}

/// Handler for application messages of one `message_type`.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message);
}

/// Handler for system responses to one command.
#[async_trait]
pub trait SystemHandler: Send + Sync + 'static {
    async fn handle(&self, response: SystemResponse);
}

/// Handles the network connection and message passing for one agent.
pub struct Connector {
    host: String,
    port: u16,
    agent_id: String,
    metadata: Map<String, Value>,
    connected: AtomicBool,
    /// Write half of the websocket. The read half is owned by the
    /// receive-loop task; the two share no state besides `connected`.
    writer: Mutex<Option<WsSink>>,
    message_handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
    system_handlers: RwLock<HashMap<String, Arc<dyn SystemHandler>>>,
    shutdown_tx: watch::Sender<bool>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Connector {
    /// Create a connector for `agent_id`. `metadata` is sent verbatim
    /// with the registration request.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        agent_id: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            host: host.into(),
            port,
            agent_id: agent_id.into(),
            metadata,
            connected: AtomicBool::new(false),
            writer: Mutex::new(None),
            message_handlers: RwLock::new(HashMap::new()),
            system_handlers: RwLock::new(HashMap::new()),
            shutdown_tx,
            listener: Mutex::new(None),
        })
    }

    /// The agent this connector belongs to.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Snapshot of the connected flag. The receive loop clears it when
    /// it terminates, so a `false` after a successful connect means the
    /// connection died and the owner must decide whether to reconnect.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connect to the network server and register the agent.
    ///
    /// Blocks for exactly one response frame after sending the
    /// registration request. Returns true only when the server answers
    /// `system_response / register_agent / success`. No retries — retry
    /// policy belongs to the caller.
    pub async fn connect(self: &Arc<Self>) -> bool {
        match self.try_connect().await {
            Ok(()) => true,
            Err(e) => {
                error!("Connection error: {e}");
                false
            }
        }
    }

    async fn try_connect(self: &Arc<Self>) -> Result<(), ClientError> {
        let url = format!("ws://{}:{}", self.host, self.port);
        let (mut stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;

        let mut params = Map::new();
        params.insert("agent_id".to_string(), Value::String(self.agent_id.clone()));
        params.insert("metadata".to_string(), Value::Object(self.metadata.clone()));
        let request = Envelope::SystemRequest(SystemRequest::new(REGISTER_AGENT, params));
        stream.send(WsFrame::Text(encode_envelope(&request)?)).await?;

        // Wait for the registration response.
        let raw = match stream.next().await {
            Some(Ok(WsFrame::Text(text))) => text,
            Some(Err(e)) => return Err(e.into()),
            _ => {
                let _ = stream.close(None).await;
                return Err(ClientError::ConnectionClosed);
            }
        };

        match decode_envelope(&raw)? {
            Envelope::SystemResponse(resp)
                if resp.command == REGISTER_AGENT && resp.success =>
            {
                let network_name = resp
                    .extra
                    .get("network_name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                info!("Connected to network: {network_name}");
            }
            _ => {
                let _ = stream.close(None).await;
                return Err(ClientError::RegistrationRejected);
            }
        }

        let (sink, source) = stream.split();
        *self.writer.lock().await = Some(sink);
        self.shutdown_tx.send_replace(false);
        self.connected.store(true, Ordering::SeqCst);

        let connector = Arc::clone(self);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            connector.listen(source, shutdown_rx).await;
        });
        *self.listener.lock().await = Some(handle);

        Ok(())
    }

    /// Disconnect from the network server.
    ///
    /// Idempotent: returns false if already disconnected. Joins the
    /// receive-loop task so its termination is observable; in-flight
    /// handlers run to completion first.
    pub async fn disconnect(&self) -> bool {
        let mut writer = self.writer.lock().await;
        let Some(mut sink) = writer.take() else {
            return false;
        };
        drop(writer);

        self.shutdown_tx.send_replace(true);
        if let Err(e) = sink.close().await {
            error!("Error disconnecting: {e}");
        }
        self.connected.store(false, Ordering::SeqCst);

        if let Some(handle) = self.listener.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Receive loop task failed: {e}");
            }
        }

        info!("Agent {} disconnected from network", self.agent_id);
        true
    }

    /// Register a handler for a message type. The last registration for
    /// a given type wins — this layer does no fan-out.
    pub fn register_message_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) {
        let message_type = message_type.into();
        debug!("Registered handler for message type: {message_type}");
        self.message_handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(message_type, handler);
    }

    /// Register a handler for responses to a system command. Last
    /// registration wins.
    pub fn register_system_handler(
        &self,
        command: impl Into<String>,
        handler: Arc<dyn SystemHandler>,
    ) {
        let command = command.into();
        debug!("Registered handler for system command: {command}");
        self.system_handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(command, handler);
    }

    /// The receive loop. One frame at a time; terminates on transport
    /// close (clean) or any error, clearing the connected flag either way.
    async fn listen(&self, mut source: WsSource, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            let frame = tokio::select! {
                frame = source.next() => frame,
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!("Receive loop shutting down");
                        break;
                    }
                    continue;
                }
            };

            let frame = match frame {
                Some(Ok(f)) => f,
                Some(Err(e)) => {
                    error!("Error in receive loop: {e}");
                    break;
                }
                None => {
                    info!("Disconnected from network");
                    break;
                }
            };

            let text = match frame {
                WsFrame::Text(text) => text,
                WsFrame::Close(_) => {
                    info!("Connection closed by network");
                    break;
                }
                _ => continue,
            };

            let envelope = match decode_envelope(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!("Error in receive loop: {e}");
                    break;
                }
            };

            match envelope {
                Envelope::Message { data } => {
                    debug!(
                        "Received message from {} with ID {}",
                        data.sender_id, data.message_id
                    );
                    self.consume_message(data).await;
                }
                Envelope::SystemResponse(resp) => {
                    let handler = self
                        .system_handlers
                        .read()
                        .unwrap_or_else(|e| e.into_inner())
                        .get(&resp.command)
                        .cloned();
                    match handler {
                        Some(handler) => handler.handle(resp).await,
                        None => {
                            debug!("Received system response for command {}", resp.command)
                        }
                    }
                }
                Envelope::SystemRequest(req) => {
                    debug!("Ignoring system request {} from network", req.command);
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
    }

    /// Consume a message on the agent side: stamp inbound direction on
    /// protocol messages, then dispatch by message type. No handler
    /// means the message is dropped.
    pub async fn consume_message(&self, mut message: Message) {
        if message.is_protocol() {
            message.stamp_hop(Direction::Inbound, &self.agent_id);
        }

        let handler = self
            .message_handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(message.message_type())
            .cloned();
        match handler {
            Some(handler) => handler.handle(message).await,
            None => debug!("No handler for message type {}", message.message_type()),
        }
    }

    /// Send a message to the network. Fills `sender_id` when empty and
    /// stamps protocol messages outbound. Returns false on any failure;
    /// callers must check the result.
    pub async fn send_message(&self, mut message: Message) -> bool {
        if !self.is_connected() {
            warn!("Agent {} is not connected to a network", self.agent_id);
            return false;
        }

        if message.sender_id.is_empty() {
            message.sender_id = self.agent_id.clone();
        }
        if message.is_protocol() {
            message.stamp_hop(Direction::Outbound, &self.agent_id);
        }

        let message_id = message.message_id.clone();
        match self.write(&Envelope::Message { data: message }).await {
            Ok(()) => {
                debug!("Message sent: {message_id}");
                true
            }
            Err(e) => {
                error!("Failed to send message: {e}");
                false
            }
        }
    }

    /// Send a direct message to another agent.
    pub async fn send_direct_message(&self, message: Message) -> bool {
        self.send_message(message).await
    }

    /// Send a broadcast message to all connected agents.
    pub async fn send_broadcast_message(&self, message: Message) -> bool {
        self.send_message(message).await
    }

    /// Send a protocol message.
    pub async fn send_protocol_message(&self, message: Message) -> bool {
        self.send_message(message).await
    }

    /// Fire-and-forget system request. The response, if any, arrives on
    /// the receive loop and goes to the handler registered for `command`.
    pub async fn send_system_request(&self, command: &str, params: Map<String, Value>) -> bool {
        if !self.is_connected() {
            warn!("Agent {} is not connected to a network", self.agent_id);
            return false;
        }

        let request = Envelope::SystemRequest(SystemRequest::new(command, params));
        match self.write(&request).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send system request {command}: {e}");
                false
            }
        }
    }

    /// Request the list of agents on the network.
    pub async fn list_agents(&self) -> bool {
        self.send_system_request(LIST_AGENTS, Map::new()).await
    }

    /// Request the list of protocols the network runs.
    pub async fn list_protocols(&self) -> bool {
        self.send_system_request(LIST_PROTOCOLS, Map::new()).await
    }

    /// Request the manifest of a named protocol.
    pub async fn get_protocol_manifest(&self, protocol_name: &str) -> bool {
        let mut params = Map::new();
        params.insert(
            "protocol_name".to_string(),
            Value::String(protocol_name.to_string()),
        );
        self.send_system_request(GET_PROTOCOL_MANIFEST, params).await
    }

    async fn write(&self, envelope: &Envelope) -> Result<(), ClientError> {
        let raw = encode_envelope(envelope)?;
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(ClientError::NotConnected)?;
        sink.send(WsFrame::Text(raw)).await?;
        Ok(())
    }
}
