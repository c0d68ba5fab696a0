//! Simple messaging protocol — direct and broadcast messaging between
//! agents with text and file attachments.
//!
//! The protocol augments and records messages; it does not deliver them.
//! Inline base64 attachments are converted into stored files plus a
//! lightweight reference left in the message, and peers retrieve or
//! delete stored files through `get_file` / `delete_file` protocol
//! actions answered over the [`OutboundSender`].

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Map, Value};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::protocol::{NetworkProtocol, OutboundSender};
use swarmlink_wire::{Direction, Message};

/// Name this protocol registers under.
pub const PROTOCOL_NAME: &str = "simple_messaging";

/// Maximum number of messages kept in history.
pub const MAX_HISTORY_SIZE: usize = 1000;

/// How many oldest-by-timestamp entries one trim pass evicts.
pub const HISTORY_TRIM_BATCH: usize = 100;

/// Errors from attachment storage. Attachment processing is best-effort
/// per file: these are logged and the offending entry dropped, never
/// propagated to the message sender.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Base64 decode error: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mutable protocol state, guarded by one lock per instance.
///
/// The lock is only ever held in short scopes that never cross an await
/// point, which serializes history/agent-set access when multiple
/// connections deliver concurrently.
struct ProtocolState {
    active_agents: HashSet<String>,
    history: HashMap<String, Message>,
}

/// The simple messaging network protocol.
pub struct SimpleMessaging {
    state: Mutex<ProtocolState>,
    /// Temporary file-storage root; taken (and removed) on shutdown.
    storage: Mutex<Option<TempDir>>,
    network: OnceLock<Arc<dyn OutboundSender>>,
}

impl SimpleMessaging {
    /// Create the protocol with a fresh temporary storage root.
    pub fn new() -> std::io::Result<Self> {
        let storage = tempfile::Builder::new()
            .prefix("swarmlink_files_")
            .tempdir()?;
        info!(
            "Initializing simple messaging protocol with file storage at {}",
            storage.path().display()
        );
        Ok(Self {
            state: Mutex::new(ProtocolState {
                active_agents: HashSet::new(),
                history: HashMap::new(),
            }),
            storage: Mutex::new(Some(storage)),
            network: OnceLock::new(),
        })
    }

    /// Current storage root, or `None` after shutdown.
    pub fn storage_path(&self) -> Option<PathBuf> {
        let storage = self.storage.lock().unwrap_or_else(|e| e.into_inner());
        storage.as_ref().map(|dir| dir.path().to_path_buf())
    }

    /// Process a direct message: store attachments, record in history,
    /// hand the (possibly mutated) message back for further routing.
    pub async fn process_direct_message(&self, mut message: Message) -> Option<Message> {
        debug!("Processing direct message from {}", message.sender_id);
        self.process_file_attachments(&mut message).await;
        self.add_to_history(message.clone());
        Some(message)
    }

    /// Process a broadcast message; same augment-and-record semantics
    /// as direct messages.
    pub async fn process_broadcast_message(&self, mut message: Message) -> Option<Message> {
        debug!("Processing broadcast message from {}", message.sender_id);
        self.process_file_attachments(&mut message).await;
        self.add_to_history(message.clone());
        Some(message)
    }

    /// Process a protocol message: record it, then act on
    /// `content.action`. Unknown or missing actions are ignored so the
    /// action set can grow without breaking older peers.
    pub async fn process_protocol_message(&self, message: Message) {
        debug!("Processing protocol message from {}", message.sender_id);
        self.add_to_history(message.clone());

        let action = message
            .content
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("");
        let file_id = message.content.get("file_id").and_then(Value::as_str);

        match (action, file_id) {
            ("get_file", Some(file_id)) => {
                self.handle_file_download(&message.sender_id, file_id, &message.message_id)
                    .await;
            }
            ("delete_file", Some(file_id)) => {
                self.handle_file_deletion(&message.sender_id, file_id, &message.message_id)
                    .await;
            }
            _ => {}
        }
    }

    /// Convert inline attachments into stored files. Best-effort per
    /// file: a bad entry is logged and dropped, the batch continues.
    async fn process_file_attachments(&self, message: &mut Message) {
        let Some(root) = self.storage_path() else {
            return;
        };
        let Some(files) = message.content.get("files").and_then(Value::as_array).cloned()
        else {
            return;
        };

        let mut processed = Vec::new();
        for entry in &files {
            let content = entry.get("content").and_then(Value::as_str);
            let filename = entry.get("filename").and_then(Value::as_str);
            let (Some(content), Some(filename)) = (content, filename) else {
                continue;
            };

            let file_id = uuid::Uuid::new_v4().to_string();
            match store_attachment(root.join(&file_id), content).await {
                Ok(size) => {
                    let mime_type = entry
                        .get("mime_type")
                        .and_then(Value::as_str)
                        .unwrap_or("application/octet-stream");
                    processed.push(json!({
                        "file_id": file_id,
                        "filename": filename,
                        "size": size,
                        "mime_type": mime_type,
                    }));
                    debug!("Saved file attachment {filename} with ID {file_id}");
                }
                Err(e) => error!("Error saving file attachment: {e}"),
            }
        }

        if !processed.is_empty() {
            message
                .content
                .insert("files".to_string(), Value::Array(processed));
        }
    }

    /// Answer a `get_file` request. Every outcome, including failure,
    /// goes back to the requester as a `file_download_response`.
    async fn handle_file_download(&self, agent_id: &str, file_id: &str, request_id: &str) {
        let path = self.storage_path().map(|root| root.join(file_id));
        let path = match path {
            Some(path) if path.exists() => path,
            _ => {
                self.send_response(
                    agent_id,
                    json!({
                        "action": "file_download_response",
                        "success": false,
                        "error": "File not found",
                        "request_id": request_id,
                    }),
                )
                .await;
                return;
            }
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                self.send_response(
                    agent_id,
                    json!({
                        "action": "file_download_response",
                        "success": true,
                        "file_id": file_id,
                        "content": BASE64.encode(&bytes),
                        "request_id": request_id,
                    }),
                )
                .await;
                debug!("Sent file {file_id} to agent {agent_id}");
            }
            Err(e) => {
                error!("Error sending file {file_id} to agent {agent_id}: {e}");
                self.send_response(
                    agent_id,
                    json!({
                        "action": "file_download_response",
                        "success": false,
                        "error": format!("Error reading file: {e}"),
                        "request_id": request_id,
                    }),
                )
                .await;
            }
        }
    }

    /// Answer a `delete_file` request, symmetric to downloads.
    async fn handle_file_deletion(&self, agent_id: &str, file_id: &str, request_id: &str) {
        let path = self.storage_path().map(|root| root.join(file_id));
        let path = match path {
            Some(path) if path.exists() => path,
            _ => {
                self.send_response(
                    agent_id,
                    json!({
                        "action": "file_deletion_response",
                        "success": false,
                        "error": "File not found",
                        "request_id": request_id,
                    }),
                )
                .await;
                return;
            }
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.send_response(
                    agent_id,
                    json!({
                        "action": "file_deletion_response",
                        "success": true,
                        "file_id": file_id,
                        "request_id": request_id,
                    }),
                )
                .await;
                debug!("Deleted file {file_id} for agent {agent_id}");
            }
            Err(e) => {
                error!("Error deleting file {file_id} for agent {agent_id}: {e}");
                self.send_response(
                    agent_id,
                    json!({
                        "action": "file_deletion_response",
                        "success": false,
                        "error": format!("Error deleting file: {e}"),
                        "request_id": request_id,
                    }),
                )
                .await;
            }
        }
    }

    /// Route a protocol response back to `agent_id` through the network.
    async fn send_response(&self, agent_id: &str, content: Value) {
        let Some(network) = self.network.get() else {
            error!("Protocol {PROTOCOL_NAME} is not registered with a network");
            return;
        };

        let Value::Object(content) = content else {
            unreachable!("protocol responses are JSON objects");
        };
        let mut response = Message::protocol(PROTOCOL_NAME, content);
        response.sender_id = network.local_id();
        response.stamp_hop(Direction::Outbound, agent_id);

        if !network.send_protocol_message(response).await {
            error!("Failed to send protocol response to agent {agent_id}");
        }
    }

    /// Record a message, evicting the oldest batch when over capacity.
    fn add_to_history(&self, message: Message) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.history.insert(message.message_id.clone(), message);

        if state.history.len() > MAX_HISTORY_SIZE {
            let mut by_age: Vec<(chrono::DateTime<chrono::Utc>, String)> = state
                .history
                .values()
                .map(|m| (m.timestamp, m.message_id.clone()))
                .collect();
            by_age.sort();
            for (_, old_id) in by_age.into_iter().take(HISTORY_TRIM_BATCH) {
                state.history.remove(&old_id);
            }
        }
    }
}

#[async_trait]
impl NetworkProtocol for SimpleMessaging {
    fn name(&self) -> &str {
        PROTOCOL_NAME
    }

    fn register_agent(&self, agent_id: &str, _metadata: &Map<String, Value>) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.active_agents.insert(agent_id.to_string());
        }

        // Reserved per-agent subdirectory for future scoping.
        if let Some(root) = self.storage_path() {
            if let Err(e) = std::fs::create_dir_all(root.join(agent_id)) {
                error!("Error creating storage directory for agent {agent_id}: {e}");
            }
        }

        info!("Registered agent {agent_id} with simple messaging protocol");
        true
    }

    fn unregister_agent(&self, agent_id: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.active_agents.remove(agent_id) {
            info!("Unregistered agent {agent_id} from simple messaging protocol");
        }
        true
    }

    fn state(&self) -> Value {
        let (active_agents, history_size) = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            (state.active_agents.len(), state.history.len())
        };

        let root = self.storage_path();
        let stored_files = root
            .as_ref()
            .and_then(|root| std::fs::read_dir(root).ok())
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.path().is_file())
                    .count()
            })
            .unwrap_or(0);

        json!({
            "active_agents": active_agents,
            "message_history_size": history_size,
            "stored_files": stored_files,
            "file_storage_path": root.map(|p| p.display().to_string()).unwrap_or_default(),
        })
    }

    fn shutdown(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.active_agents.clear();
            state.history.clear();
        }

        let storage = {
            let mut storage = self.storage.lock().unwrap_or_else(|e| e.into_inner());
            storage.take()
        };
        if let Some(dir) = storage {
            match dir.close() {
                Ok(()) => info!("Cleaned up temporary file storage directory"),
                Err(e) => error!("Error cleaning up temporary directory: {e}"),
            }
        }

        true
    }

    fn register_with_network(&self, sender: Arc<dyn OutboundSender>) -> bool {
        if self.network.set(sender).is_err() {
            warn!("Protocol {PROTOCOL_NAME} is already registered with a network");
            return false;
        }
        info!("Protocol {PROTOCOL_NAME} registered with network");
        true
    }
}

async fn store_attachment(path: PathBuf, encoded: &str) -> Result<usize, AttachmentError> {
    let bytes = BASE64.decode(encoded)?;
    let size = bytes.len();
    tokio::fs::write(&path, &bytes).await?;
    Ok(size)
}
