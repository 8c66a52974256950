// ABOUTME: Wire-facing types and trait seams for the external messaging protocol.
// ABOUTME: The codec and cryptographic handshake live behind the Transport trait.

use crate::session::Session;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod mock;

/// Identity of one inbound message on the network. Field names follow the
/// wire shape, which also appears verbatim in the persisted cache document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub id: String,
    pub remote_jid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
    #[serde(default)]
    pub from_me: bool,
}

/// Raw inbound message as delivered by the protocol library. The body is an
/// opaque document; the agent only inspects its outermost envelope key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub key: MessageKey,
    #[serde(default)]
    pub message: Option<serde_json::Value>,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub message_timestamp: Option<i64>,
}

/// Reason code attached to a connection close signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The session was invalidated server-side. Reconnecting is impossible
    /// without re-pairing.
    LoggedOut,
    /// The server asked for an immediate restart of the connection.
    RestartRequired,
    /// Any other status code, including none at all.
    Other(Option<u32>),
}

/// Signals emitted on the event stream of one connection handle.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Opened,
    Closed { reason: CloseReason },
    /// At-least-once batch of inbound messages.
    Messages(Vec<RawMessage>),
    /// Credential material rotated; must be persisted immediately.
    CredentialsChanged(Session),
}

/// Options passed to the protocol library when opening a connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub auth: Session,
    pub protocol_version: [u32; 3],
    pub client_name: String,
    pub connect_timeout: Duration,
    pub sync_full_history: bool,
    pub mark_online_on_connect: bool,
}

/// Factory seam for the external protocol library. Each call yields a fresh
/// handle plus its event stream; old handles are simply dropped.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        opts: ConnectOptions,
    ) -> Result<(Arc<dyn ConnectionHandle>, mpsc::Receiver<ConnectionEvent>)>;
}

/// Outbound operations on one live connection.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// Acknowledge messages as read.
    async fn read_messages(&self, keys: &[MessageKey]) -> Result<()>;
    /// Start the pairing exchange for an unregistered session.
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String>;
    /// Subscribe to a broadcast channel.
    async fn subscribe_channel(&self, channel_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_message_uses_wire_field_names() {
        let raw: RawMessage = serde_json::from_value(json!({
            "key": {
                "id": "3EB0",
                "remoteJid": "628@s.whatsapp.net",
                "fromMe": false
            },
            "message": {"conversation": "hi"},
            "pushName": "Ayu",
            "messageTimestamp": 1700000000
        }))
        .unwrap();

        assert_eq!(raw.key.remote_jid, "628@s.whatsapp.net");
        assert_eq!(raw.push_name.as_deref(), Some("Ayu"));
        assert!(raw.key.participant.is_none());

        let out = serde_json::to_value(&raw).unwrap();
        assert_eq!(out["key"]["remoteJid"], "628@s.whatsapp.net");
        assert_eq!(out["messageTimestamp"], 1700000000);
    }
}
