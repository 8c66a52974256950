// ABOUTME: Routes deduplicated, cache-updated events to the command handler.
// ABOUTME: Unwraps ephemeral envelopes and acknowledges broadcast-status events.

use crate::store::StoreHandle;
use crate::transport::{ConnectionHandle, RawMessage};
use anyhow::Result;
use async_trait::async_trait;

/// Pseudo-chat carrying status broadcasts. These are acknowledged and dropped,
/// never dispatched.
pub const STATUS_BROADCAST_JID: &str = "status@broadcast";

const EPHEMERAL_KEY: &str = "ephemeralMessage";

/// Business-logic seam. Invoked once per routed, deduplicated event with the
/// normalized message, the raw batch it arrived in, and the cache store.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        conn: &dyn ConnectionHandle,
        event: &RawMessage,
        batch: &[RawMessage],
        raw: &RawMessage,
        store: &StoreHandle,
    ) -> Result<()>;
}

/// Handler used when no command layer is wired in; logs and moves on.
pub struct LoggingHandler;

#[async_trait]
impl CommandHandler for LoggingHandler {
    async fn handle(
        &self,
        _conn: &dyn ConnectionHandle,
        event: &RawMessage,
        _batch: &[RawMessage],
        _raw: &RawMessage,
        _store: &StoreHandle,
    ) -> Result<()> {
        tracing::info!(
            chat = %event.key.remote_jid,
            from_me = event.key.from_me,
            push_name = event.push_name.as_deref().unwrap_or(""),
            "Inbound message"
        );
        Ok(())
    }
}

/// Strip one layer of ephemeral wrapping: a body whose sole key is the
/// ephemeral envelope is replaced by its inner message.
pub fn unwrap_ephemeral(message: &serde_json::Value) -> serde_json::Value {
    if let Some(object) = message.as_object() {
        if object.len() == 1 {
            if let Some(inner) = object.get(EPHEMERAL_KEY).and_then(|env| env.get("message")) {
                return inner.clone();
            }
        }
    }
    message.clone()
}

/// Forward one deduplicated, cache-updated event to the command handler.
///
/// Broadcast-status events are marked read and dropped. A handler failure is
/// logged and swallowed: one poisoned event must never stop the stream.
pub async fn route(
    conn: &dyn ConnectionHandle,
    handler: &dyn CommandHandler,
    batch: &[RawMessage],
    raw: &RawMessage,
    store: &StoreHandle,
) {
    let mut event = raw.clone();
    if let Some(body) = &event.message {
        event.message = Some(unwrap_ephemeral(body));
    }

    if event.key.remote_jid == STATUS_BROADCAST_JID {
        if let Err(e) = conn.read_messages(std::slice::from_ref(&event.key)).await {
            tracing::warn!(error = %e, id = %event.key.id, "Failed to mark broadcast status as read");
        }
        return;
    }

    if let Err(e) = handler.handle(conn, &event, batch, raw, store).await {
        tracing::error!(error = %e, id = %raw.key.id, "Command handler failed for event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sole_ephemeral_key_is_unwrapped() {
        let wrapped = json!({
            "ephemeralMessage": {
                "message": {"conversation": "secret"}
            }
        });
        assert_eq!(unwrap_ephemeral(&wrapped), json!({"conversation": "secret"}));
    }

    #[test]
    fn plain_message_passes_through() {
        let plain = json!({"conversation": "hello"});
        assert_eq!(unwrap_ephemeral(&plain), plain);
    }

    #[test]
    fn ephemeral_key_beside_others_is_not_unwrapped() {
        let mixed = json!({
            "ephemeralMessage": {"message": {"conversation": "x"}},
            "conversation": "y"
        });
        assert_eq!(unwrap_ephemeral(&mixed), mixed);
    }

    #[test]
    fn only_one_layer_is_unwrapped() {
        let nested = json!({
            "ephemeralMessage": {
                "message": {
                    "ephemeralMessage": {"message": {"conversation": "deep"}}
                }
            }
        });
        let unwrapped = unwrap_ephemeral(&nested);
        assert!(unwrapped.get(EPHEMERAL_KEY).is_some());
    }
}
