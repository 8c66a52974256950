// ABOUTME: Bounded in-memory mirror of chats, contacts, messages, and presence.
// ABOUTME: Persists as one JSON document; eviction is insertion-order, oldest first.

use crate::persist::StoreWriter;
use crate::transport::{MessageKey, RawMessage};
use crate::util::write_atomic;
use anyhow::{anyhow, Context, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Cap applied to each per-chat message sequence and to the contacts and
/// presences mappings.
pub const MAX_STORE_ITEMS: usize = 100;

/// One entry in the chat list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub conversation_timestamp: i64,
}

/// Directory entry for a contact. Populated opportunistically from push names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<String>,
}

/// One cached message, in the same shape the persisted document uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub key: MessageKey,
    #[serde(default)]
    pub message_timestamp: Option<i64>,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub message: Option<serde_json::Value>,
}

impl MessageRecord {
    pub fn from_raw(raw: &RawMessage) -> Self {
        Self {
            key: raw.key.clone(),
            message_timestamp: raw.message_timestamp,
            push_name: raw.push_name.clone(),
            message: raw.message.clone(),
        }
    }
}

/// Last-seen bookkeeping for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub last_online: i64,
}

/// Mapping with stable insertion order and oldest-first eviction.
///
/// Re-upserting an existing key keeps its original eviction priority; this is
/// deliberately insertion-order eviction, not LRU.
#[derive(Debug, Clone)]
pub struct BoundedMap<V> {
    entries: HashMap<String, V>,
    order: VecDeque<String>,
}

impl<V> Default for BoundedMap<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }
}

impl<V> BoundedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order, oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }

    /// Drop oldest-inserted entries until at most `cap` remain.
    pub fn evict_to(&mut self, cap: usize) {
        while self.entries.len() > cap {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

impl<V: Serialize> Serialize for BoundedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for key in &self.order {
            if let Some(value) = self.entries.get(key) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for BoundedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BoundedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for BoundedMapVisitor<V> {
            type Value = BoundedMap<V>;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                // Document order is the insertion order of the run that wrote
                // it, so eviction priority survives a restart.
                let mut map = BoundedMap::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(BoundedMapVisitor(PhantomData))
    }
}

/// In-memory mirror of the network state this agent cares about. A cache, not
/// a source of truth: losing it costs nothing but warm-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheStore {
    pub chats: Vec<ChatSummary>,
    pub contacts: BoundedMap<ContactInfo>,
    pub messages: BTreeMap<String, Vec<MessageRecord>>,
    pub presences: BoundedMap<Presence>,
}

impl CacheStore {
    /// Append a message to the chat's sequence, creating the chat entry on
    /// first sight, and truncate the sequence to the most recent
    /// [`MAX_STORE_ITEMS`] entries.
    pub fn record_message(&mut self, chat_id: &str, record: MessageRecord) {
        let fallback_ts = chrono::Utc::now().timestamp_millis();
        let conversation_ts = record.message_timestamp.unwrap_or(fallback_ts);

        let sequence = self.messages.entry(chat_id.to_string()).or_default();
        sequence.push(record);
        if sequence.len() > MAX_STORE_ITEMS {
            let excess = sequence.len() - MAX_STORE_ITEMS;
            sequence.drain(..excess);
        }

        if !self.chats.iter().any(|chat| chat.id == chat_id) {
            self.chats.push(ChatSummary {
                id: chat_id.to_string(),
                conversation_timestamp: conversation_ts,
            });
        }
    }

    /// Upsert a user's last-online timestamp, evicting the oldest-inserted
    /// presences beyond the cap.
    pub fn record_presence(&mut self, user_id: &str, timestamp_ms: i64) {
        self.presences.insert(
            user_id,
            Presence {
                last_online: timestamp_ms,
            },
        );
        self.presences.evict_to(MAX_STORE_ITEMS);
    }

    pub fn upsert_contact(&mut self, id: &str, info: ContactInfo) {
        self.contacts.insert(id, info);
        self.trim_contacts();
    }

    /// Evict oldest-inserted contacts beyond the cap.
    pub fn trim_contacts(&mut self) {
        self.contacts.evict_to(MAX_STORE_ITEMS);
    }

    /// Load the persisted document. Missing or corrupt documents yield the
    /// empty store: this is a cache, so losing it must never stop startup.
    pub fn load(path: &Path) -> CacheStore {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No cache store document, starting empty");
                return CacheStore::default();
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "Failed to read cache store, starting empty");
                return CacheStore::default();
            }
        };

        match serde_json::from_str(&text) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "Cache store document corrupt, starting empty");
                CacheStore::default()
            }
        }
    }

    /// Serialize the whole store and atomically replace the document on disk.
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(self).context("Failed to serialize cache store")?;
        write_atomic(path, &bytes)
    }
}

/// Shared handle over the cache store. Every mutation schedules a debounced
/// persist through the attached [`StoreWriter`].
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<CacheStore>>,
    writer: StoreWriter,
}

impl StoreHandle {
    /// Wrap `store` and spawn its background writer targeting `path`.
    pub fn spawn(store: CacheStore, path: PathBuf) -> Self {
        let inner = Arc::new(Mutex::new(store));
        let writer = StoreWriter::spawn(Arc::clone(&inner), path);
        Self { inner, writer }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheStore>> {
        self.inner
            .lock()
            .map_err(|e| anyhow!("Cache store mutex poisoned: {e}"))
    }

    pub fn record_message(&self, chat_id: &str, record: MessageRecord) -> Result<()> {
        self.lock()?.record_message(chat_id, record);
        self.writer.mark_dirty();
        Ok(())
    }

    pub fn record_presence(&self, user_id: &str, timestamp_ms: i64) -> Result<()> {
        self.lock()?.record_presence(user_id, timestamp_ms);
        self.writer.mark_dirty();
        Ok(())
    }

    pub fn upsert_contact(&self, id: &str, info: ContactInfo) -> Result<()> {
        self.lock()?.upsert_contact(id, info);
        self.writer.mark_dirty();
        Ok(())
    }

    pub fn trim_contacts(&self) -> Result<()> {
        self.lock()?.trim_contacts();
        self.writer.mark_dirty();
        Ok(())
    }

    /// Read access under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&CacheStore) -> R) -> Result<R> {
        Ok(f(&*self.lock()?))
    }
}
