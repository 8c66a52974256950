// ABOUTME: Persisted credential state enabling reconnection without re-pairing.
// ABOUTME: Saved on every credential rotation signal from the transport.

use crate::util::write_atomic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Credential and registration state for the network session.
///
/// The credential payload is opaque to the agent; its shape belongs to the
/// protocol library. The agent only loads it, hands it to the transport, and
/// writes it back whenever the transport signals a rotation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    /// Opaque credential material owned by the protocol library.
    #[serde(default)]
    pub creds: serde_json::Value,
    /// Whether this session has completed the pairing exchange.
    #[serde(default)]
    pub registered: bool,
    /// Our own address on the network, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jid: Option<String>,
}

/// On-disk home for the [`Session`] document.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create session directory {}", dir.display()))?;
        Ok(Self {
            path: dir.join("session.json"),
        })
    }

    /// Load the persisted session, or start unauthenticated when none exists.
    /// A corrupt document also starts unauthenticated: the operator re-pairs
    /// rather than the agent crash-looping on an unreadable file.
    pub fn load(&self) -> Result<Session> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No persisted session, starting unregistered");
                return Ok(Session::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };

        match serde_json::from_str(&text) {
            Ok(session) => Ok(session),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "Persisted session unreadable, starting unregistered"
                );
                Ok(Session::default())
            }
        }
    }

    /// Persist the session. Called on every credential rotation, so this must
    /// not lose the previous document on a partial write.
    pub fn save(&self, session: &Session) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(session).context("Failed to serialize session")?;
        write_atomic(&self.path, &bytes)
    }
}
