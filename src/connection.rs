// ABOUTME: Connection lifecycle state machine: connect, pair, drive events, reconnect.
// ABOUTME: Classifies close reasons into terminal, restart-now, or retry-with-backoff.

use crate::backoff::BackoffPolicy;
use crate::config::Config;
use crate::dedup::SeenEvents;
use crate::pairing::{self, PairingPrompt};
use crate::router::{self, CommandHandler};
use crate::session::{Session, SessionStore};
use crate::store::{MessageRecord, StoreHandle};
use crate::transport::{ConnectionEvent, ConnectionHandle, CloseReason, RawMessage, Transport};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What to do after a connection cycle ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseAction {
    /// Stop retrying; this session can never reconnect without re-pairing.
    Terminal,
    /// Reconnect immediately, attempt counter untouched.
    Restart,
    /// Reconnect after a backoff delay, then bump the attempt counter.
    Retry,
}

fn classify(reason: CloseReason) -> CloseAction {
    match reason {
        CloseReason::LoggedOut => CloseAction::Terminal,
        CloseReason::RestartRequired => CloseAction::Restart,
        CloseReason::Other(_) => CloseAction::Retry,
    }
}

/// Owns the connection handle and drives the reconnect loop.
///
/// Modeled as an explicit loop rather than re-entrant recursion, so stack
/// depth stays flat across arbitrarily many reconnects. Each cycle creates a
/// fresh handle and event stream; the previous pair is dropped first, so no
/// two connections are ever open concurrently. The dedup guard spans cycles
/// and absorbs any delivery overlap between old and new handles.
pub struct ConnectionManager {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn CommandHandler>,
    prompt: Arc<dyn PairingPrompt>,
    sessions: SessionStore,
    store: StoreHandle,
    seen: SeenEvents,
    backoff: BackoffPolicy,
}

impl ConnectionManager {
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn CommandHandler>,
        prompt: Arc<dyn PairingPrompt>,
        sessions: SessionStore,
        store: StoreHandle,
    ) -> Self {
        Self {
            config,
            transport,
            handler,
            prompt,
            sessions,
            store,
            seen: SeenEvents::new(),
            backoff: BackoffPolicy::default(),
        }
    }

    /// Run until a terminal logout. Transient failures reconnect internally;
    /// the only error this returns means the session is dead.
    pub async fn run(&mut self) -> Result<()> {
        let mut attempts: u32 = 0;
        loop {
            let action = match self.connect_cycle(&mut attempts).await {
                Ok(action) => action,
                Err(e) => {
                    tracing::error!(error = %e, "Connection attempt failed");
                    CloseAction::Retry
                }
            };

            match action {
                CloseAction::Terminal => {
                    anyhow::bail!("session logged out by the network; delete the session and re-pair")
                }
                CloseAction::Restart => {
                    tracing::info!("Reconnecting immediately");
                }
                CloseAction::Retry => {
                    let delay = self.backoff.delay(attempts, &mut rand::thread_rng());
                    tracing::warn!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempts += 1;
                }
            }
        }
    }

    async fn connect_cycle(&mut self, attempts: &mut u32) -> Result<CloseAction> {
        // Credentials may have rotated during the previous cycle.
        let mut session = self.sessions.load()?;
        let opts = self.config.connect_options(session.clone());

        let (handle, mut events) = self
            .transport
            .connect(opts)
            .await
            .context("Failed to open connection")?;

        pairing::ensure_registered(handle.as_ref(), &session, self.prompt.as_ref()).await?;

        self.drive(handle.as_ref(), &mut events, &mut session, attempts)
            .await
    }

    /// Process the event stream of one connection until it closes.
    async fn drive(
        &mut self,
        conn: &dyn ConnectionHandle,
        events: &mut mpsc::Receiver<ConnectionEvent>,
        session: &mut Session,
        attempts: &mut u32,
    ) -> Result<CloseAction> {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Opened => {
                    *attempts = 0;
                    tracing::info!("Connected to the network");
                    self.post_open(conn).await;
                }
                ConnectionEvent::CredentialsChanged(updated) => {
                    *session = updated;
                    if let Err(e) = self.sessions.save(session) {
                        tracing::error!(error = %e, "Failed to persist rotated credentials");
                    }
                }
                ConnectionEvent::Messages(batch) => {
                    self.handle_batch(conn, &batch, session).await;
                }
                ConnectionEvent::Closed { reason } => {
                    tracing::warn!(?reason, "Connection closed");
                    return Ok(classify(reason));
                }
            }
        }

        // Stream ended without a close signal; treat it like an unknown closure.
        tracing::warn!("Event stream ended without a close signal");
        Ok(CloseAction::Retry)
    }

    /// Post-open housekeeping. Failures here are logged, never fatal, and do
    /// not block the open state.
    async fn post_open(&self, conn: &dyn ConnectionHandle) {
        for channel in &self.config.agent.subscribe_channels {
            match conn.subscribe_channel(channel).await {
                Ok(()) => tracing::info!(channel = %channel, "Subscribed to channel"),
                Err(e) => {
                    tracing::warn!(error = %e, channel = %channel, "Channel subscribe failed")
                }
            }
        }
    }

    /// Dedup, cache-update, and route the head message of one inbound batch.
    /// Failures are isolated to the event; the stream keeps flowing.
    async fn handle_batch(
        &mut self,
        conn: &dyn ConnectionHandle,
        batch: &[RawMessage],
        session: &Session,
    ) {
        let Some(raw) = batch.first() else { return };
        if raw.message.is_none() {
            return;
        }
        if self.seen.seen(&raw.key.id) {
            tracing::trace!(id = %raw.key.id, "Duplicate event suppressed");
            return;
        }

        if let Err(e) = self.ingest(raw, session) {
            tracing::error!(error = %e, id = %raw.key.id, "Failed to record event in cache store");
            return;
        }

        router::route(conn, self.handler.as_ref(), batch, raw, &self.store).await;
    }

    /// Mirror one event into the cache store.
    fn ingest(&self, raw: &RawMessage, session: &Session) -> Result<()> {
        let chat_id = &raw.key.remote_jid;
        let user_id = if raw.key.from_me {
            session.jid.clone().unwrap_or_else(|| chat_id.clone())
        } else {
            raw.key.participant.clone().unwrap_or_else(|| chat_id.clone())
        };

        self.store
            .record_presence(&user_id, chrono::Utc::now().timestamp_millis())?;
        self.store.record_message(chat_id, MessageRecord::from_raw(raw))?;
        self.store.trim_contacts()?;
        Ok(())
    }
}
