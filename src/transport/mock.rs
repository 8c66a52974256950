// ABOUTME: Scripted in-process transport for tests and offline runs.
// ABOUTME: Each connect pops the next scripted event cycle; outbound calls are recorded.

use super::{ConnectOptions, ConnectionEvent, ConnectionHandle, MessageKey, Transport};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Outbound calls observed across all handles created by one [`MockTransport`].
#[derive(Debug, Default)]
pub struct RecordedCalls {
    connects: Mutex<Vec<tokio::time::Instant>>,
    read_messages: Mutex<Vec<Vec<MessageKey>>>,
    subscribed: Mutex<Vec<String>>,
    pairing_requests: Mutex<Vec<String>>,
}

impl RecordedCalls {
    pub fn connect_count(&self) -> usize {
        self.connects.lock().expect("mock mutex poisoned").len()
    }

    /// Instants at which each connect happened, in order.
    pub fn connect_times(&self) -> Vec<tokio::time::Instant> {
        self.connects.lock().expect("mock mutex poisoned").clone()
    }

    pub fn read_message_keys(&self) -> Vec<Vec<MessageKey>> {
        self.read_messages.lock().expect("mock mutex poisoned").clone()
    }

    pub fn subscribed_channels(&self) -> Vec<String> {
        self.subscribed.lock().expect("mock mutex poisoned").clone()
    }

    pub fn pairing_requests(&self) -> Vec<String> {
        self.pairing_requests.lock().expect("mock mutex poisoned").clone()
    }
}

/// Transport double driven entirely by pre-scripted event cycles.
///
/// Every `connect` pops the next cycle and delivers its events in order. A
/// cycle that does not end in `Closed` leaves the connection idle (the event
/// channel stays open), which is also the behavior once all cycles are spent.
pub struct MockTransport {
    cycles: Mutex<VecDeque<Vec<ConnectionEvent>>>,
    calls: Arc<RecordedCalls>,
    pairing_code: String,
    fail_subscribe: bool,
    failing_connects: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            cycles: Mutex::new(VecDeque::new()),
            calls: Arc::new(RecordedCalls::default()),
            pairing_code: "WRBL-CODE".to_string(),
            fail_subscribe: false,
            failing_connects: AtomicUsize::new(0),
        }
    }

    /// Append one scripted connection cycle.
    pub fn cycle(self, events: Vec<ConnectionEvent>) -> Self {
        self.cycles
            .lock()
            .expect("mock mutex poisoned")
            .push_back(events);
        self
    }

    /// Pairing code returned by `request_pairing_code`.
    pub fn with_pairing_code(mut self, code: &str) -> Self {
        self.pairing_code = code.to_string();
        self
    }

    /// Make every `subscribe_channel` call fail.
    pub fn failing_subscribe(mut self) -> Self {
        self.fail_subscribe = true;
        self
    }

    /// Make the first `n` connect attempts fail before any cycle is served.
    pub fn failing_first_connects(self, n: usize) -> Self {
        self.failing_connects.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Arc<RecordedCalls> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        _opts: ConnectOptions,
    ) -> Result<(Arc<dyn ConnectionHandle>, mpsc::Receiver<ConnectionEvent>)> {
        self.calls
            .connects
            .lock()
            .expect("mock mutex poisoned")
            .push(tokio::time::Instant::now());

        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_connects.store(remaining - 1, Ordering::SeqCst);
            bail!("scripted connect failure");
        }

        let script = self
            .cycles
            .lock()
            .expect("mock mutex poisoned")
            .pop_front()
            .unwrap_or_default();

        let (tx, rx) = mpsc::channel(script.len() + 1);
        for event in script {
            // Capacity covers the whole script, so this never blocks.
            let _ = tx.send(event).await;
        }

        let handle = MockHandle {
            calls: Arc::clone(&self.calls),
            pairing_code: self.pairing_code.clone(),
            fail_subscribe: self.fail_subscribe,
            _events: tx,
        };
        Ok((Arc::new(handle), rx))
    }
}

/// Handle returned by [`MockTransport::connect`]. Holding the sender keeps the
/// event channel open, so a script without a `Closed` event models an idle
/// connection rather than a dropped one.
pub struct MockHandle {
    calls: Arc<RecordedCalls>,
    pairing_code: String,
    fail_subscribe: bool,
    _events: mpsc::Sender<ConnectionEvent>,
}

#[async_trait]
impl ConnectionHandle for MockHandle {
    async fn read_messages(&self, keys: &[MessageKey]) -> Result<()> {
        self.calls
            .read_messages
            .lock()
            .expect("mock mutex poisoned")
            .push(keys.to_vec());
        Ok(())
    }

    async fn request_pairing_code(&self, phone_number: &str) -> Result<String> {
        self.calls
            .pairing_requests
            .lock()
            .expect("mock mutex poisoned")
            .push(phone_number.to_string());
        Ok(self.pairing_code.clone())
    }

    async fn subscribe_channel(&self, channel_id: &str) -> Result<()> {
        self.calls
            .subscribed
            .lock()
            .expect("mock mutex poisoned")
            .push(channel_id.to_string());
        if self.fail_subscribe {
            bail!("scripted subscribe failure");
        }
        Ok(())
    }
}
