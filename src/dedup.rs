// ABOUTME: Deduplication guard for at-least-once message delivery.
// ABOUTME: Tracks message key ids observed during the current process run.

use std::collections::HashSet;

/// Message key ids already processed in this run.
///
/// Never persisted and never cleared on reconnect: the set covers the overlap
/// window between an old and a new connection handle. Growth is bounded in
/// practice by process lifetime, which is itself bounded by reconnect cycles.
#[derive(Debug, Default)]
pub struct SeenEvents {
    ids: HashSet<String>,
}

impl SeenEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false the first time an id is observed and marks it seen;
    /// every later call for the same id returns true.
    pub fn seen(&mut self, id: &str) -> bool {
        !self.ids.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
