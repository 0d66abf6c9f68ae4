// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-local store with TTL.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{SessionRecord, SessionStore};
use crate::error::{Result, SessionError};

#[derive(Debug)]
struct Entry {
    record: SessionRecord,
    expires_at: Instant,
}

/// `HashMap` behind a tokio `RwLock`, with a deadline per entry.
///
/// Expired entries are invisible to [`get`](SessionStore::get) and are
/// purged on the next write.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) records.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Overwrite a stored record in place, keeping its deadline.
    ///
    /// Lets tests simulate tampering at rest.
    pub async fn tamper<F>(&self, session_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut SessionRecord),
    {
        match self.entries.write().await.get_mut(session_id) {
            Some(entry) => {
                mutate(&mut entry.record);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(session_id)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.record.clone()))
    }

    async fn put(&self, session_id: &str, record: &SessionRecord, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| SessionError::Config("session TTL is out of range".to_string()))?;
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            session_id.to_string(),
            Entry {
                record: record.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.entries.write().await.remove(session_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
