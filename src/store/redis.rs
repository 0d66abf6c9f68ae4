// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Redis-backed store.
//!
//! Each record is one string key, `<prefix><sessionId>`, holding the JSON
//! document from [`SessionRecord::to_json`]. Saves use `SET key value EX
//! ttl`, so the write and the TTL refresh are a single atomic command and
//! an abandoned turn can never leave half a record behind.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use super::{SessionRecord, SessionStore};
use crate::error::{Result, SessionError};

/// Store adapter over a multiplexed, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisStore {
    /// Connect to `url` (`redis://`, `rediss://` or `unix://`).
    ///
    /// A malformed URL is a configuration error; an unreachable server is
    /// `StoreUnavailable`.
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| SessionError::Config(format!("invalid store URL ({:?})", e.kind())))?;
        let connection = ConnectionManager::new(client).await.map_err(unavailable)?;

        tracing::info!(target: "session::store", adapter = "redis", prefix = %key_prefix, "Connected to session store");
        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn key_for(&self, session_id: &str) -> String {
        store_key(&self.key_prefix, session_id)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("key_prefix", &self.key_prefix).finish()
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection.get(self.key_for(session_id)).await.map_err(unavailable)?;
        raw.as_deref().map(SessionRecord::from_json).transpose()
    }

    async fn put(&self, session_id: &str, record: &SessionRecord, ttl: Duration) -> Result<()> {
        let document = record.to_json()?;
        // EX takes whole seconds; never let a sub-second TTL become "no expiry".
        let ttl_secs = ttl.as_secs().max(1);
        let mut connection = self.connection.clone();
        redis::cmd("SET")
            .arg(self.key_for(session_id))
            .arg(document)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut connection)
            .await
            .map_err(unavailable)
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        connection
            .del::<_, ()>(self.key_for(session_id))
            .await
            .map_err(unavailable)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

fn store_key(prefix: &str, session_id: &str) -> String {
    format!("{}{}", prefix, session_id)
}

fn unavailable(error: redis::RedisError) -> SessionError {
    SessionError::StoreUnavailable(error.to_string())
}
