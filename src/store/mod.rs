// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session store adapters.
//!
//! A store moves opaque [`SessionRecord`]s keyed by session id and enforces
//! their TTL. It never sees plaintext and performs no cryptography.
//!
//! Two adapters ship with the crate:
//!
//! - [`InMemoryStore`]: process-local, for tests and the offline CLI.
//! - [`RedisStore`]: networked, `SET key value EX ttl` per save.
//!
//! "Not found" means the same thing whether the record was deleted or
//! expired.

pub mod memory;
pub mod redis;

pub use memory::InMemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

use crate::error::{Result, SessionError};

/// One encrypted session, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    /// DEK encrypted under the master key.
    #[serde(with = "base64_bytes")]
    pub wrapped_key: Vec<u8>,
    /// Encoded [`SessionState`](crate::conversation::SessionState) encrypted
    /// under the DEK.
    #[serde(with = "base64_bytes")]
    pub encrypted_payload: Vec<u8>,
    pub schema_version: u32,
}

impl SessionRecord {
    /// Serialize to the JSON document kept in the store.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SessionError::Schema(format!("record encode failed: {}", e)))
    }

    /// Parse a stored document. Anything unreadable is a schema error, so
    /// the manager treats it like any other corrupt record.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            SessionError::Schema(format!("stored record is unreadable (line {}, column {})", e.line(), e.column()))
        })
    }
}

/// Networked key-value store with TTL.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a record, or `None` if absent or expired.
    async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Insert or replace a record. The TTL restarts on every put.
    async fn put(&self, session_id: &str, record: &SessionRecord, ttl: Duration) -> Result<()>;

    /// Remove a record. Deleting an absent record succeeds.
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// Adapter name for logs.
    fn name(&self) -> &'static str;
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}
