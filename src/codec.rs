// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session payload codec.
//!
//! [`SessionState`] is serialized to camelCase JSON before encryption:
//!
//! ```json
//! {"schemaVersion":1,"state":"COLLECTING","collectedFields":{"name":"..."},
//!  "createdAt":"2026-10-16T12:00:00Z","lastUpdatedAt":"2026-10-16T12:01:00Z"}
//! ```
//!
//! `collectedFields` is an ordered map, so the same state always encodes to
//! the same bytes. Decoding reads `schemaVersion` first and refuses any
//! version it does not know instead of guessing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use std::collections::BTreeMap;

use crate::conversation::{ConversationState, Field, SessionState};
use crate::error::{Result, SessionError};

/// Version written by [`encode`] and the only one [`decode`] accepts.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PayloadV1 {
    schema_version: u32,
    state: ConversationState,
    collected_fields: BTreeMap<Field, String>,
    created_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionProbe {
    schema_version: Option<u32>,
}

/// Serialize `state` for encryption.
pub fn encode(state: &SessionState) -> Result<Vec<u8>> {
    let payload = PayloadV1 {
        schema_version: SCHEMA_VERSION,
        state: state.state,
        collected_fields: state.collected_fields.clone(),
        created_at: state.created_at,
        last_updated_at: state.last_updated_at,
    };
    serde_json::to_vec(&payload).map_err(|e| SessionError::Schema(format!("encode failed: {}", e)))
}

/// Parse a decrypted payload.
///
/// The error message names the problem (version, syntax) but never quotes
/// the payload, which holds personal data.
pub fn decode(bytes: &[u8]) -> Result<SessionState> {
    let probe: VersionProbe = serde_json::from_slice(bytes)
        .map_err(|e| SessionError::Schema(format!("payload is not valid JSON ({})", category(&e))))?;

    match probe.schema_version {
        Some(SCHEMA_VERSION) => {}
        Some(other) => return Err(SessionError::Schema(format!("unsupported schema version {}", other))),
        None => return Err(SessionError::Schema("payload has no schema version".to_string())),
    }

    let payload: PayloadV1 = serde_json::from_slice(bytes)
        .map_err(|e| SessionError::Schema(format!("payload does not match schema v1 (line {}, column {})", e.line(), e.column())))?;

    Ok(SessionState {
        state: payload.state,
        collected_fields: payload.collected_fields,
        created_at: payload.created_at,
        last_updated_at: payload.last_updated_at,
    })
}

fn category(error: &serde_json::Error) -> &'static str {
    match error.classify() {
        Category::Io => "io",
        Category::Syntax => "syntax",
        Category::Data => "data",
        Category::Eof => "truncated",
    }
}
