// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session lifecycle audit events.
//!
//! Every event renders to a single pipe-separated line:
//!
//! `2026-10-16 12:00:00 UTC | SESSION_CREATED | session=U4af9c... restarted=false`
//!
//! Lines carry masked session ids, field *names* and reference codes only.
//! Field values, inbound text and key material never appear.

use chrono::Utc;

use crate::conversation::Field;

/// Characters of a session id kept visible in logs.
const SESSION_ID_VISIBLE_PREFIX: usize = 6;

/// Mask a session id for logging.
///
/// Shows only the first few characters and replaces the rest with "...".
/// Ids shorter than the visible prefix are padded with `*`, so every masked
/// id has the same width.
pub fn mask_session_id(session_id: &str) -> String {
    let mut prefix: String = session_id.chars().take(SESSION_ID_VISIBLE_PREFIX).collect();
    let shown = prefix.chars().count();
    prefix.extend(std::iter::repeat('*').take(SESSION_ID_VISIBLE_PREFIX - shown));
    format!("{}...", prefix)
}

/// Something that happened to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A start command created (or restarted) a session.
    Created { session_id: String, restarted: bool },
    /// A required field passed validation and was stored.
    FieldCollected { session_id: String, field: Field, remaining: usize },
    /// All required fields are present.
    Ready { session_id: String },
    /// The user cancelled and the record was deleted.
    Cleared { session_id: String },
    /// An unreadable record was deleted and replaced with a fresh session.
    Recovered { session_id: String, cause: &'static str },
    /// A store round trip failed or timed out.
    StoreFailure {
        session_id: String,
        operation: &'static str,
        reference: String,
    },
}

impl SessionEvent {
    /// Format event for audit log
    pub fn to_audit_string(&self) -> String {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        match self {
            SessionEvent::Created { session_id, restarted } => {
                format!("{} | SESSION_CREATED | session={} restarted={}", timestamp, mask_session_id(session_id), restarted)
            }
            SessionEvent::FieldCollected { session_id, field, remaining } => {
                format!(
                    "{} | FIELD_COLLECTED | session={} field={} remaining={}",
                    timestamp,
                    mask_session_id(session_id),
                    field,
                    remaining
                )
            }
            SessionEvent::Ready { session_id } => {
                format!("{} | SESSION_READY | session={}", timestamp, mask_session_id(session_id))
            }
            SessionEvent::Cleared { session_id } => {
                format!("{} | SESSION_CLEARED | session={}", timestamp, mask_session_id(session_id))
            }
            SessionEvent::Recovered { session_id, cause } => {
                format!("{} | SESSION_RECOVERED | session={} cause={}", timestamp, mask_session_id(session_id), cause)
            }
            SessionEvent::StoreFailure { session_id, operation, reference } => {
                format!(
                    "{} | STORE_FAILURE | session={} op={} ref={}",
                    timestamp,
                    mask_session_id(session_id),
                    operation,
                    reference
                )
            }
        }
    }

    /// Emit the event through `tracing`. Failures log at warn level.
    pub fn emit(&self) {
        let line = self.to_audit_string();
        match self {
            SessionEvent::Recovered { .. } | SessionEvent::StoreFailure { .. } => {
                tracing::warn!(target: "session::manager", "{}", line)
            }
            _ => tracing::info!(target: "session::manager", "{}", line),
        }
    }
}
