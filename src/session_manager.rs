// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session lifecycle manager.
//!
//! Orchestrates one user turn end to end:
//!
//! ```text
//! lock(session) → get → unwrap DEK → decrypt → decode
//!              → apply_turn
//!              → encode → encrypt under a fresh DEK → wrap → put (TTL refreshed)
//!              → unlock → (answering service, if the turn is a question)
//! ```
//!
//! ## Key rotation
//!
//! Every save generates a new DEK, so the wrapped key and the payload are
//! always written together and no rotation state is tracked.
//!
//! ## Failure policy
//!
//! [`SessionManager::handle_turn`] never returns an error:
//!
//! | Failure                          | Directive      | Record            |
//! |----------------------------------|----------------|-------------------|
//! | Store unreachable or timed out   | `RetryLater`   | untouched         |
//! | Tampered / wrong key / bad schema| `SessionReset` | deleted           |
//! | Answering service failed         | `RetryLater`   | already saved     |
//!
//! Technical detail is logged (sanitized, under a reference code) and never
//! returned to the user.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::audit::{mask_session_id, SessionEvent};
use crate::codec::{self, SCHEMA_VERSION};
use crate::config::EngineSettings;
use crate::conversation::{
    Command, ConversationRules, Field, OutboundDirective, SessionState, StoreEffect, Transition, ValidatorTable,
};
use crate::error::{self, Result, SessionError};
use crate::security::{cipher, KeyHierarchy, SessionLocks, SessionTurnGuard};
use crate::store::{SessionRecord, SessionStore};

/// Domain separation prefix for session payloads.
const PAYLOAD_CONTEXT: &str = "session-vault/payload/v";

/// The retrieval/answering collaborator.
///
/// Receives the collected profile and the user's question and returns a
/// plain answer that is relayed unchanged.
#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(&self, session_id: &str, fields: &BTreeMap<Field, String>, question: &str) -> anyhow::Result<String>;
}

/// Result of [`SessionManager::load_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSession {
    pub state: SessionState,
    /// No readable record existed; nothing has been persisted yet.
    pub is_new: bool,
    /// A corrupt record was found and deleted.
    pub recovered: bool,
}

/// Stored record metadata, readable without the master key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSummary {
    pub schema_version: u32,
    pub wrapped_key_len: usize,
    pub payload_len: usize,
}

/// Owns the key hierarchy, the store handle and the per-session locks.
pub struct SessionManager {
    keys: KeyHierarchy,
    store: Arc<dyn SessionStore>,
    settings: EngineSettings,
    rules: ConversationRules,
    locks: SessionLocks,
    answerer: Option<Arc<dyn Answerer>>,
}

impl SessionManager {
    /// Build a manager. Fails if `settings` do not validate.
    pub fn new(keys: KeyHierarchy, store: Arc<dyn SessionStore>, settings: EngineSettings) -> Result<Self> {
        settings.validate()?;
        let rules = settings.conversation_rules()?;
        tracing::info!(
            target: "session::manager",
            store = store.name(),
            ttl_secs = settings.session_ttl_secs,
            required_fields = ?rules.required_fields(),
            "Session manager ready"
        );
        Ok(Self {
            keys,
            store,
            settings,
            rules,
            locks: SessionLocks::new(),
            answerer: None,
        })
    }

    /// Resolve `Forward` directives through `answerer`.
    pub fn with_answerer(mut self, answerer: Arc<dyn Answerer>) -> Self {
        self.answerer = Some(answerer);
        self
    }

    /// Swap in a different field → validator table.
    pub fn with_validators(mut self, validators: ValidatorTable) -> Self {
        self.rules = self.rules.with_validators(validators);
        self
    }

    pub fn rules(&self) -> &ConversationRules {
        &self.rules
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Serialize with other turns for `session_id`.
    ///
    /// [`handle_turn`](Self::handle_turn) takes this itself; callers that
    /// compose `load_or_create`/`save` by hand must hold it from load to
    /// save.
    pub async fn lock(&self, session_id: &str) -> SessionTurnGuard {
        self.locks.acquire(session_id).await
    }

    /// Load and decrypt a session, or start a fresh one.
    ///
    /// A fresh state is *not* persisted. An unreadable record is deleted and
    /// reported through `recovered`; only store failures are returned as
    /// errors.
    pub async fn load_or_create(&self, session_id: &str) -> Result<LoadedSession> {
        let opened = match self.with_timeout("get", self.store.get(session_id)).await {
            Ok(None) => return Ok(self.fresh(false)),
            Ok(Some(record)) => self.open(session_id, &record),
            Err(err) => Err(err),
        };

        match opened {
            Ok(state) => Ok(LoadedSession {
                state,
                is_new: false,
                recovered: false,
            }),
            Err(err) if err.is_corruption() => {
                tracing::warn!(
                    target: "session::manager",
                    session = %mask_session_id(session_id),
                    kind = err.kind(),
                    "Discarding unreadable session record"
                );
                self.with_timeout("delete", self.store.delete(session_id)).await?;
                SessionEvent::Recovered {
                    session_id: session_id.to_string(),
                    cause: err.kind(),
                }
                .emit();
                Ok(self.fresh(true))
            }
            Err(err) => Err(err),
        }
    }

    /// Run the state machine against the current clock.
    pub fn apply_turn(&self, state: &SessionState, is_new: bool, text: &str) -> Transition {
        self.rules.apply_turn(state, is_new, text, Utc::now())
    }

    /// Encrypt under a fresh DEK and store with a refreshed TTL.
    pub async fn save(&self, session_id: &str, state: &SessionState) -> Result<()> {
        let record = self.seal(session_id, state)?;
        self.with_timeout("put", self.store.put(session_id, &record, self.settings.ttl()))
            .await
    }

    /// Delete a session. Deleting an absent session succeeds.
    pub async fn clear(&self, session_id: &str) -> Result<()> {
        self.with_timeout("delete", self.store.delete(session_id)).await
    }

    /// Metadata of the stored record, without decrypting it.
    pub async fn inspect(&self, session_id: &str) -> Result<Option<RecordSummary>> {
        let record = self.with_timeout("get", self.store.get(session_id)).await?;
        Ok(record.map(|record| RecordSummary {
            schema_version: record.schema_version,
            wrapped_key_len: record.wrapped_key.len(),
            payload_len: record.encrypted_payload.len(),
        }))
    }

    /// Handle one inbound message. Never fails; see the module docs for
    /// how failures map to directives.
    pub async fn handle_turn(&self, session_id: &str, text: &str) -> OutboundDirective {
        let guard = self.lock(session_id).await;

        let loaded = match self.load_or_create(session_id).await {
            Ok(loaded) => loaded,
            Err(err) => return self.retry_later(session_id, "get", &err),
        };

        let command = self.rules.parse_command(text);
        if loaded.recovered && command != Command::Start {
            return OutboundDirective::SessionReset;
        }

        let transition = self.apply_turn(&loaded.state, loaded.is_new, text);
        let stored = match transition.effect {
            StoreEffect::Persist => self.save(session_id, &transition.next).await.map_err(|e| ("put", e)),
            StoreEffect::Delete => self.clear(session_id).await.map_err(|e| ("delete", e)),
            StoreEffect::Nothing => Ok(()),
        };
        if let Err((operation, err)) = stored {
            return self.retry_later(session_id, operation, &err);
        }
        self.audit(session_id, &loaded, command, &transition);
        drop(guard);

        tracing::debug!(
            target: "session::manager",
            session = %mask_session_id(session_id),
            directive = transition.directive.kind(),
            "Turn handled"
        );

        match transition.directive {
            OutboundDirective::Forward { fields, text } => self.forward(session_id, fields, text).await,
            directive => directive,
        }
    }

    fn fresh(&self, recovered: bool) -> LoadedSession {
        LoadedSession {
            state: SessionState::fresh(Utc::now()),
            is_new: true,
            recovered,
        }
    }

    fn open(&self, session_id: &str, record: &SessionRecord) -> Result<SessionState> {
        if record.schema_version != SCHEMA_VERSION {
            return Err(SessionError::Schema(format!(
                "record schema version {} is not supported",
                record.schema_version
            )));
        }
        let dek = self.keys.unwrap(session_id, &record.wrapped_key)?;
        let plaintext = Zeroizing::new(cipher::decrypt(
            dek.as_bytes(),
            &record.encrypted_payload,
            &payload_context(record.schema_version, session_id),
        )?);
        codec::decode(&plaintext)
    }

    fn seal(&self, session_id: &str, state: &SessionState) -> Result<SessionRecord> {
        let plaintext = Zeroizing::new(codec::encode(state)?);
        let dek = self.keys.generate_dek();
        let encrypted_payload = cipher::encrypt(
            dek.as_bytes(),
            &plaintext,
            &payload_context(SCHEMA_VERSION, session_id),
        )?;
        let wrapped_key = self.keys.wrap(session_id, &dek)?;
        Ok(SessionRecord {
            session_id: session_id.to_string(),
            wrapped_key,
            encrypted_payload,
            schema_version: SCHEMA_VERSION,
        })
    }

    async fn with_timeout<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.settings.store_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::StoreUnavailable(format!(
                "{} timed out after {}ms",
                operation, self.settings.store_timeout_ms
            ))),
        }
    }

    async fn forward(&self, session_id: &str, fields: BTreeMap<Field, String>, text: String) -> OutboundDirective {
        let Some(answerer) = &self.answerer else {
            return OutboundDirective::Forward { fields, text };
        };

        let call = answerer.answer(session_id, &fields, &text);
        match tokio::time::timeout(self.settings.answer_timeout(), call).await {
            Ok(Ok(answer)) => OutboundDirective::Answer { text: answer },
            Ok(Err(err)) => OutboundDirective::RetryLater {
                reference: error::report_failure("ANSWERER_ERROR", &format!("{:#}", err), &mask_session_id(session_id)),
            },
            Err(_) => OutboundDirective::RetryLater {
                reference: error::report_failure(
                    "ANSWERER_TIMEOUT",
                    &format!("no answer within {}ms", self.settings.answer_timeout_ms),
                    &mask_session_id(session_id),
                ),
            },
        }
    }

    fn retry_later(&self, session_id: &str, operation: &'static str, err: &SessionError) -> OutboundDirective {
        let reference = error::report(err, &mask_session_id(session_id));
        SessionEvent::StoreFailure {
            session_id: session_id.to_string(),
            operation,
            reference: reference.clone(),
        }
        .emit();
        OutboundDirective::RetryLater { reference }
    }

    fn audit(&self, session_id: &str, loaded: &LoadedSession, command: Command, transition: &Transition) {
        let required = self.rules.required_fields();
        match transition.effect {
            StoreEffect::Delete => SessionEvent::Cleared {
                session_id: session_id.to_string(),
            }
            .emit(),
            StoreEffect::Persist => {
                if command == Command::Start || loaded.is_new {
                    SessionEvent::Created {
                        session_id: session_id.to_string(),
                        restarted: command == Command::Start && !loaded.is_new,
                    }
                    .emit();
                }
                let collected = transition
                    .next
                    .collected_fields
                    .keys()
                    .find(|field| !loaded.state.collected_fields.contains_key(*field));
                if let Some(field) = collected.filter(|_| command == Command::Text) {
                    SessionEvent::FieldCollected {
                        session_id: session_id.to_string(),
                        field: *field,
                        remaining: required
                            .iter()
                            .filter(|field| !transition.next.collected_fields.contains_key(*field))
                            .count(),
                    }
                    .emit();
                }
                if transition.directive == OutboundDirective::Ready {
                    SessionEvent::Ready {
                        session_id: session_id.to_string(),
                    }
                    .emit();
                }
            }
            StoreEffect::Nothing => {}
        }
    }
}

fn payload_context(schema_version: u32, session_id: &str) -> Vec<u8> {
    format!("{}{}/{}", PAYLOAD_CONTEXT, schema_version, session_id).into_bytes()
}
