// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Conversation state machine.
//!
//! ```text
//! EMPTY ──start──▶ COLLECTING ──last required field──▶ READY
//!   ▲                  │  ▲  (validation error: stay)     │
//!   │                  └──┘                               │ questions are
//!   │                                                     ▼ forwarded
//!   └──────────── cancel (any state) ──▶ CANCELLED, record deleted
//! ```
//!
//! [`ConversationRules::apply_turn`] is a pure function of the stored
//! state, whether a record existed, the inbound text and the clock. It
//! never touches the store; it returns a [`Transition`] whose
//! [`StoreEffect`] tells the caller what to persist.

pub mod directive;
pub mod fields;

pub use directive::OutboundDirective;
pub use fields::{Field, Validator, ValidatorTable, MAX_FIELD_INPUT_CHARS};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::{Result, SessionError};

/// Default required fields, in collection order.
pub const DEFAULT_REQUIRED_FIELDS: [Field; 3] = [Field::Name, Field::BirthDate, Field::BirthTime];

/// Default aliases for the start command.
pub const DEFAULT_START_COMMANDS: [&str; 2] = ["start", "開始！"];

/// Default aliases for the cancel command.
pub const DEFAULT_CANCEL_COMMANDS: [&str; 2] = ["cancel", "差不多啦！"];

/// Where a conversation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationState {
    /// No session exists.
    Empty,
    /// At least one required field is still missing.
    Collecting,
    /// Every required field is present; open for questions.
    Ready,
    /// The user cancelled; the record is deleted.
    Cancelled,
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConversationState::Empty => "EMPTY",
            ConversationState::Collecting => "COLLECTING",
            ConversationState::Ready => "READY",
            ConversationState::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

/// Decrypted session contents. Lives for one turn only.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionState {
    pub state: ConversationState,
    pub collected_fields: BTreeMap<Field, String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl SessionState {
    /// A brand-new `COLLECTING` session with nothing collected.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            state: ConversationState::Collecting,
            collected_fields: BTreeMap::new(),
            created_at: now,
            last_updated_at: now,
        }
    }

    /// First required field that has not been collected yet.
    pub fn pending_field(&self, required: &[Field]) -> Option<Field> {
        required
            .iter()
            .copied()
            .find(|field| !self.collected_fields.contains_key(field))
    }

    pub fn is_complete(&self, required: &[Field]) -> bool {
        self.pending_field(required).is_none()
    }
}

// Field values are personal data; debug output lists which fields are
// present but never their contents.
impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present: Vec<&Field> = self.collected_fields.keys().collect();
        f.debug_struct("SessionState")
            .field("state", &self.state)
            .field("collected_fields", &present)
            .field("created_at", &self.created_at)
            .field("last_updated_at", &self.last_updated_at)
            .finish()
    }
}

/// How an inbound text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Cancel,
    Text,
}

/// What the caller must do to the store after a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEffect {
    /// Encrypt and save `next` with a refreshed TTL.
    Persist,
    /// Delete the record.
    Delete,
    /// Leave the store alone.
    Nothing,
}

/// Result of applying one inbound turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: SessionState,
    pub directive: OutboundDirective,
    pub effect: StoreEffect,
}

/// Required fields, validators and command aliases.
#[derive(Debug, Clone)]
pub struct ConversationRules {
    required_fields: Vec<Field>,
    validators: ValidatorTable,
    start_commands: Vec<String>,
    cancel_commands: Vec<String>,
    require_start_command: bool,
}

impl Default for ConversationRules {
    fn default() -> Self {
        Self {
            required_fields: DEFAULT_REQUIRED_FIELDS.to_vec(),
            validators: ValidatorTable::default(),
            start_commands: DEFAULT_START_COMMANDS.iter().map(|c| c.to_string()).collect(),
            cancel_commands: DEFAULT_CANCEL_COMMANDS.iter().map(|c| c.to_string()).collect(),
            require_start_command: true,
        }
    }
}

impl ConversationRules {
    /// Rules collecting `required_fields` in the given order.
    ///
    /// The list must be non-empty and free of duplicates.
    pub fn new(required_fields: Vec<Field>) -> Result<Self> {
        if required_fields.is_empty() {
            return Err(SessionError::Config("at least one required field is needed".to_string()));
        }
        let mut seen = HashSet::new();
        for field in &required_fields {
            if !seen.insert(*field) {
                return Err(SessionError::Config(format!("required field listed twice: {}", field)));
            }
        }
        Ok(Self {
            required_fields,
            ..Self::default()
        })
    }

    pub fn with_validators(mut self, validators: ValidatorTable) -> Self {
        self.validators = validators;
        self
    }

    /// Replace both command alias lists. Aliases are trimmed and compared
    /// case-insensitively; empty lists or an alias claimed by both commands
    /// are rejected.
    pub fn with_commands(mut self, start: Vec<String>, cancel: Vec<String>) -> Result<Self> {
        let normalize = |aliases: Vec<String>| -> Vec<String> {
            aliases
                .into_iter()
                .map(|alias| alias.trim().to_lowercase())
                .filter(|alias| !alias.is_empty())
                .collect()
        };
        let start = normalize(start);
        let cancel = normalize(cancel);

        if start.is_empty() || cancel.is_empty() {
            return Err(SessionError::Config("start and cancel commands need at least one alias".to_string()));
        }
        if let Some(shared) = start.iter().find(|alias| cancel.contains(*alias)) {
            return Err(SessionError::Config(format!("command alias used for both start and cancel: {}", shared)));
        }

        self.start_commands = start;
        self.cancel_commands = cancel;
        Ok(self)
    }

    /// When false, text from a user without a session starts one and is
    /// taken as the first field value.
    pub fn require_start_command(mut self, required: bool) -> Self {
        self.require_start_command = required;
        self
    }

    pub fn required_fields(&self) -> &[Field] {
        &self.required_fields
    }

    /// Classify inbound text (trimmed, case-insensitive exact match).
    pub fn parse_command(&self, text: &str) -> Command {
        let normalized = text.trim().to_lowercase();
        if self.cancel_commands.iter().any(|alias| *alias == normalized) {
            Command::Cancel
        } else if self.start_commands.iter().any(|alias| *alias == normalized) {
            Command::Start
        } else {
            Command::Text
        }
    }

    /// Compute the next state and directive for one inbound turn.
    ///
    /// `current` is the stored state (or a fresh one when `is_new`).
    pub fn apply_turn(&self, current: &SessionState, is_new: bool, text: &str, now: DateTime<Utc>) -> Transition {
        match self.parse_command(text) {
            Command::Cancel => Transition {
                next: SessionState {
                    state: ConversationState::Cancelled,
                    collected_fields: BTreeMap::new(),
                    created_at: current.created_at,
                    last_updated_at: now,
                },
                directive: OutboundDirective::SessionCleared,
                effect: StoreEffect::Delete,
            },
            Command::Start => Transition {
                next: SessionState::fresh(now),
                directive: OutboundDirective::PromptField { field: self.required_fields[0] },
                effect: StoreEffect::Persist,
            },
            Command::Text if is_new && self.require_start_command => Transition {
                next: SessionState {
                    state: ConversationState::Empty,
                    ..current.clone()
                },
                directive: OutboundDirective::AwaitingStart,
                effect: StoreEffect::Nothing,
            },
            Command::Text => {
                let base = if is_new { SessionState::fresh(now) } else { self.normalize(current) };
                self.apply_text(base, text, now)
            }
        }
    }

    /// Re-derive `COLLECTING`/`READY` from field completeness, in case the
    /// required list changed since the record was written.
    fn normalize(&self, stored: &SessionState) -> SessionState {
        let mut state = stored.clone();
        state.state = if state.is_complete(&self.required_fields) {
            ConversationState::Ready
        } else {
            ConversationState::Collecting
        };
        state
    }

    fn apply_text(&self, mut state: SessionState, text: &str, now: DateTime<Utc>) -> Transition {
        let Some(field) = state.pending_field(&self.required_fields) else {
            state.last_updated_at = now;
            return Transition {
                directive: OutboundDirective::Forward {
                    fields: state.collected_fields.clone(),
                    text: text.trim().to_string(),
                },
                next: state,
                effect: StoreEffect::Persist,
            };
        };

        match self.validators.validate(field, text, now) {
            Err(err) => {
                let reason = match err {
                    SessionError::Validation { reason, .. } => reason,
                    other => other.to_string(),
                };
                Transition {
                    next: state,
                    directive: OutboundDirective::ValidationError { field, reason },
                    effect: StoreEffect::Nothing,
                }
            }
            Ok(value) => {
                state.collected_fields.insert(field, value);
                state.last_updated_at = now;
                let directive = match state.pending_field(&self.required_fields) {
                    Some(next_field) => {
                        state.state = ConversationState::Collecting;
                        OutboundDirective::PromptField { field: next_field }
                    }
                    None => {
                        state.state = ConversationState::Ready;
                        OutboundDirective::Ready
                    }
                };
                Transition {
                    next: state,
                    directive,
                    effect: StoreEffect::Persist,
                }
            }
        }
    }
}
