// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! session-vault - Envelope-encrypted conversation sessions
//!
//! Collects a user's profile over a chat conversation, keeps it encrypted
//! at rest in a TTL key-value store, and hands questions plus profile to an
//! answering service once the profile is complete.
//!
//! **MasterKey** wraps **per-save DEK** encrypts **SessionState**
//!
//! # Core Modules
//!
//! - [`security`] - AES-256-GCM cipher, key hierarchy, per-session locks
//! - [`conversation`] - Field validators and the conversation state machine
//! - [`codec`] - Versioned payload serialization
//! - [`store`] - Session store adapters (in-memory, Redis)
//! - [`session_manager`] - Load, apply, save and clear; the `handle_turn` entry point
//! - [`config`] - Settings file and environment overrides
//! - [`audit`] - Session lifecycle audit lines
//! - [`error`] - Error taxonomy, reference codes and log sanitization

pub mod audit;
pub mod codec;
pub mod config;
pub mod conversation;
pub mod error;
pub mod security;
pub mod session_manager;
pub mod store;

pub use audit::{mask_session_id, SessionEvent};
pub use config::{load_master_key_from_env, EngineSettings};
pub use conversation::{
    ConversationRules, ConversationState, Field, OutboundDirective, SessionState, StoreEffect, Transition,
    ValidatorTable,
};
pub use error::{generate_reference_code, sanitize_error_details, Result, SessionError};
pub use security::{KeyHierarchy, MasterKey};
pub use session_manager::{Answerer, LoadedSession, RecordSummary, SessionManager};
pub use store::{InMemoryStore, RedisStore, SessionRecord, SessionStore};
