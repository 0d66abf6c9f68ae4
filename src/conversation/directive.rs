// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! What the messaging boundary should do after a turn.

use serde::Serialize;
use std::collections::BTreeMap;

use super::fields::Field;

/// Instruction handed back to the messaging boundary.
///
/// None of the variants carries technical error detail; failures are
/// reduced to a reference code the user can quote to support.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum OutboundDirective {
    /// No session exists and the user has not asked to start one.
    AwaitingStart,

    /// Ask the user for the next required field.
    PromptField { field: Field },

    /// The value just sent does not fit the pending field; ask again.
    ValidationError { field: Field, reason: String },

    /// Every required field is collected; questions are now welcome.
    Ready,

    /// Hand the question to the answering service together with the
    /// collected profile.
    Forward {
        fields: BTreeMap<Field, String>,
        text: String,
    },

    /// Answer produced by the answering service, relayed unchanged.
    Answer { text: String },

    /// The session was deleted at the user's request.
    SessionCleared,

    /// The stored session could not be read and was discarded.
    SessionReset,

    /// A transient failure; the user should try again.
    RetryLater { reference: String },
}

impl OutboundDirective {
    /// Short tag for logs. Never includes field values or user text.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundDirective::AwaitingStart => "AWAITING_START",
            OutboundDirective::PromptField { .. } => "PROMPT_FIELD",
            OutboundDirective::ValidationError { .. } => "VALIDATION_ERROR",
            OutboundDirective::Ready => "READY",
            OutboundDirective::Forward { .. } => "FORWARD",
            OutboundDirective::Answer { .. } => "ANSWER",
            OutboundDirective::SessionCleared => "SESSION_CLEARED",
            OutboundDirective::SessionReset => "SESSION_RESET",
            OutboundDirective::RetryLater { .. } => "RETRY_LATER",
        }
    }

    /// Default user-facing text for this directive.
    ///
    /// `Forward` has no text of its own; the boundary is expected to relay
    /// the answering service's reply instead.
    pub fn message(&self) -> String {
        match self {
            OutboundDirective::AwaitingStart => {
                "Send \"start\" to begin a reading.".to_string()
            }
            OutboundDirective::PromptField { field } => field.prompt().to_string(),
            OutboundDirective::ValidationError { field, reason } => {
                format!("{} {}", reason, field.prompt())
            }
            OutboundDirective::Ready => "All set! What would you like to ask?".to_string(),
            OutboundDirective::Forward { .. } => "Let me think about that...".to_string(),
            OutboundDirective::Answer { text } => text.clone(),
            OutboundDirective::SessionCleared => "Session cleared. Send \"start\" any time to begin again.".to_string(),
            OutboundDirective::SessionReset => {
                "Your session had to be reset. Please send \"start\" to begin again.".to_string()
            }
            OutboundDirective::RetryLater { reference } => {
                format!("Something went wrong on our side. Please try again in a moment. (Reference: {})", reference)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_message_uses_field_prompt() {
        let directive = OutboundDirective::PromptField { field: Field::BirthDate };
        assert_eq!(directive.message(), Field::BirthDate.prompt());
    }

    #[test]
    fn test_retry_message_carries_only_reference() {
        let directive = OutboundDirective::RetryLater { reference: "ERR-20260101-ABCDEF".to_string() };
        let message = directive.message();
        assert!(message.contains("ERR-20260101-ABCDEF"));
        assert!(!message.to_lowercase().contains("redis"));
    }

    #[test]
    fn test_serialized_shape() {
        let directive = OutboundDirective::ValidationError {
            field: Field::BirthDate,
            reason: "bad".to_string(),
        };
        let json = serde_json::to_value(&directive).unwrap();
        assert_eq!(json["directive"], "validation_error");
        assert_eq!(json["field"], "birthDate");
    }

    #[test]
    fn test_kind_never_leaks_content() {
        let directive = OutboundDirective::Answer { text: "陳美麗".to_string() };
        assert_eq!(directive.kind(), "ANSWER");
    }
}
