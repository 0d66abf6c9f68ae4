// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy for the session engine.
//!
//! Four failure families cross module boundaries:
//!
//! - **AuthenticationFailure** (cipher layer): tampered, truncated or
//!   wrong-key ciphertext. Carries no detail on purpose.
//! - **Schema** (codec layer): unknown version or unparseable payload.
//! - **StoreUnavailable** (store adapter): network, timeout or connection
//!   failure. Transient, surfaced to the user as "try again".
//! - **Validation** (state machine): a field value in the wrong format.
//!   Recoverable in place.
//!
//! None of these ever reach the end user verbatim. Internal detail is
//! sanitized, logged with a reference code, and the user only sees the code.

use chrono::Utc;
use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use crate::conversation::Field;

/// Errors produced by the session engine.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Ciphertext could not be authenticated. Wrong key and corrupted data
    /// are deliberately indistinguishable.
    #[error("authentication failure")]
    AuthenticationFailure,

    #[error("schema error: {0}")]
    Schema(String),

    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid value for {field}: {reason}")]
    Validation { field: Field, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// True for failures that mean the stored record can never be read
    /// again and must be discarded.
    pub fn is_corruption(&self) -> bool {
        matches!(self, SessionError::AuthenticationFailure | SessionError::Schema(_))
    }

    /// Short machine-readable tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::AuthenticationFailure => "AUTHENTICATION_FAILURE",
            SessionError::Schema(_) => "SCHEMA_ERROR",
            SessionError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            SessionError::Validation { .. } => "VALIDATION_ERROR",
            SessionError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

// =============================================================================
// ERROR REFERENCE CODE GENERATION
// =============================================================================

/// Generate a unique error reference code.
/// Format: ERR-YYYYMMDD-XXXXXX (e.g., ERR-20240115-A3F8K2)
pub fn generate_reference_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let date = Utc::now().format("%Y%m%d");
    let mut rng = rand::thread_rng();
    let random: String = (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("ERR-{}-{}", date, random)
}

/// Log an internal failure under a fresh reference code and return the code.
///
/// Only the sanitized detail is logged; the caller hands the code to the
/// user instead of the error.
pub fn report(error: &SessionError, session: &str) -> String {
    report_failure(error.kind(), &error.to_string(), session)
}

/// [`report`] for failures that are not a [`SessionError`], such as the
/// answering service.
pub fn report_failure(kind: &str, detail: &str, session: &str) -> String {
    let reference = generate_reference_code();
    let redacted = contains_sensitive_info(detail);
    let sanitized = sanitize_error_details(detail);
    tracing::error!(
        target: "session::manager",
        reference = %reference,
        kind = %kind,
        session = %session,
        redacted,
        internal_error = %sanitized,
        "Session turn failed"
    );
    reference
}

// =============================================================================
// ERROR SANITIZATION
// =============================================================================

/// Patterns stripped from error details before they are logged.
static SANITIZE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // Store connection strings
        (Regex::new(r"(?i)(?:redis|rediss|unix)://[^\s]+").expect("Store URL regex"), "[STORE_URL_REDACTED]"),

        // File paths (Windows and Unix)
        (Regex::new(r"[A-Za-z]:\\[^\s]+").expect("Windows path regex"), "[PATH_REDACTED]"),
        (Regex::new(r"/(?:home|usr|var|etc|opt|tmp|root|run)/[^\s]+").expect("Unix path regex"), "[PATH_REDACTED]"),

        // IP addresses
        (Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}(?::\d+)?\b").expect("IPv4 regex"), "[IP_REDACTED]"),
        (Regex::new(r"\b(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}\b").expect("IPv6 regex"), "[IP_REDACTED]"),

        // Credentials
        (Regex::new(r"(?i)password[=:]\s*\S+").expect("Password regex"), "password=[REDACTED]"),

        // Personal data that may sit inside field values
        (Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("Date regex"), "[DATE_REDACTED]"),
        (Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("Email regex"), "[EMAIL_REDACTED]"),
        (Regex::new(r"[\x{4e00}-\x{9fff}]{2,}").expect("CJK name regex"), "[NAME_REDACTED]"),

        // Encoded key material
        (Regex::new(r"\b[A-Za-z0-9+/]{40,}={0,2}").expect("Base64 secret regex"), "[SECRET_REDACTED]"),
        (Regex::new(r"\b[0-9a-fA-F]{32,}\b").expect("Hex secret regex"), "[SECRET_REDACTED]"),
    ]
});

/// Remove connection strings, addresses, paths, personal data and encoded
/// secrets from an error message.
pub fn sanitize_error_details(error: &str) -> String {
    let mut result = error.to_string();
    for (pattern, replacement) in SANITIZE_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }
    result
}

/// Check if an error message contains potentially sensitive information.
pub fn contains_sensitive_info(error: &str) -> bool {
    SANITIZE_PATTERNS.iter().any(|(pattern, _)| pattern.is_match(error))
}
