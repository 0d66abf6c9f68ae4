// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Two-tier key hierarchy (envelope encryption).
//!
//! - [`MasterKey`]: one per process, loaded from configuration at startup,
//!   never persisted, never logged. Only ever used to wrap and unwrap DEKs.
//! - [`DataEncryptionKey`]: 32 random bytes generated per save. Exists in
//!   plaintext only for the duration of one encrypt or decrypt, and is
//!   persisted only in wrapped form next to the payload it protects.
//!
//! Both key types wipe themselves on drop and print `[REDACTED]` in debug
//! output.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::cipher::{self, KEY_SIZE};
use crate::error::{Result, SessionError};

/// Domain separation prefix for wrapped DEKs.
const WRAP_CONTEXT: &str = "session-vault/dek/v1/";

/// Process-wide key-encryption key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_SIZE]);

impl MasterKey {
    /// Build from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Decode key material from configuration.
    ///
    /// Accepts standard base64 or hex. Anything that does not decode to
    /// exactly 32 bytes is rejected; the error never echoes the input.
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let trimmed = encoded.trim();
        if trimmed.is_empty() {
            return Err(SessionError::Config("master key is empty".to_string()));
        }

        let candidates = [
            STANDARD.decode(trimmed).ok(),
            hex::decode(trimmed).ok(),
        ];

        for decoded in candidates.into_iter().flatten() {
            let decoded = Zeroizing::new(decoded);
            if decoded.len() == KEY_SIZE {
                let mut key = [0u8; KEY_SIZE];
                key.copy_from_slice(&decoded);
                return Ok(Self(key));
            }
        }

        Err(SessionError::Config(format!(
            "master key must be {} bytes encoded as base64 or hex",
            KEY_SIZE
        )))
    }

    /// Generate a fresh random master key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Base64 form, for the `keygen` command.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.0))
    }

    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// Per-save data encryption key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataEncryptionKey([u8; KEY_SIZE]);

impl DataEncryptionKey {
    /// Key bytes, for the cipher primitive.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for DataEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataEncryptionKey([REDACTED])")
    }
}

/// Owns the master key and performs every operation that touches it.
///
/// The master key is injected here rather than read from a global, so tests
/// can run engines with different keys side by side.
#[derive(Debug)]
pub struct KeyHierarchy {
    master: MasterKey,
}

impl KeyHierarchy {
    pub fn new(master: MasterKey) -> Self {
        Self { master }
    }

    /// Cryptographically secure random 32-byte DEK.
    pub fn generate_dek(&self) -> DataEncryptionKey {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        DataEncryptionKey(key)
    }

    /// Encrypt `dek` under the master key, bound to `session_id`.
    pub fn wrap(&self, session_id: &str, dek: &DataEncryptionKey) -> Result<Vec<u8>> {
        cipher::encrypt(self.master.as_bytes(), dek.as_bytes(), &wrap_context(session_id))
    }

    /// Recover the DEK for `session_id`.
    ///
    /// Fails with [`SessionError::AuthenticationFailure`] if the blob was
    /// wrapped under another master key, for another session, or altered.
    pub fn unwrap(&self, session_id: &str, wrapped: &[u8]) -> Result<DataEncryptionKey> {
        let raw = Zeroizing::new(cipher::decrypt(self.master.as_bytes(), wrapped, &wrap_context(session_id))?);
        if raw.len() != KEY_SIZE {
            tracing::warn!(target: "security::keys", len = raw.len(), "Unwrapped data key has the wrong length");
            return Err(SessionError::AuthenticationFailure);
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&raw);
        Ok(DataEncryptionKey(key))
    }
}

fn wrap_context(session_id: &str) -> Vec<u8> {
    format!("{}{}", WRAP_CONTEXT, session_id).into_bytes()
}
