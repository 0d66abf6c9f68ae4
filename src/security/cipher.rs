// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Authenticated encryption primitive (AES-256-GCM).
//!
//! Every call draws a fresh 96-bit nonce from the OS RNG, and the nonce
//! travels inside the blob so decryption is self-describing:
//!
//! ```text
//! [format: 1 byte = 0x01][nonce: 12 bytes][ciphertext || tag: n + 16 bytes]
//! ```
//!
//! Decryption fails closed. A truncated blob, an unknown format byte, a
//! flipped bit, the wrong key or the wrong associated data all produce the
//! same [`SessionError::AuthenticationFailure`], so callers cannot build an
//! oracle out of the error.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Result, SessionError};

/// Symmetric key length (AES-256).
pub const KEY_SIZE: usize = 32;

/// Nonce length for AES-GCM (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag length.
pub const TAG_SIZE: usize = 16;

/// Leading byte identifying the blob layout.
pub const FORMAT_V1: u8 = 0x01;

/// Smallest blob that can possibly authenticate (empty plaintext).
pub const MIN_BLOB_SIZE: usize = 1 + NONCE_SIZE + TAG_SIZE;

/// Encrypt `plaintext` under `key`, binding `associated_data` into the tag.
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: associated_data })
        .map_err(|_| {
            // Only reachable for plaintexts beyond the GCM length limit.
            tracing::error!(target: "security::cipher", plaintext_len = plaintext.len(), "AES-GCM encryption failed");
            SessionError::AuthenticationFailure
        })?;

    let mut blob = Vec::with_capacity(1 + NONCE_SIZE + sealed.len());
    blob.push(FORMAT_V1);
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&sealed);
    Ok(blob)
}

/// Decrypt a blob produced by [`encrypt`].
pub fn decrypt(key: &[u8; KEY_SIZE], blob: &[u8], associated_data: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < MIN_BLOB_SIZE || blob[0] != FORMAT_V1 {
        return Err(SessionError::AuthenticationFailure);
    }

    let (nonce_bytes, sealed) = blob[1..].split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), Payload { msg: sealed, aad: associated_data })
        .map_err(|_| SessionError::AuthenticationFailure)
}
