// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Security primitives for the session engine.
//!
//! ## Components
//!
//! - **Cipher**: AES-256-GCM with a fresh random nonce per call and
//!   fail-closed decryption.
//! - **Key hierarchy**: process-wide master key wrapping per-save data
//!   encryption keys (envelope encryption).
//! - **Session locks**: per-session async mutexes that serialize turns for
//!   one user while leaving other users untouched.
//!
//! ## Usage
//!
//! ```no_run
//! use session_vault::security::{KeyHierarchy, MasterKey};
//!
//! let keys = KeyHierarchy::new(MasterKey::generate());
//! let dek = keys.generate_dek();
//! let wrapped = keys.wrap("U1234", &dek).unwrap();
//! let recovered = keys.unwrap("U1234", &wrapped).unwrap();
//! assert_eq!(dek.as_bytes(), recovered.as_bytes());
//! ```

pub mod cipher;
pub mod keys;
pub mod locks;

pub use keys::{DataEncryptionKey, KeyHierarchy, MasterKey};
pub use locks::{resilient_read, resilient_write, SessionLocks, SessionTurnGuard};
