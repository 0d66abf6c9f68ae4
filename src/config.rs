// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Engine configuration.
//!
//! Settings come from an optional JSON file (`--config <path>`, otherwise
//! `~/.session-vault/config.json` if present) and are then overridden by
//! environment variables. The master key is only ever read from the
//! environment.
//!
//! | Variable                   | Default                     |
//! |----------------------------|-----------------------------|
//! | `MASTER_ENCRYPTION_KEY`    | required (base64 or hex)    |
//! | `REDIS_URL`                | unset: in-memory store      |
//! | `SESSION_TTL_SECS`         | `3600`                      |
//! | `SESSION_STORE_TIMEOUT_MS` | `10000`                     |
//! | `SESSION_ANSWER_TIMEOUT_MS`| `10000`                     |
//! | `SESSION_REQUIRED_FIELDS`  | `name,birthDate,birthTime`  |
//! | `SESSION_KEY_PREFIX`       | `session:`                  |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::conversation::{
    ConversationRules, Field, DEFAULT_CANCEL_COMMANDS, DEFAULT_REQUIRED_FIELDS, DEFAULT_START_COMMANDS,
};
use crate::error::{Result, SessionError};
use crate::security::MasterKey;

pub const ENV_MASTER_KEY: &str = "MASTER_ENCRYPTION_KEY";
pub const ENV_REDIS_URL: &str = "REDIS_URL";
pub const ENV_TTL_SECS: &str = "SESSION_TTL_SECS";
pub const ENV_STORE_TIMEOUT_MS: &str = "SESSION_STORE_TIMEOUT_MS";
pub const ENV_ANSWER_TIMEOUT_MS: &str = "SESSION_ANSWER_TIMEOUT_MS";
pub const ENV_REQUIRED_FIELDS: &str = "SESSION_REQUIRED_FIELDS";
pub const ENV_KEY_PREFIX: &str = "SESSION_KEY_PREFIX";

/// Idle timeout of a session, refreshed on every save.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// Longest accepted session TTL (30 days).
pub const MAX_SESSION_TTL_SECS: u64 = 30 * 24 * 3600;

/// Upper bound on any single store round trip.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 10_000;

/// Upper bound on one call to the answering service.
pub const DEFAULT_ANSWER_TIMEOUT_MS: u64 = 10_000;

pub const DEFAULT_KEY_PREFIX: &str = "session:";

/// Tunables for the session engine.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Redis connection string. `None` selects the in-memory store.
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub session_ttl_secs: u64,
    pub store_timeout_ms: u64,
    pub answer_timeout_ms: u64,
    /// Fields to collect, in order.
    pub required_fields: Vec<Field>,
    pub start_commands: Vec<String>,
    pub cancel_commands: Vec<String>,
    /// When false, text from a user without a session starts one.
    pub require_start_command: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            answer_timeout_ms: DEFAULT_ANSWER_TIMEOUT_MS,
            required_fields: DEFAULT_REQUIRED_FIELDS.to_vec(),
            start_commands: DEFAULT_START_COMMANDS.iter().map(|c| c.to_string()).collect(),
            cancel_commands: DEFAULT_CANCEL_COMMANDS.iter().map(|c| c.to_string()).collect(),
            require_start_command: true,
        }
    }
}

// The store URL may carry a password.
impl fmt::Debug for EngineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSettings")
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("key_prefix", &self.key_prefix)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("store_timeout_ms", &self.store_timeout_ms)
            .field("answer_timeout_ms", &self.answer_timeout_ms)
            .field("required_fields", &self.required_fields)
            .field("start_commands", &self.start_commands)
            .field("cancel_commands", &self.cancel_commands)
            .field("require_start_command", &self.require_start_command)
            .finish()
    }
}

/// `~/.session-vault/config.json`, if a home directory exists.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".session-vault").join("config.json"))
}

impl EngineSettings {
    /// Load settings: file (explicit path, else the default path if it
    /// exists), then environment overrides, then validation.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut settings = match explicit_path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        settings.apply_env_overrides(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a JSON settings file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SessionError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| SessionError::Config(format!("invalid settings file {}: {}", path.display(), e)))
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_REDIS_URL).filter(|v| !v.trim().is_empty()) {
            self.redis_url = Some(url.trim().to_string());
        }
        if let Some(prefix) = lookup(ENV_KEY_PREFIX) {
            self.key_prefix = prefix;
        }
        if let Some(raw) = lookup(ENV_TTL_SECS) {
            self.session_ttl_secs = parse_number(ENV_TTL_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_STORE_TIMEOUT_MS) {
            self.store_timeout_ms = parse_number(ENV_STORE_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_ANSWER_TIMEOUT_MS) {
            self.answer_timeout_ms = parse_number(ENV_ANSWER_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_REQUIRED_FIELDS) {
            self.required_fields = raw
                .split(',')
                .filter(|name| !name.trim().is_empty())
                .map(str::parse::<Field>)
                .collect::<Result<Vec<_>>>()?;
        }
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.session_ttl_secs == 0 {
            return Err(SessionError::Config("session TTL must be greater than zero".to_string()));
        }
        if self.session_ttl_secs > MAX_SESSION_TTL_SECS {
            return Err(SessionError::Config(format!(
                "session TTL must be at most {} seconds",
                MAX_SESSION_TTL_SECS
            )));
        }
        if self.store_timeout_ms == 0 || self.answer_timeout_ms == 0 {
            return Err(SessionError::Config("timeouts must be greater than zero".to_string()));
        }
        self.conversation_rules().map(|_| ())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn answer_timeout(&self) -> Duration {
        Duration::from_millis(self.answer_timeout_ms)
    }

    /// State machine rules described by these settings.
    pub fn conversation_rules(&self) -> Result<ConversationRules> {
        Ok(ConversationRules::new(self.required_fields.clone())?
            .with_commands(self.start_commands.clone(), self.cancel_commands.clone())?
            .require_start_command(self.require_start_command))
    }
}

/// Read the master key from `MASTER_ENCRYPTION_KEY`.
pub fn load_master_key_from_env() -> Result<MasterKey> {
    let encoded = std::env::var(ENV_MASTER_KEY)
        .map_err(|_| SessionError::Config(format!("{} is not set", ENV_MASTER_KEY)))?;
    MasterKey::from_encoded(&encoded)
}

fn parse_number(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| SessionError::Config(format!("{} must be a whole number", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.ttl(), Duration::from_secs(3600));
        assert_eq!(settings.store_timeout(), Duration::from_secs(10));
        assert_eq!(settings.required_fields, DEFAULT_REQUIRED_FIELDS.to_vec());
        assert_eq!(settings.key_prefix, "session:");
        assert!(settings.redis_url.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"session_ttl_secs": 600, "required_fields": ["name", "birthPlace"]}}"#).unwrap();

        let settings = EngineSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.session_ttl_secs, 600);
        assert_eq!(settings.required_fields, vec![Field::Name, Field::BirthPlace]);
        assert_eq!(settings.store_timeout_ms, DEFAULT_STORE_TIMEOUT_MS);
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(EngineSettings::from_file(file.path()), Err(SessionError::Config(_))));
        assert!(matches!(
            EngineSettings::from_file(Path::new("/nonexistent/session-vault.json")),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = EngineSettings::default();
        settings
            .apply_env_overrides(env(&[
                (ENV_REDIS_URL, "redis://localhost:6379/0"),
                (ENV_TTL_SECS, "120"),
                (ENV_STORE_TIMEOUT_MS, " 250 "),
                (ENV_REQUIRED_FIELDS, "name, birthDate"),
                (ENV_KEY_PREFIX, "bot:"),
            ]))
            .unwrap();

        assert_eq!(settings.redis_url.as_deref(), Some("redis://localhost:6379/0"));
        assert_eq!(settings.session_ttl_secs, 120);
        assert_eq!(settings.store_timeout_ms, 250);
        assert_eq!(settings.required_fields, vec![Field::Name, Field::BirthDate]);
        assert_eq!(settings.key_prefix, "bot:");
    }

    #[test]
    fn test_bad_env_values() {
        let mut settings = EngineSettings::default();
        assert!(settings.apply_env_overrides(env(&[(ENV_TTL_SECS, "an hour")])).is_err());
        assert!(settings.apply_env_overrides(env(&[(ENV_REQUIRED_FIELDS, "name,zodiac")])).is_err());
    }

    #[test]
    fn test_validation() {
        let zero_ttl = EngineSettings {
            session_ttl_secs: 0,
            ..EngineSettings::default()
        };
        assert!(zero_ttl.validate().is_err());

        let longest = EngineSettings {
            session_ttl_secs: MAX_SESSION_TTL_SECS,
            ..EngineSettings::default()
        };
        assert!(longest.validate().is_ok());

        let duplicate = EngineSettings {
            required_fields: vec![Field::Name, Field::Name],
            ..EngineSettings::default()
        };
        assert!(duplicate.validate().is_err());

        let no_cancel = EngineSettings {
            cancel_commands: vec![],
            ..EngineSettings::default()
        };
        assert!(no_cancel.validate().is_err());
    }

    #[test]
    fn test_oversized_ttl_from_env_is_rejected() {
        let mut settings = EngineSettings::default();
        settings
            .apply_env_overrides(env(&[(ENV_TTL_SECS, "18446744073709551615")]))
            .unwrap();
        match settings.validate() {
            Err(SessionError::Config(message)) => assert!(message.contains("at most")),
            other => panic!("expected a config error, got {:?}", other),
        }
    }

    #[test]
    fn test_debug_hides_store_url() {
        let settings = EngineSettings {
            redis_url: Some("redis://:hunter2@cache:6379".to_string()),
            ..EngineSettings::default()
        };
        assert!(!format!("{:?}", settings).contains("hunter2"));
    }
}
