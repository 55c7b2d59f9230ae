use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A derived coordination key for one logical operation.
///
/// Stable across retries and process restarts: the same (method, path, token)
/// triple always derives the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration for key derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyDeriverConfig {
    /// Prefix for derived keys.
    pub key_prefix: String,
    /// Maximum accepted token length in bytes.
    pub max_token_length: usize,
}

impl Default for KeyDeriverConfig {
    fn default() -> Self {
        Self {
            key_prefix: "idem".to_string(),
            max_token_length: 255,
        }
    }
}

/// Derives idempotency keys using SHA-256 hashing.
///
/// Pure and deterministic: no timestamps, no random salts. Distinct
/// (method, path, token) triples derive distinct keys because each component
/// is fed to the hasher with its own delimiter.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    config: KeyDeriverConfig,
}

impl KeyDeriver {
    pub fn new(config: KeyDeriverConfig) -> Self {
        Self { config }
    }

    pub fn with_default_config() -> Self {
        Self::new(KeyDeriverConfig::default())
    }

    /// Derives the coordination key for one logical operation.
    ///
    /// Fails with `InvalidKey` when the token is empty or exceeds the
    /// configured maximum length; no store interaction happens on failure.
    pub fn derive(&self, method: &str, path: &str, token: &str) -> Result<IdempotencyKey> {
        if token.is_empty() {
            return Err(AppError::InvalidKey(
                "idempotency token must not be empty".to_string(),
            ));
        }
        if token.len() > self.config.max_token_length {
            return Err(AppError::InvalidKey(format!(
                "idempotency token exceeds {} bytes",
                self.config.max_token_length
            )));
        }

        // Each component is length-prefixed, so a byte sequence inside one
        // component can never collide with the boundary to the next.
        let mut hasher = Sha256::new();
        for part in [method.to_uppercase().as_str(), path, token] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }

        let hash_hex = hex::encode(hasher.finalize());

        Ok(IdempotencyKey(format!(
            "{}_{}",
            self.config.key_prefix, hash_hex
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let deriver = KeyDeriver::with_default_config();

        let key1 = deriver.derive("POST", "/payments", "req-123").unwrap();
        let key2 = deriver.derive("POST", "/payments", "req-123").unwrap();

        assert_eq!(key1, key2);
        assert!(key1.as_str().starts_with("idem_"));
    }

    #[test]
    fn test_distinct_operations_derive_distinct_keys() {
        let deriver = KeyDeriver::with_default_config();

        let base = deriver.derive("POST", "/payments", "req-123").unwrap();
        let other_method = deriver.derive("PATCH", "/payments", "req-123").unwrap();
        let other_path = deriver.derive("POST", "/refunds", "req-123").unwrap();
        let other_token = deriver.derive("POST", "/payments", "req-124").unwrap();

        assert_ne!(base, other_method);
        assert_ne!(base, other_path);
        assert_ne!(base, other_token);
    }

    #[test]
    fn test_component_boundaries_cannot_collide() {
        let deriver = KeyDeriver::with_default_config();

        // Shifting bytes across the path/token boundary must change the key.
        let a = deriver.derive("POST", "/a|tok:b", "c").unwrap();
        let b = deriver.derive("POST", "/a", "b|tok:c").unwrap();
        assert_ne!(a, b);

        let a = deriver.derive("POST", "/ab", "c").unwrap();
        let b = deriver.derive("POST", "/a", "bc").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_method_case_does_not_split_keys() {
        let deriver = KeyDeriver::with_default_config();

        let upper = deriver.derive("POST", "/payments", "req-123").unwrap();
        let lower = deriver.derive("post", "/payments", "req-123").unwrap();

        assert_eq!(upper, lower);
    }

    #[test]
    fn test_empty_token_rejected() {
        let deriver = KeyDeriver::with_default_config();

        let err = deriver.derive("POST", "/payments", "").unwrap_err();
        assert!(matches!(err, AppError::InvalidKey(_)));
    }

    #[test]
    fn test_oversized_token_rejected() {
        let deriver = KeyDeriver::new(KeyDeriverConfig {
            key_prefix: "idem".to_string(),
            max_token_length: 16,
        });

        let err = deriver
            .derive("POST", "/payments", "a-token-well-beyond-sixteen-bytes")
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidKey(_)));
    }

    #[test]
    fn test_key_length() {
        let deriver = KeyDeriver::with_default_config();
        let key = deriver.derive("POST", "/payments", "req-123").unwrap();

        // SHA-256 produces 64 hex chars + prefix + underscore
        assert_eq!(key.as_str().len(), "idem_".len() + 64);
    }
}
