use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Policy applied when the claim store cannot be reached.
///
/// This is an explicit configuration decision: fail-open executes the
/// operation without coordination (duplicates become possible), fail-closed
/// rejects the request until the store recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    FailOpen,
    FailClosed,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub redis: RedisSettings,
    pub coordinator: CoordinatorSettings,
    pub application: ApplicationSettings,
}

#[derive(Debug, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationSettings {
    pub log_level: String,
}

/// Settings for the operation coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    /// Request header carrying the caller-supplied idempotency token.
    pub token_header: String,
    /// Prefix for derived store keys.
    pub key_prefix: String,
    /// Maximum accepted token length in bytes.
    pub max_token_length: usize,
    /// How long an unresolved claim blocks other claimants.
    pub claim_ttl_seconds: i64,
    /// How long a completed result stays replayable.
    pub completed_ttl_seconds: i64,
    /// HTTP methods that participate in coordination.
    pub methods: HashSet<String>,
    pub store_failure_policy: StoreFailurePolicy,
    /// Largest response body, in bytes, that will be buffered and cached for
    /// replay. Larger (or unbounded streaming) responses pass through
    /// uncaptured and their key stays retryable.
    pub max_capture_bytes: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            token_header: "idempotency-key".to_string(),
            key_prefix: "idem".to_string(),
            max_token_length: 255,
            claim_ttl_seconds: 30,
            completed_ttl_seconds: 86400, // 24 hours
            methods: ["POST", "PATCH"].iter().map(|m| m.to_string()).collect(),
            store_failure_policy: StoreFailurePolicy::FailClosed,
            max_capture_bytes: 1024 * 1024, // 1 MiB
        }
    }
}

impl CoordinatorSettings {
    /// Validates TTL and token-length constraints.
    pub fn validate(&self) -> Result<(), String> {
        if self.claim_ttl_seconds <= 0 {
            return Err("claim_ttl_seconds must be positive".to_string());
        }
        if self.claim_ttl_seconds >= self.completed_ttl_seconds {
            return Err(format!(
                "claim_ttl_seconds ({}) must be smaller than completed_ttl_seconds ({})",
                self.claim_ttl_seconds, self.completed_ttl_seconds
            ));
        }
        if self.max_token_length == 0 {
            return Err("max_token_length must be positive".to_string());
        }
        if self.max_capture_bytes == 0 {
            return Err("max_capture_bytes must be positive".to_string());
        }
        Ok(())
    }

    /// True if the given HTTP method participates in coordination.
    pub fn applies_to_method(&self, method: &str) -> bool {
        self.methods.contains(&method.to_uppercase())
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = CoordinatorSettings::default();
        assert_eq!(settings.token_header, "idempotency-key");
        assert_eq!(settings.claim_ttl_seconds, 30);
        assert_eq!(settings.completed_ttl_seconds, 86400);
        assert_eq!(settings.store_failure_policy, StoreFailurePolicy::FailClosed);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_claim_ttl_must_be_shorter_than_completed_ttl() {
        let settings = CoordinatorSettings {
            claim_ttl_seconds: 86400,
            completed_ttl_seconds: 30,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_max_capture_bytes_rejected() {
        let settings = CoordinatorSettings {
            max_capture_bytes: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_max_token_length_rejected() {
        let settings = CoordinatorSettings {
            max_token_length: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_applies_to_method_is_case_insensitive() {
        let settings = CoordinatorSettings::default();
        assert!(settings.applies_to_method("post"));
        assert!(settings.applies_to_method("PATCH"));
        assert!(!settings.applies_to_method("GET"));
    }

    #[test]
    fn test_policy_deserializes_from_snake_case() {
        let policy: StoreFailurePolicy = serde_json::from_str("\"fail_open\"").unwrap();
        assert_eq!(policy, StoreFailurePolicy::FailOpen);
    }
}
