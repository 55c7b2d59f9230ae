use crate::error::Result;
use crate::key::IdempotencyKey;
use crate::store::{ClaimRecord, ClaimStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    record: ClaimRecord,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process claim store for embedding and tests.
///
/// Mirrors the Redis semantics the coordinator depends on: create-if-absent
/// under a single lock and lazy TTL expiry (an expired entry behaves exactly
/// like an absent one). Not suitable for multi-process deployments.
#[derive(Default)]
pub struct MemoryClaimStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) records, for test assertions.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap();
        entries.values().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ClaimStore for MemoryClaimStore {
    async fn try_claim(
        &self,
        key: &IdempotencyKey,
        record: &ClaimRecord,
        ttl_seconds: i64,
    ) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();

        if let Some(existing) = entries.get(key.as_str()) {
            if !existing.is_expired() {
                return Ok(false);
            }
        }

        entries.insert(
            key.as_str().to_string(),
            Entry {
                record: record.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds as u64),
            },
        );
        Ok(true)
    }

    async fn read(&self, key: &IdempotencyKey) -> Result<Option<ClaimRecord>> {
        let entries = self.entries.lock().unwrap();

        Ok(entries
            .get(key.as_str())
            .filter(|e| !e.is_expired())
            .map(|e| e.record.clone()))
    }

    async fn commit(
        &self,
        key: &IdempotencyKey,
        record: &ClaimRecord,
        ttl_seconds: i64,
    ) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();

        entries.insert(
            key.as_str().to_string(),
            Entry {
                record: record.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds as u64),
            },
        );
        Ok(())
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key.as_str());
        Ok(())
    }

    async fn release_if_match(
        &self,
        key: &IdempotencyKey,
        expected: &ClaimRecord,
    ) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();

        match entries.get(key.as_str()) {
            Some(entry) if !entry.is_expired() && entry.record == *expected => {
                entries.remove(key.as_str());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
