pub mod memory;
pub mod redis;

pub use memory::MemoryClaimStore;
pub use redis::RedisClaimStore;

use crate::capture::CapturedResponse;
use crate::error::Result;
use crate::key::IdempotencyKey;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The value stored under an idempotency key.
///
/// Absence of a record (the `Empty` state) is represented as `None` at the
/// store interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ClaimRecord {
    /// An execution is in flight; holds no result.
    Claimed { claimed_at: DateTime<Utc> },
    /// Execution finished; authoritative replay payload.
    Completed {
        response: CapturedResponse,
        completed_at: DateTime<Utc>,
    },
}

impl ClaimRecord {
    pub fn claimed_now() -> Self {
        ClaimRecord::Claimed {
            claimed_at: Utc::now(),
        }
    }

    pub fn completed_now(response: CapturedResponse) -> Self {
        ClaimRecord::Completed {
            response,
            completed_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ClaimRecord::Completed { .. })
    }

    /// True for a claim left unresolved past its TTL. Such a record is
    /// treated as if no claim exists: a liveness safety valve against
    /// crashed holders, not a correctness guarantee.
    pub fn is_stale_claim(&self, claim_ttl_seconds: i64) -> bool {
        match self {
            ClaimRecord::Claimed { claimed_at } => {
                Utc::now().signed_duration_since(*claimed_at)
                    > Duration::seconds(claim_ttl_seconds)
            }
            ClaimRecord::Completed { .. } => false,
        }
    }
}

/// Thin client over the shared key-value store.
///
/// The store's conditional-create is the sole serialization point across
/// processes; every implementation must provide single-key atomicity for
/// `try_claim` with no read-then-write window. Implementations are injected
/// into the coordinator, never reached through globals.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Atomically creates the record only if the key is absent, with the
    /// given TTL. Returns true iff this call created it.
    async fn try_claim(
        &self,
        key: &IdempotencyKey,
        record: &ClaimRecord,
        ttl_seconds: i64,
    ) -> Result<bool>;

    /// Point read.
    async fn read(&self, key: &IdempotencyKey) -> Result<Option<ClaimRecord>>;

    /// Unconditional overwrite with TTL. Used only by the claim holder to
    /// transition `Claimed` to `Completed`.
    async fn commit(
        &self,
        key: &IdempotencyKey,
        record: &ClaimRecord,
        ttl_seconds: i64,
    ) -> Result<()>;

    /// Unconditional delete, used only by the claim holder for explicit
    /// abort/cleanup.
    async fn release(&self, key: &IdempotencyKey) -> Result<()>;

    /// Atomically deletes the record only if it still equals `expected`.
    /// Returns true iff the record was removed.
    ///
    /// Used for stale-claim takeover: compare-and-delete guarantees a slow
    /// claimant cannot delete a fresh claim another process won after
    /// observing the same stale record.
    async fn release_if_match(
        &self,
        key: &IdempotencyKey,
        expected: &ClaimRecord,
    ) -> Result<bool>;
}
