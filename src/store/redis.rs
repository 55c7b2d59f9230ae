use crate::error::{AppError, Result};
use crate::key::IdempotencyKey;
use crate::store::{ClaimRecord, ClaimStore};
use async_trait::async_trait;
use redis::AsyncCommands;

// Deletes the key only while it still holds the exact payload the caller
// read, in one atomic step on the server.
const RELEASE_IF_MATCH_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis-backed claim store.
///
/// `try_claim` maps to `SET NX EX`, the single atomic create-if-absent the
/// whole coordination scheme rests on. TTL enforcement is the store's: expired
/// records simply disappear, no sweep runs here.
pub struct RedisClaimStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisClaimStore {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn make_key(&self, key: &IdempotencyKey) -> String {
        format!("{}:{}", self.key_prefix, key.as_str())
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::store_unavailable)
    }
}

#[async_trait]
impl ClaimStore for RedisClaimStore {
    async fn try_claim(
        &self,
        key: &IdempotencyKey,
        record: &ClaimRecord,
        ttl_seconds: i64,
    ) -> Result<bool> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(record)?;

        let result: Option<String> = conn
            .set_options(
                self.make_key(key),
                payload,
                redis::SetOptions::default()
                    .conditional_set(redis::ExistenceCheck::NX)
                    .with_expiration(redis::SetExpiry::EX(ttl_seconds as usize)),
            )
            .await
            .map_err(AppError::store_unavailable)?;

        Ok(result.is_some())
    }

    async fn read(&self, key: &IdempotencyKey) -> Result<Option<ClaimRecord>> {
        let mut conn = self.connection().await?;

        let value: Option<String> = conn
            .get(self.make_key(key))
            .await
            .map_err(AppError::store_unavailable)?;

        match value {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn commit(
        &self,
        key: &IdempotencyKey,
        record: &ClaimRecord,
        ttl_seconds: i64,
    ) -> Result<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(record)?;

        let _: () = conn
            .set_ex(self.make_key(key), payload, ttl_seconds as u64)
            .await
            .map_err(AppError::store_unavailable)?;

        Ok(())
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<()> {
        let mut conn = self.connection().await?;

        let _: i64 = conn
            .del(self.make_key(key))
            .await
            .map_err(AppError::store_unavailable)?;

        Ok(())
    }

    async fn release_if_match(
        &self,
        key: &IdempotencyKey,
        expected: &ClaimRecord,
    ) -> Result<bool> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(expected)?;

        let removed: i64 = redis::Script::new(RELEASE_IF_MATCH_SCRIPT)
            .key(self.make_key(key))
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(AppError::store_unavailable)?;

        Ok(removed > 0)
    }
}
