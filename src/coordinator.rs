use crate::capture::CapturedResponse;
use crate::config::{CoordinatorSettings, StoreFailurePolicy};
use crate::error::{AppError, Result};
use crate::key::{IdempotencyKey, KeyDeriver, KeyDeriverConfig};
use crate::store::{ClaimRecord, ClaimStore};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for coordination outcomes.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub total_requests: AtomicU64,
    pub bypassed_requests: AtomicU64,
    pub executed_requests: AtomicU64,
    pub replayed_requests: AtomicU64,
    pub conflict_requests: AtomicU64,
    pub handler_failures: AtomicU64,
    pub store_failures: AtomicU64,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypassed(&self) {
        self.bypassed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_executed(&self) {
        self.executed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replayed(&self) {
        self.replayed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflict_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn replay_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        let replayed = self.replayed_requests.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            replayed as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            bypassed_requests: self.bypassed_requests.load(Ordering::Relaxed),
            executed_requests: self.executed_requests.load(Ordering::Relaxed),
            replayed_requests: self.replayed_requests.load(Ordering::Relaxed),
            conflict_requests: self.conflict_requests.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub bypassed_requests: u64,
    pub executed_requests: u64,
    pub replayed_requests: u64,
    pub conflict_requests: u64,
    pub handler_failures: u64,
    pub store_failures: u64,
}

/// Outcome of coordinating one operation request.
#[derive(Debug)]
pub enum Outcome {
    /// The handler ran in this process; the response is fresh.
    Executed(CapturedResponse),
    /// A previously committed result was returned verbatim; the handler was
    /// not invoked.
    Replayed(CapturedResponse),
    /// Another execution holds the claim; the caller should retry.
    Conflict,
}

/// The idempotency state machine.
///
/// Decides, per request, whether to execute, replay, or signal a conflict.
/// Correctness rests entirely on the store's conditional-create: the
/// coordinator holds no in-process locks and stays correct when run as N
/// independent, unsynchronized processes against the same store.
pub struct Coordinator {
    store: Arc<dyn ClaimStore>,
    deriver: KeyDeriver,
    settings: CoordinatorSettings,
    metrics: Arc<CoordinatorMetrics>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn ClaimStore>, settings: CoordinatorSettings) -> Result<Self> {
        settings
            .validate()
            .map_err(config::ConfigError::Message)
            .map_err(AppError::Config)?;

        let deriver = KeyDeriver::new(KeyDeriverConfig {
            key_prefix: settings.key_prefix.clone(),
            max_token_length: settings.max_token_length,
        });

        Ok(Self {
            store,
            deriver,
            settings,
            metrics: Arc::new(CoordinatorMetrics::new()),
        })
    }

    pub fn metrics(&self) -> Arc<CoordinatorMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Runs one operation under idempotency coordination.
    ///
    /// With no token the handler runs directly and the store is never
    /// touched. Otherwise the claim lifecycle applies: replay a committed
    /// result, signal a conflict while a live claim is held elsewhere, or win
    /// the claim, run the handler exactly once, and commit the snapshot.
    ///
    /// A handler failure (an error, or a 5xx response) releases the claim
    /// immediately so the caller's retry is not blocked for the full claim
    /// TTL. Store and handler failures are never retried internally.
    pub async fn execute<F, Fut>(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        handler: F,
    ) -> Result<Outcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CapturedResponse>>,
    {
        self.metrics.record_request();

        let Some(token) = token else {
            self.metrics.record_bypassed();
            let response = handler().await?;
            return Ok(Outcome::Executed(response));
        };

        let key = self.deriver.derive(method, path, token)?;

        let existing = match self.store.read(&key).await {
            Ok(existing) => existing,
            Err(err) if err.is_store_unavailable() => {
                return self.handle_store_failure(err, handler).await;
            }
            Err(err) => return Err(err),
        };

        match existing {
            Some(ClaimRecord::Completed { response, .. }) => {
                self.metrics.record_replayed();
                tracing::debug!(key = %key, "replaying committed response");
                return Ok(Outcome::Replayed(response));
            }
            Some(record @ ClaimRecord::Claimed { .. }) => {
                if !record.is_stale_claim(self.settings.claim_ttl_seconds) {
                    self.metrics.record_conflict();
                    return Ok(Outcome::Conflict);
                }
                // Stale claim from a crashed holder: compare-and-delete
                // exactly the record observed, so a concurrent takeover that
                // already re-claimed the key is never deleted. Whether the
                // delete matched or not, the conditional create below is the
                // sole arbiter of who proceeds.
                tracing::warn!(key = %key, "clearing claim left past its TTL");
                if let Err(err) = self.store.release_if_match(&key, &record).await {
                    if err.is_store_unavailable() {
                        return self.handle_store_failure(err, handler).await;
                    }
                    return Err(err);
                }
            }
            None => {}
        }

        let claimed = match self
            .store
            .try_claim(
                &key,
                &ClaimRecord::claimed_now(),
                self.settings.claim_ttl_seconds,
            )
            .await
        {
            Ok(claimed) => claimed,
            Err(err) if err.is_store_unavailable() => {
                return self.handle_store_failure(err, handler).await;
            }
            Err(err) => return Err(err),
        };

        if !claimed {
            // Lost the race to a concurrent claimant.
            self.metrics.record_conflict();
            return Ok(Outcome::Conflict);
        }

        // This process is the claim holder.
        match handler().await {
            Ok(response) if response.is_success() => {
                let record = ClaimRecord::completed_now(response.clone());
                if let Err(err) = self
                    .store
                    .commit(&key, &record, self.settings.completed_ttl_seconds)
                    .await
                {
                    // The response was produced; only replayability is lost.
                    self.metrics.record_store_failure();
                    tracing::error!(key = %key, "failed to commit completed record: {}", err);
                }
                self.metrics.record_executed();
                Ok(Outcome::Executed(response))
            }
            Ok(response) => {
                // 5xx outcome: return it to the caller but never cache it,
                // and release the claim so a retry can run.
                self.metrics.record_handler_failure();
                self.release_after_failure(&key).await;
                Ok(Outcome::Executed(response))
            }
            Err(err) => {
                self.metrics.record_handler_failure();
                self.release_after_failure(&key).await;
                Err(match err {
                    err @ AppError::Handler(_) => err,
                    other => AppError::Handler(anyhow::Error::new(other)),
                })
            }
        }
    }

    async fn release_after_failure(&self, key: &IdempotencyKey) {
        if let Err(err) = self.store.release(key).await {
            // The claim TTL remains the backstop.
            tracing::error!(key = %key, "failed to release claim after handler failure: {}", err);
        }
    }

    async fn handle_store_failure<F, Fut>(&self, err: AppError, handler: F) -> Result<Outcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CapturedResponse>>,
    {
        self.metrics.record_store_failure();

        match self.settings.store_failure_policy {
            StoreFailurePolicy::FailClosed => Err(err),
            StoreFailurePolicy::FailOpen => {
                tracing::warn!("claim store unavailable, executing without coordination: {}", err);
                let response = handler().await?;
                Ok(Outcome::Executed(response))
            }
        }
    }
}
