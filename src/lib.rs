pub mod capture;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod logging;
pub mod middleware;
pub mod store;

pub use capture::{CapturedResponse, REPLAY_MARKER_HEADER};
pub use config::{CoordinatorSettings, Settings, StoreFailurePolicy};
pub use coordinator::{Coordinator, CoordinatorMetrics, MetricsSnapshot, Outcome};
pub use error::{AppError, Result};
pub use key::{IdempotencyKey, KeyDeriver, KeyDeriverConfig};
pub use middleware::coordinate_request;
pub use store::{ClaimRecord, ClaimStore, MemoryClaimStore, RedisClaimStore};
