pub mod cost;
pub mod rate_limit;
pub mod retry;
pub mod worker_pool;

pub use cost::CostMeter;
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use worker_pool::{Deadline, WorkerError, WorkerPool};
