pub mod dispatcher;
pub mod rate_limit;

pub use dispatcher::{Dispatcher, QueueStats};
pub use rate_limit::{RateLimiter, RetryAfter, Scope};
