//! Queue module: the dispatch index and the retry backoff policy.

mod dispatch;
mod retry;

pub use dispatch::{DispatchQueue, Slot};
pub use retry::RetryPolicy;
