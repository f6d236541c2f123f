pub mod error;
pub mod limiters;
pub mod logger;
pub mod retry;

pub use retry::retry_once;
