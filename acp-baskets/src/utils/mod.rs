//! Utility modules for acp-baskets

pub mod db_retry;

pub use db_retry::{retry_transient, Retryable, RetryOutcome, RetryPolicy};
