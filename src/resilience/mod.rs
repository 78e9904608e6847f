//! Retry policy and failure classification for outbound requests.

mod retry;

pub use retry::{
    execute_with_retry, is_retryable_error, is_retryable_signature, is_retryable_status,
    RetryConfig, RetryOutcome, RETRYABLE_SIGNATURES, RETRYABLE_STATUSES,
};
