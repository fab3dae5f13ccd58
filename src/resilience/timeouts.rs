//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap downstream calls with a deadline
//! - Cancel the call cleanly on timeout (the future is dropped)
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors and map to 503

use std::future::Future;
use std::time::Duration;

use crate::error::GatewayError;

/// Run `call`, failing with [`GatewayError::RequestTimedOut`] after `limit`.
pub async fn with_timeout<F, T>(limit: Duration, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::RequestTimedOut(limit.as_millis() as u64)),
    }
}
