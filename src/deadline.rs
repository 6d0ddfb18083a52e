//! Deadline-bounded remote calls.
//!
//! Every request to the survey service runs through [`call_with_deadline`].
//! When the deadline passes first, the request future is dropped, which
//! aborts the underlying HTTP request.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single remote call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CallError {
    #[error("request timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("server returned status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl CallError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout(_))
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CallError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            CallError::Status(status.as_u16())
        } else {
            CallError::Transport(err.to_string())
        }
    }
}

/// Run `call`, failing with [`CallError::Timeout`] if it has not finished
/// within `deadline`.
pub async fn call_with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, CallError>
where
    F: Future<Output = Result<T, CallError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(CallError::Timeout(deadline)),
    }
}
