//! Abstractions over the remote record service. The engine never builds
//! requests itself; it only moves opaque `Request` values to a
//! [`Connection`] and classifies the [`ExecuteError`] that comes back.

use futures::future::BoxFuture;
use std::fmt;
use std::time::Duration;

/// Failure reported by a single execute call or a combined batch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteError {
    /// Throttling, timeouts, dropped connections. Retried inline while budget remains.
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },
    /// The target record does not exist.
    NotFound { message: String },
    /// Anything the service rejected outright; never retried.
    Fault { message: String },
}

impl ExecuteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Transient failure carrying a service-provided back-off hint.
    pub fn throttled(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. }
            | Self::NotFound { message }
            | Self::Fault { message } => message,
        }
    }
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteError::Transient {
                message,
                retry_after: Some(delay),
            } => write!(
                f,
                "transient service failure (retry after {}ms): {message}",
                delay.as_millis()
            ),
            ExecuteError::Transient { message, .. } => {
                write!(f, "transient service failure: {message}")
            }
            ExecuteError::NotFound { message } => write!(f, "target not found: {message}"),
            ExecuteError::Fault { message } => write!(f, "service fault: {message}"),
        }
    }
}

impl std::error::Error for ExecuteError {}

/// Error returned by [`Connection::try_clone`].
#[derive(Debug)]
pub enum CloneError {
    /// The connection type cannot produce independent handles.
    Unsupported,
    /// Cloning is supported but failed this time.
    Failed(anyhow::Error),
}

impl fmt::Display for CloneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloneError::Unsupported => write!(f, "connection does not support cloning"),
            CloneError::Failed(err) => write!(f, "connection clone failed: {err}"),
        }
    }
}

impl std::error::Error for CloneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CloneError::Unsupported => None,
            CloneError::Failed(err) => Some(err.as_ref()),
        }
    }
}

/// Per-request results of a combined call, positionally aligned with the
/// submitted requests.
pub type BatchResponse<R> = Vec<Result<R, ExecuteError>>;

/// Handle to the remote record service.
///
/// Workers call `execute` for unbatched items and `execute_batch` for
/// combined requests. Implementations must be safe to share between tasks:
/// when cloning is unsupported several workers drive the same handle.
pub trait Connection: Send + Sync + 'static {
    type Request: Clone + Send + Sync + 'static;
    type Response: Send + 'static;

    fn execute<'a>(
        &'a self,
        request: Self::Request,
    ) -> BoxFuture<'a, Result<Self::Response, ExecuteError>>;

    /// Sends `requests` as one round-trip. An outer error fails the whole
    /// batch; inner results must line up with `requests` by position.
    ///
    /// The default runs the requests one after another, which keeps
    /// services without a native batch endpoint usable.
    fn execute_batch<'a>(
        &'a self,
        requests: Vec<Self::Request>,
    ) -> BoxFuture<'a, Result<BatchResponse<Self::Response>, ExecuteError>> {
        Box::pin(async move {
            let mut responses = Vec::with_capacity(requests.len());
            for request in requests {
                responses.push(self.execute(request).await);
            }
            Ok(responses)
        })
    }

    /// Produces an independent handle for a new worker.
    fn try_clone(&self) -> Result<Self, CloneError>
    where
        Self: Sized;

    /// Releases resources held by a cloned handle. Never called on the base connection.
    fn dispose(&self) {}
}
