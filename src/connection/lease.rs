use super::client::{CloneError, Connection};
use crate::runtime::output::OutputChannels;
use crate::runtime::telemetry::Telemetry;
use std::sync::Arc;
use tokio::task;

/// Connection handle held by exactly one worker.
///
/// `Owned` handles were cloned for the worker and are disposed when the lease
/// drops. `Shared` handles alias the base connection and are left untouched.
pub enum ConnectionLease<C: Connection> {
    Owned(C),
    Shared(Arc<C>),
}

impl<C: Connection> ConnectionLease<C> {
    /// Clones `base` for a worker, falling back to sharing it when the
    /// connection cannot be cloned. The fallback is reported as verbose host
    /// output, never as an error record.
    ///
    /// `try_clone` may block on a network handshake, so it runs on the
    /// blocking pool. A panicking clone is treated like a failed one.
    pub(crate) async fn acquire(
        base: &Arc<C>,
        worker_id: usize,
        outputs: &OutputChannels,
        telemetry: &Telemetry,
    ) -> Self {
        let cloned = {
            let base = Arc::clone(base);
            task::spawn_blocking(move || base.try_clone()).await
        };
        let cloned = cloned.unwrap_or_else(|join_err| {
            Err(CloneError::Failed(anyhow::anyhow!(
                "clone task did not complete: {join_err}"
            )))
        });

        match cloned {
            Ok(connection) => {
                tracing::debug!(worker = worker_id, "cloned connection for worker");
                Self::Owned(connection)
            }
            Err(CloneError::Unsupported) => {
                tracing::debug!(
                    worker = worker_id,
                    "connection cannot be cloned; sharing base connection"
                );
                outputs.verbose(format!(
                    "Connection does not support cloning; worker {worker_id} shares the base connection"
                ));
                telemetry.record_shared_connection();
                Self::Shared(Arc::clone(base))
            }
            Err(CloneError::Failed(err)) => {
                tracing::warn!(
                    worker = worker_id,
                    error = %err,
                    "connection clone failed; sharing base connection"
                );
                outputs.verbose(format!(
                    "Cloning the connection failed ({err:#}); worker {worker_id} shares the base connection"
                ));
                telemetry.record_shared_connection();
                Self::Shared(Arc::clone(base))
            }
        }
    }

    pub fn connection(&self) -> &C {
        match self {
            Self::Owned(connection) => connection,
            Self::Shared(connection) => connection.as_ref(),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }
}

impl<C: Connection> Drop for ConnectionLease<C> {
    fn drop(&mut self) {
        if let Self::Owned(connection) = self {
            connection.dispose();
        }
    }
}
