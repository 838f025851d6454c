use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Combines the cooperative stop flag with the driver's cancellation token.
///
/// The engine owns a child of the driver's token: cancelling the driver token
/// or calling [`StopSignal::request_stop`] both cancel it, so workers can wait
/// on one future while the two causes stay distinguishable.
#[derive(Debug, Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug)]
struct StopInner {
    stopping: AtomicBool,
    token: CancellationToken,
}

impl StopSignal {
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            inner: Arc::new(StopInner {
                stopping: AtomicBool::new(false),
                token: parent.child_token(),
            }),
        }
    }

    pub fn request_stop(&self) {
        if self.inner.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("cooperative stop requested; halting workers");
        self.inner.token.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.stopping.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// True once either signal fired.
    pub fn is_halted(&self) -> bool {
        self.is_stopping() || self.is_cancelled()
    }

    pub async fn halted(&self) {
        self.inner.token.cancelled().await;
    }

    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}
