use crate::connection::Connection;
use crate::work::item::{OperationKind, WorkItem};
use futures::future::BoxFuture;

/// Anything that can be grouped by kind into a batch.
pub trait Batchable {
    type Kind: PartialEq;

    fn batch_kind(&self) -> &Self::Kind;
}

impl<C: Connection> Batchable for WorkItem<C> {
    type Kind = OperationKind;

    fn batch_kind(&self) -> &OperationKind {
        self.kind()
    }
}

/// Executes a full or partial batch handed over by a [`Batcher`].
pub trait BatchSink<T>: Send + Sync {
    fn execute_batch<'a>(&'a self, batch: Vec<T>) -> BoxFuture<'a, ()>;
}

/// Per-worker accumulator of same-kind items.
///
/// Executes as soon as `batch_size` items are pending, when an item of a
/// different kind arrives, or on an explicit [`Batcher::flush`]. The batch is
/// always empty again after an execution, whatever its outcome.
#[derive(Debug)]
pub struct Batcher<T> {
    batch_size: usize,
    pending: Vec<T>,
}

impl<T: Batchable + Send> Batcher<T> {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            pending: Vec::with_capacity(batch_size),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub async fn queue_operation<S>(&mut self, item: T, sink: &S)
    where
        S: BatchSink<T> + ?Sized,
    {
        let kind_changed = self
            .pending
            .first()
            .is_some_and(|first| first.batch_kind() != item.batch_kind());
        if kind_changed {
            self.flush(sink).await;
        }

        self.pending.push(item);
        if self.pending.len() >= self.batch_size {
            self.flush(sink).await;
        }
    }

    pub async fn flush<S>(&mut self, sink: &S)
    where
        S: BatchSink<T> + ?Sized,
    {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        sink.execute_batch(batch).await;
    }
}
