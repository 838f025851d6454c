use crate::connection::Connection;
use crate::processor::backoff::RetryState;
use crate::runtime::records::{ErrorCategory, ErrorRecord};
use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;

/// What a request did, as seen by its completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome<R> {
    Succeeded(R),
    /// The target was already gone and the item tolerates that.
    Absent,
}

/// Turns a request outcome into an optional object for the host.
pub type Completion<R> = Box<dyn FnOnce(RequestOutcome<R>) -> Option<Value> + Send>;

/// Operation family. Only items of the same kind share a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Update,
    Upsert,
    Delete,
    Custom(String),
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => f.write_str("create"),
            OperationKind::Update => f.write_str("update"),
            OperationKind::Upsert => f.write_str("upsert"),
            OperationKind::Delete => f.write_str("delete"),
            OperationKind::Custom(name) => f.write_str(name),
        }
    }
}

pub(crate) struct PendingRequest<C: Connection> {
    pub(crate) request: C::Request,
    on_complete: Option<Completion<C::Response>>,
}

impl<C: Connection> PendingRequest<C> {
    pub(crate) fn complete(self, outcome: RequestOutcome<C::Response>) -> Option<Value> {
        self.on_complete.and_then(|callback| callback(outcome))
    }
}

/// One unit of mutation work tied to one input record.
///
/// Moved into the shared queue by the engine and out of it by exactly one
/// worker, which keeps it until its requests finish or it is given up.
pub struct WorkItem<C: Connection> {
    input: Value,
    target: String,
    key: Option<String>,
    kind: OperationKind,
    ignore_absent: bool,
    retries: Option<u32>,
    pub(crate) requests: VecDeque<PendingRequest<C>>,
    pub(crate) retry: RetryState,
}

impl<C: Connection> WorkItem<C> {
    pub fn builder(kind: OperationKind, target: impl Into<String>, input: Value) -> WorkItemBuilder<C> {
        WorkItemBuilder {
            input,
            target: target.into(),
            key: None,
            kind,
            ignore_absent: false,
            retries: None,
            requests: VecDeque::new(),
        }
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    pub fn ignore_absent(&self) -> bool {
        self.ignore_absent
    }

    /// Requests not yet completed.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    /// Applies the engine-wide retry budget unless the item carries its own.
    pub(crate) fn arm_retries(&mut self, default_retries: u32) {
        self.retry = RetryState::new(self.retries.unwrap_or(default_retries));
    }

    /// Human-readable subject used in host messages, e.g. `delete contact 42`.
    pub fn describe(&self) -> String {
        match &self.key {
            Some(key) => format!("{} {} {key}", self.kind, self.target),
            None => format!("{} {}", self.kind, self.target),
        }
    }

    pub(crate) fn error_record(&self, category: ErrorCategory, message: String) -> ErrorRecord {
        ErrorRecord {
            input: self.input.clone(),
            target: self.target.clone(),
            key: self.key.clone(),
            category,
            message,
            attempts: self.retry.attempts(),
        }
    }
}

impl<C: Connection> fmt::Debug for WorkItem<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("target", &self.target)
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("ignore_absent", &self.ignore_absent)
            .field("pending_requests", &self.requests.len())
            .field("retry", &self.retry)
            .finish()
    }
}

pub struct WorkItemBuilder<C: Connection> {
    input: Value,
    target: String,
    key: Option<String>,
    kind: OperationKind,
    ignore_absent: bool,
    retries: Option<u32>,
    requests: VecDeque<PendingRequest<C>>,
}

impl<C: Connection> WorkItemBuilder<C> {
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Treat "target not found" as success (idempotent delete).
    pub fn ignore_absent(mut self, ignore: bool) -> Self {
        self.ignore_absent = ignore;
        self
    }

    /// Overrides the engine-wide retry budget for this item when it runs on
    /// its own. Batched items retry as a unit under the engine-wide budget.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Adds a request whose outcome is turned into host output by `on_complete`.
    pub fn request<F>(mut self, request: C::Request, on_complete: F) -> Self
    where
        F: FnOnce(RequestOutcome<C::Response>) -> Option<Value> + Send + 'static,
    {
        self.requests.push_back(PendingRequest {
            request,
            on_complete: Some(Box::new(on_complete)),
        });
        self
    }

    /// Adds a request that produces no host output.
    pub fn silent_request(mut self, request: C::Request) -> Self {
        self.requests.push_back(PendingRequest {
            request,
            on_complete: None,
        });
        self
    }

    pub fn build(self) -> Result<WorkItem<C>> {
        if self.requests.is_empty() {
            bail!(
                "work item for {} {} has no requests",
                self.kind,
                self.target
            );
        }
        if self.target.trim().is_empty() {
            bail!("work item target cannot be empty");
        }

        Ok(WorkItem {
            input: self.input,
            target: self.target,
            key: self.key,
            kind: self.kind,
            ignore_absent: self.ignore_absent,
            retries: self.retries,
            requests: self.requests,
            retry: RetryState::new(0),
        })
    }
}
