use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use parabulk::{EngineConfig, EngineConfigBuilder, OperationKind, RequestOutcome, WorkItem};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use super::service::{MockService, ServiceRequest};

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Fast-cadence builder used by every scenario; retry delays are kept in
/// the millisecond range so exhausted budgets finish quickly.
pub fn fast_config() -> EngineConfigBuilder {
    EngineConfig::builder()
        .initial_retry_delay(Duration::from_millis(1))
        .max_retry_delay(Duration::from_millis(8))
        .idle_wait(Duration::from_millis(2))
        .poll_interval(Duration::from_millis(5))
        .activity("Deleting contacts")
}

pub fn config(workers: usize, batch_size: usize, retries: u32) -> Result<EngineConfig> {
    fast_config()
        .max_degree_of_parallelism(workers)
        .batch_size(batch_size)
        .retries(retries)
        .build()
}

/// Delete of contact `id` whose callback echoes the deleted id as an object.
pub fn delete_item(id: u64, ignore_absent: bool) -> WorkItem<MockService> {
    WorkItem::builder(OperationKind::Delete, "contact", json!({ "contactid": id }))
        .key(id.to_string())
        .ignore_absent(ignore_absent)
        .request(ServiceRequest::Delete(id), move |outcome| match outcome {
            RequestOutcome::Succeeded(deleted) => Some(json!({ "deleted": deleted })),
            RequestOutcome::Absent => Some(json!({ "absent": id })),
        })
        .build()
        .expect("delete item has a request")
}

pub fn upsert_item(id: u64) -> WorkItem<MockService> {
    WorkItem::builder(OperationKind::Upsert, "contact", json!({ "contactid": id }))
        .key(id.to_string())
        .request(ServiceRequest::Upsert(id), |outcome| match outcome {
            RequestOutcome::Succeeded(upserted) => Some(json!({ "upserted": upserted })),
            RequestOutcome::Absent => None,
        })
        .build()
        .expect("upsert item has a request")
}
