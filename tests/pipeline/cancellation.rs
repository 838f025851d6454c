use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use parabulk::BulkEngine;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::support::{
    helpers::{config, delete_item, fast_config, init_tracing},
    host::RecordingHost,
    service::MockService,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn host_stop_abandons_remaining_work() -> Result<()> {
    init_tracing();
    let service = MockService::with_records(0..200).latency(Duration::from_millis(20));
    let mut engine = BulkEngine::new(config(2, 1, 0)?, service.clone(), CancellationToken::new());
    let mut host = RecordingHost::new();

    for id in 0..200 {
        engine.queue_operation(delete_item(id, false), &mut host);
    }
    let stop = host.stop_flag();
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        stop.store(true, Ordering::SeqCst);
    });
    let summary = timeout(Duration::from_secs(5), engine.wait_for_completion(&mut host)).await?;

    assert!(summary.cancelled);
    assert_eq!(summary.queued, 200);
    assert!(summary.completed < 200, "completed {}", summary.completed);
    assert!(!service.records().is_empty());
    assert!(host.progress().iter().all(|record| !record.completed));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn driver_cancellation_returns_promptly() -> Result<()> {
    init_tracing();
    let cancel = CancellationToken::new();
    let service = MockService::with_records(0..100).latency(Duration::from_millis(50));
    let mut engine = BulkEngine::new(config(2, 1, 0)?, service.clone(), cancel.clone());
    let mut host = RecordingHost::new();

    for id in 0..100 {
        engine.queue_operation(delete_item(id, false), &mut host);
    }
    let driver = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(80)).await;
        driver.cancel();
    });
    let summary = timeout(Duration::from_secs(2), engine.wait_for_completion(&mut host)).await?;

    assert!(summary.cancelled);
    assert!(summary.completed < 100);
    assert!(cancel.is_cancelled());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_interrupts_retry_backoff() -> Result<()> {
    init_tracing();
    let service = MockService::with_records([1]);
    service.fail_transiently(1, u32::MAX);
    let config = fast_config()
        .max_degree_of_parallelism(1)
        .batch_size(1)
        .retries(5)
        .initial_retry_delay(Duration::from_secs(30))
        .max_retry_delay(Duration::from_secs(60))
        .build()?;
    let mut engine = BulkEngine::new(config, service.clone(), CancellationToken::new());
    let token = engine.cancellation_token();
    let mut host = RecordingHost::new();

    engine.queue_operation(delete_item(1, false), &mut host);
    tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    let summary = timeout(Duration::from_secs(2), engine.wait_for_completion(&mut host)).await?;

    assert!(summary.cancelled);
    assert_eq!(service.attempts(1), 1);
    assert!(host.errors().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn items_offered_after_stop_are_dropped() -> Result<()> {
    init_tracing();
    let service = MockService::with_records(0..10);
    let mut engine = BulkEngine::new(config(2, 1, 0)?, service.clone(), CancellationToken::new());
    let mut host = RecordingHost::new();

    assert!(engine.queue_operation(delete_item(0, false), &mut host));
    engine.request_stop();
    assert!(engine.is_stopping());
    for id in 1..10 {
        assert!(!engine.queue_operation(delete_item(id, false), &mut host));
    }
    let summary = timeout(Duration::from_secs(2), engine.wait_for_completion(&mut host)).await?;

    assert_eq!(summary.queued, 1);
    assert!(summary.cancelled);
    for id in 1..10 {
        assert!(service.records().contains(&id));
    }
    Ok(())
}
