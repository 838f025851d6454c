use std::time::Duration;

use anyhow::Result;
use parabulk::{BulkEngine, ErrorCategory, PROGRESS_ACTIVITY_ID};
use serde_json::json;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::support::{
    helpers::{config, delete_item, init_tracing, upsert_item},
    host::{HostEvent, RecordingHost},
    service::MockService,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deletes_237_records_in_batches_of_50() -> Result<()> {
    init_tracing();
    let service = MockService::with_records(0..237);
    let mut engine = BulkEngine::new(config(4, 50, 0)?, service.clone(), CancellationToken::new());
    let mut host = RecordingHost::new();

    for id in 0..237 {
        engine.queue_operation(delete_item(id, false), &mut host);
    }
    let summary = timeout(Duration::from_secs(10), engine.wait_for_completion(&mut host)).await?;

    assert_eq!(summary.queued, 237);
    assert_eq!(summary.completed, 237);
    assert_eq!(summary.errors, 0);
    assert!(!summary.cancelled);
    assert!(service.records().is_empty());

    let batches = service.batch_sizes();
    assert!(batches.iter().all(|&size| size <= 50), "batches: {batches:?}");
    assert_eq!(batches.iter().sum::<usize>(), 237);
    assert_eq!(service.single_calls(), 0);

    let progress = host.progress();
    let last = progress.last().expect("terminal progress record");
    assert!(last.completed);
    assert_eq!(last.percent_complete, 100);
    assert_eq!(last.activity_id, PROGRESS_ACTIVITY_ID);
    assert_eq!(host.objects().len(), 237);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn completed_matches_queued_without_batching() -> Result<()> {
    init_tracing();
    let service = MockService::with_records(0..400);
    let mut engine = BulkEngine::new(config(8, 1, 0)?, service.clone(), CancellationToken::new());
    let mut host = RecordingHost::new();

    for id in 0..400 {
        engine.queue_operation(delete_item(id, false), &mut host);
    }
    let counters = engine.counters();
    let summary = timeout(Duration::from_secs(10), engine.wait_for_completion(&mut host)).await?;

    assert_eq!(summary.completed, summary.queued);
    assert_eq!(counters.completed(), 400);
    assert_eq!(service.single_calls(), 400);
    assert!(service.batch_sizes().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn progress_percentages_never_decrease() -> Result<()> {
    init_tracing();
    let service = MockService::with_records(0..300).latency(Duration::from_micros(200));
    let mut engine = BulkEngine::new(config(6, 1, 0)?, service, CancellationToken::new());
    let mut host = RecordingHost::new();

    for id in 0..300 {
        engine.queue_operation(delete_item(id, false), &mut host);
    }
    timeout(Duration::from_secs(10), engine.wait_for_completion(&mut host)).await?;

    let percentages: Vec<u8> = host
        .progress()
        .iter()
        .map(|record| record.percent_complete)
        .collect();
    assert!(!percentages.is_empty());
    assert!(
        percentages.windows(2).all(|pair| pair[0] <= pair[1]),
        "percentages went backwards: {percentages:?}"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mixed_kinds_never_share_a_batch() -> Result<()> {
    init_tracing();
    let service = MockService::with_records(0..10);
    let mut engine = BulkEngine::new(config(1, 4, 0)?, service.clone(), CancellationToken::new());
    let mut host = RecordingHost::new();

    for id in 0..3 {
        engine.queue_operation(delete_item(id, false), &mut host);
    }
    for id in 100..102 {
        engine.queue_operation(upsert_item(id), &mut host);
    }
    engine.queue_operation(delete_item(5, false), &mut host);
    let summary = timeout(Duration::from_secs(10), engine.wait_for_completion(&mut host)).await?;

    assert_eq!(summary.completed, 6);
    assert_eq!(service.batch_sizes(), vec![3, 2, 1]);
    assert!(service.records().contains(&100));
    assert!(host.objects().contains(&&json!({ "upserted": 101 })));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_context_precedes_error_record() -> Result<()> {
    init_tracing();
    let service = MockService::with_records(Vec::new());
    service.fail_transiently(9, 5);
    let mut engine = BulkEngine::new(config(1, 1, 1)?, service, CancellationToken::new());
    let mut host = RecordingHost::new();

    engine.queue_operation(delete_item(9, false), &mut host);
    timeout(Duration::from_secs(10), engine.wait_for_completion(&mut host)).await?;

    let errors = host.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, ErrorCategory::RetriesExhausted);

    let retry_at = host
        .position(|event| matches!(event, HostEvent::Verbose(text) if text.starts_with("Retrying delete contact 9")))
        .expect("retry context line");
    let error_at = host
        .position(|event| matches!(event, HostEvent::Error(_)))
        .expect("error record");
    assert!(retry_at < error_at, "events: {:?}", host.events());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn declined_items_never_reach_the_service() -> Result<()> {
    init_tracing();
    let service = MockService::with_records(0..3);
    let mut engine = BulkEngine::new(config(2, 1, 0)?, service.clone(), CancellationToken::new());
    let mut host = RecordingHost::declining();

    for id in 0..3 {
        let item = delete_item(id, false);
        let description = item.describe();
        assert!(!engine.queue_if_confirmed(item, &description, &mut host));
    }
    let summary = engine.wait_for_completion(&mut host).await;

    assert_eq!(summary.queued, 0);
    assert_eq!(host.declined().len(), 3);
    assert_eq!(host.declined()[0], "delete contact 0");
    assert_eq!(service.records().len(), 3);
    assert!(host.progress().is_empty());
    Ok(())
}
