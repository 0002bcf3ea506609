use anyhow::Result;
use bulkload::backend::{FakeCache, FakeQueue, FakeStore};
use bulkload::config::PipelineConfig;
use bulkload::consumer::IngestConsumer;
use bulkload::failure_log::{FailureLog, read_entries};
use bulkload::producer::{IngestProducer, Upload};
use bulkload::testing::{wait_until, write_user_csv};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const QUEUE: &str = "csv_chunk_queue";

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn upload_of_2500_rows_lands_in_store() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let config = PipelineConfig {
        failure_log_path: tmp.path().join("failed.log"),
        ..PipelineConfig::default()
    };
    let queue = FakeQueue::new();
    let cache = FakeCache::new();
    let store = FakeStore::new();
    cache.set("users:page:1", "[...]");

    let producer =
        IngestProducer::new(Arc::new(queue.clone()), Arc::new(cache.clone()), config.clone())
            .await?;
    let path = write_user_csv(tmp.path(), "users.csv", 2500)?;
    let report = producer.submit(Some(Upload::from_path(&path))).await?;

    // submit returns before anything is consumed
    assert_eq!(report.chunks, 3);
    assert_eq!(queue.ready_len(QUEUE), 3);
    assert!(store.is_empty());
    assert!(!cache.contains("users:page:1"));
    assert!(!path.exists());

    let log = Arc::new(FailureLog::open(&config.failure_log_path).await?);
    let consumer =
        IngestConsumer::new(Arc::new(queue.clone()), Arc::new(store.clone()), log, config.clone())?;
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let worker = tokio::spawn(async move { consumer.run(token).await });

    let drained = wait_until(Duration::from_secs(10), || queue.acked_count(QUEUE) == 3).await;
    shutdown.cancel();
    worker.await??;

    assert!(drained);
    assert_eq!(store.len(), 2500);
    assert_eq!(store.statements(), 3);
    let mut names: Vec<_> = store.rows().into_iter().filter_map(|r| r.name).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 2500);
    assert!(read_entries(&config.failure_log_path)?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn transient_store_outage_is_recovered_by_redelivery() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let config = PipelineConfig {
        chunk_size: 100,
        row_buffer: 100,
        failure_log_path: tmp.path().join("failed.log"),
        ..PipelineConfig::default()
    };
    let queue = FakeQueue::new();
    let store = FakeStore::new();
    store.fail_next(2, bulkload::backend::ErrorKind::Timeout);

    let producer =
        IngestProducer::new(Arc::new(queue.clone()), Arc::new(FakeCache::new()), config.clone())
            .await?;
    let path = write_user_csv(tmp.path(), "users.csv", 450)?;
    producer.submit(Some(Upload::from_path(&path))).await?;

    let log = Arc::new(FailureLog::open(&config.failure_log_path).await?);
    let consumer =
        IngestConsumer::new(Arc::new(queue.clone()), Arc::new(store.clone()), log, config.clone())?;
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let worker = tokio::spawn(async move { consumer.run(token).await });

    let drained = wait_until(Duration::from_secs(10), || store.len() == 450).await;
    shutdown.cancel();
    worker.await??;

    assert!(drained, "store has {} rows", store.len());
    assert_eq!(queue.acked_count(QUEUE), 5);
    assert_eq!(read_entries(&config.failure_log_path)?.len(), 2);
    Ok(())
}
