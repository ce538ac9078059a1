//! Start/stop, crash redelivery and broker loss.

use super::harness::{sample_order, wait_until, ScriptedStore, TestPipeline};
use crate::broker::Broker;
use crate::error::QueueError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn started_consumer_persists_and_stops() {
    let pipeline = TestPipeline::new(ScriptedStore::succeeding()).await;
    let handle = pipeline.consumer().start();

    pipeline.publish(&sample_order()).await;
    assert!(wait_until(WAIT, || pipeline.store.saved().len() == 1).await);

    tokio::time::timeout(WAIT, handle.stop())
        .await
        .expect("stop should return promptly")
        .unwrap();
    assert_eq!(pipeline.queue_depth(), 0);
    assert_eq!(pipeline.broker.unacked_count("order"), 0);
}

#[tokio::test]
async fn idle_consumer_stops_promptly() {
    let pipeline = TestPipeline::new(ScriptedStore::succeeding()).await;
    let handle = pipeline.consumer().start();
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(WAIT, handle.stop())
        .await
        .expect("idle stop should not hang")
        .unwrap();
}

#[tokio::test]
async fn stop_lets_in_flight_work_finish() {
    let pipeline = TestPipeline::new(ScriptedStore::gated()).await;
    let handle = pipeline.consumer().start();
    pipeline.publish(&sample_order()).await;
    assert!(wait_until(WAIT, || pipeline.store.attempt_count() == 1).await);

    let stopping = tokio::spawn(handle.stop());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!stopping.is_finished(), "stop must wait for the in-flight save");

    pipeline.store.release(1);
    stopping.await.unwrap().unwrap();

    assert_eq!(pipeline.store.saved().len(), 1);
    assert_eq!(pipeline.queue_depth(), 0);
    assert_eq!(pipeline.broker.unacked_count("order"), 0);
}

#[tokio::test]
async fn stopped_consumer_takes_no_new_deliveries() {
    let pipeline = TestPipeline::new(ScriptedStore::succeeding()).await;
    let handle = pipeline.consumer().start();
    handle.stop().await.unwrap();

    pipeline.publish(&sample_order()).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(pipeline.queue_depth(), 1);
    assert_eq!(pipeline.store.attempt_count(), 0);
}

#[tokio::test]
async fn crash_mid_save_redelivers_to_next_worker() {
    let pipeline = TestPipeline::new(ScriptedStore::gated()).await;
    let order = sample_order();
    pipeline.publish(&order).await;

    let consumer = pipeline.consumer();
    let worker = tokio::spawn(async move { consumer.run(CancellationToken::new()).await });
    assert!(wait_until(WAIT, || pipeline.store.attempt_count() == 1).await);
    assert_eq!(pipeline.broker.unacked_count("order"), 1);

    // Kill the worker without letting it settle the delivery.
    worker.abort();
    assert!(worker.await.unwrap_err().is_cancelled());

    let queued = pipeline.broker.peek("order");
    assert_eq!(queued.len(), 1);
    assert!(queued[0].redelivered);
    assert_eq!(queued[0].retry_count, 0);
    assert!(pipeline.store.saved().is_empty());

    pipeline.store.release(10);
    let handle = pipeline.consumer().start();
    assert!(wait_until(WAIT, || pipeline.store.saved().len() == 1).await);
    handle.stop().await.unwrap();

    assert_eq!(pipeline.store.saved(), vec![order]);
    assert_eq!(pipeline.queue_depth(), 0);
}

#[tokio::test]
async fn broker_loss_ends_run_with_connection_error() {
    let pipeline = TestPipeline::new(ScriptedStore::succeeding()).await;
    let mut handle = pipeline.consumer().start();
    tokio::time::sleep(Duration::from_millis(20)).await;

    pipeline.broker.close().await.unwrap();

    let result = tokio::time::timeout(WAIT, handle.wait())
        .await
        .expect("consumer should notice the closed broker");
    assert!(matches!(result, Err(QueueError::Connection(_))));
    assert!(handle.is_finished());
    // Stopping an already-exited consumer is harmless.
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn missing_queue_fails_start() {
    let pipeline = TestPipeline::new(ScriptedStore::succeeding()).await;
    let mut config = pipeline.consumer_config();
    config.queue = "nope".to_string();

    let mut handle = pipeline.consumer_with(config).start();
    let result = handle.wait().await;
    assert!(matches!(result, Err(QueueError::Broker(_))));
}
