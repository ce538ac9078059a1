//! Retry ceiling and dead-lettering.

use super::harness::{sample_order, wait_until, ScriptedStore, TestPipeline};
use crate::broker::{Broker, OutgoingMessage};
use crate::consumer::ProcessingOutcome;
use std::time::Duration;

async fn publish_at(pipeline: &TestPipeline, retry_count: u32) -> Vec<u8> {
    let body = sample_order().encode().unwrap();
    pipeline
        .broker
        .publish(
            "",
            "order",
            OutgoingMessage::persistent(body.clone()).with_retry_count(retry_count),
        )
        .await
        .unwrap();
    body
}

#[tokio::test]
async fn failure_at_limit_dead_letters() {
    let pipeline = TestPipeline::new(ScriptedStore::failing()).await;
    let body = publish_at(&pipeline, 3).await;

    let consumer = pipeline.consumer();
    let mut stream = pipeline.broker.consume("order", "t", 1).await.unwrap();
    let envelope = stream.next_delivery().await.unwrap().unwrap();

    let outcome = consumer.handle(stream.as_mut(), envelope).await;
    assert_eq!(outcome, ProcessingOutcome::DeadLettered { retry_count: 3 });

    assert_eq!(pipeline.queue_depth(), 0);
    assert_eq!(pipeline.broker.unacked_count("order"), 0);
    let dead = pipeline.broker.peek("order_dlq");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].body, body);
    assert_eq!(dead[0].retry_count, 3);
}

#[tokio::test]
async fn failure_just_below_limit_still_retries() {
    let pipeline = TestPipeline::new(ScriptedStore::failing()).await;
    publish_at(&pipeline, 2).await;

    let consumer = pipeline.consumer();
    let mut stream = pipeline.broker.consume("order", "t", 1).await.unwrap();
    let envelope = stream.next_delivery().await.unwrap().unwrap();

    let outcome = consumer.handle(stream.as_mut(), envelope).await;
    assert_eq!(outcome, ProcessingOutcome::Requeued { retry_count: 3 });
    assert_eq!(pipeline.dlq_depth(), 0);
}

#[tokio::test]
async fn success_at_limit_is_persisted() {
    let pipeline = TestPipeline::new(ScriptedStore::succeeding()).await;
    publish_at(&pipeline, 3).await;

    let consumer = pipeline.consumer();
    let mut stream = pipeline.broker.consume("order", "t", 1).await.unwrap();
    let envelope = stream.next_delivery().await.unwrap().unwrap();

    let outcome = consumer.handle(stream.as_mut(), envelope).await;
    assert_eq!(outcome, ProcessingOutcome::Persisted);
    assert_eq!(pipeline.dlq_depth(), 0);
}

#[tokio::test]
async fn counter_beyond_limit_dead_letters() {
    let pipeline = TestPipeline::new(ScriptedStore::failing()).await;
    publish_at(&pipeline, 40).await;

    let consumer = pipeline.consumer();
    let mut stream = pipeline.broker.consume("order", "t", 1).await.unwrap();
    let envelope = stream.next_delivery().await.unwrap().unwrap();

    let outcome = consumer.handle(stream.as_mut(), envelope).await;
    assert_eq!(outcome, ProcessingOutcome::DeadLettered { retry_count: 40 });
}

#[tokio::test]
async fn zero_retry_limit_dead_letters_first_failure() {
    let pipeline = TestPipeline::new(ScriptedStore::failing()).await;
    pipeline.publish(&sample_order()).await;

    let mut config = pipeline.consumer_config();
    config.retry_limit = 0;
    let consumer = pipeline.consumer_with(config);

    let mut stream = pipeline.broker.consume("order", "t", 1).await.unwrap();
    let envelope = stream.next_delivery().await.unwrap().unwrap();

    let outcome = consumer.handle(stream.as_mut(), envelope).await;
    assert_eq!(outcome, ProcessingOutcome::DeadLettered { retry_count: 0 });
    assert_eq!(pipeline.dlq_depth(), 1);
}

#[tokio::test]
async fn dead_letter_queue_is_not_consumed() {
    let pipeline = TestPipeline::new(ScriptedStore::failing()).await;
    publish_at(&pipeline, 3).await;

    let handle = pipeline.consumer().start();
    let parked = wait_until(Duration::from_secs(2), || pipeline.dlq_depth() == 1).await;
    assert!(parked);
    handle.stop().await.unwrap();

    // Parked for an operator: still there, only one store attempt made.
    assert_eq!(pipeline.dlq_depth(), 1);
    assert_eq!(pipeline.store.attempt_count(), 1);
}
