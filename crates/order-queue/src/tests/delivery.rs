//! Success path: persisted orders are acknowledged exactly once.

use super::harness::{sample_order, ScriptedStore, StoreResponse, TestPipeline};
use crate::broker::Broker;
use crate::consumer::ProcessingOutcome;
use order_domain::Order;

#[tokio::test]
async fn persisted_order_is_acked_once() {
    let pipeline = TestPipeline::new(ScriptedStore::succeeding()).await;
    let order = sample_order();
    pipeline.publish(&order).await;

    let consumer = pipeline.consumer();
    let mut stream = pipeline.broker.consume("order", "t", 1).await.unwrap();
    let envelope = stream.next_delivery().await.unwrap().unwrap();
    let tag = envelope.delivery_tag;

    let outcome = consumer.handle(stream.as_mut(), envelope).await;
    assert_eq!(outcome, ProcessingOutcome::Persisted);

    assert_eq!(pipeline.queue_depth(), 0);
    assert_eq!(pipeline.dlq_depth(), 0);
    assert_eq!(pipeline.broker.unacked_count("order"), 0);
    // Already acked: a second ack is refused by the broker.
    assert!(stream.ack(tag).await.is_err());
}

#[tokio::test]
async fn payload_reaches_store_unchanged() {
    let pipeline = TestPipeline::new(ScriptedStore::succeeding()).await;
    let order = sample_order();
    pipeline.publish(&order).await;

    let consumer = pipeline.consumer();
    let mut stream = pipeline.broker.consume("order", "t", 1).await.unwrap();
    let envelope = stream.next_delivery().await.unwrap().unwrap();
    consumer.handle(stream.as_mut(), envelope).await;

    assert_eq!(pipeline.store.saved(), vec![order]);
}

#[tokio::test]
async fn duplicate_is_acked_as_success() {
    let pipeline = TestPipeline::new(ScriptedStore::succeeding()).await;
    pipeline.store.queue(&[StoreResponse::Duplicate]);
    pipeline.publish(&sample_order()).await;

    let consumer = pipeline.consumer();
    let mut stream = pipeline.broker.consume("order", "t", 1).await.unwrap();
    let envelope = stream.next_delivery().await.unwrap().unwrap();

    let outcome = consumer.handle(stream.as_mut(), envelope).await;
    assert_eq!(outcome, ProcessingOutcome::Duplicate);
    assert_eq!(pipeline.queue_depth(), 0);
    assert_eq!(pipeline.dlq_depth(), 0);
}

#[tokio::test]
async fn first_delivery_has_retry_count_zero() {
    let pipeline = TestPipeline::new(ScriptedStore::succeeding()).await;
    pipeline.publish(&Order::new("c1", 42.5)).await;

    let mut stream = pipeline.broker.consume("order", "t", 1).await.unwrap();
    let envelope = stream.next_delivery().await.unwrap().unwrap();
    assert_eq!(envelope.retry_count, 0);
    assert!(!envelope.redelivered);
}
