// tests/transport_memory.rs

use bytes::Bytes;
use serde_json::json;
use tokio::time::{timeout, Duration};

use amqp_rpc::{
    // ---
    Address,
    CorrelationId,
    Envelope,
    Headers,
    RpcConfig,
};

#[tokio::test]
async fn memory_subscribe_then_publish_delivers() {
    // ---
    // Arrange
    // ---
    let config = RpcConfig::memory("services").with_node_id("mstpd");

    let transport = amqp_rpc::create_memory_transport(&config)
        .await
        .expect("failed to create memory transport");

    let address = Address::from("test.service");

    let mut sub = transport
        .subscribe(address.clone().into())
        .await
        .expect("subscribe failed");

    let payload = Bytes::from_static(b"{}");
    let correlation_id = CorrelationId::generate();

    let env = Envelope::request(
        address.clone(),
        payload.clone(),
        correlation_id.as_str().into(),
        transport.reply_queue().clone(),
        Headers::new(),
    );

    // ---
    // Act
    // ---
    transport.publish(env).await.expect("publish failed");

    // ---
    // Assert
    // ---
    let received = timeout(Duration::from_millis(100), sub.inbox.recv())
        .await
        .expect("timed out waiting for message")
        .expect("subscription channel closed unexpectedly");

    assert_eq!(received.payload, payload);
    assert_eq!(received.address, address);
    assert_eq!(received.correlation_id.as_deref(), Some(correlation_id.as_str()));
    assert_eq!(received.reply_to.as_ref(), Some(transport.reply_queue()));
}

#[tokio::test]
async fn memory_publish_without_subscriber_is_dropped() {
    // ---
    let config = RpcConfig::memory("services").with_node_id("mpwsd");

    let transport = amqp_rpc::create_memory_transport(&config)
        .await
        .expect("failed to create memory transport");

    let env = Envelope::response(
        Address::from("nobody.home"),
        Bytes::from_static(b"{}"),
        CorrelationId::generate().as_str().into(),
        Headers::new(),
    );

    // Fire-and-forget: no subscriber is not an error.
    transport.publish(env).await.expect("publish failed");
}

#[tokio::test]
async fn memory_close_ends_subscriptions() {
    // ---
    let config = RpcConfig::memory("services").with_node_id("mces");

    let transport = amqp_rpc::create_memory_transport(&config)
        .await
        .expect("failed to create memory transport");

    let mut sub = transport
        .subscribe(Address::from("short.lived").into())
        .await
        .expect("subscribe failed");

    transport.close().await.expect("close failed");

    let next = timeout(Duration::from_millis(100), sub.inbox.recv())
        .await
        .expect("inbox should close promptly");
    assert!(next.is_none(), "closed transport must end the inbox stream");
}

#[tokio::test]
async fn memory_reply_queues_are_instance_private() {
    // ---
    let config = RpcConfig::memory("services").with_node_id("same-node");

    let a = amqp_rpc::create_memory_transport(&config)
        .await
        .expect("transport a");
    let b = amqp_rpc::create_memory_transport(&config)
        .await
        .expect("transport b");

    assert_ne!(a.reply_queue(), b.reply_queue());
}

#[tokio::test]
async fn memory_round_trips_json_headers() {
    // ---
    let config = RpcConfig::memory("services").with_node_id("mrjh");

    let transport = amqp_rpc::create_memory_transport(&config)
        .await
        .expect("failed to create memory transport");

    let address = Address::from("headers.test");
    let mut sub = transport
        .subscribe(address.clone().into())
        .await
        .expect("subscribe failed");

    let mut headers = Headers::new();
    headers.insert("status".to_string(), json!(201));
    headers.insert("trace".to_string(), json!("abc"));

    let env = Envelope::response(
        address,
        Bytes::from_static(b"{}"),
        CorrelationId::generate().as_str().into(),
        headers.clone(),
    );
    transport.publish(env).await.expect("publish failed");

    let received = timeout(Duration::from_millis(100), sub.inbox.recv())
        .await
        .expect("timed out waiting for message")
        .expect("subscription channel closed unexpectedly");

    assert_eq!(received.headers, headers);
}
