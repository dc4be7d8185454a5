use std::sync::Once;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use amqp_rpc::{
    //
    create_transport,
    CallOptions,
    CallTimeout,
    Envelope,
    Error,
    Headers,
    Result,
    RpcConfig,
    Service,
    ServiceClient,
    Subscription,
    TransportPtr,
};

fn init_logging() {
    // ---
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

async fn memory_transport(node_id: &str) -> TransportPtr {
    // ---
    let config = RpcConfig::memory("services").with_node_id(node_id);
    create_transport(&config).await.expect("memory transport")
}

fn client_config(node_id: &str) -> RpcConfig {
    RpcConfig::memory("services").with_node_id(node_id)
}

/// Echo responder wired straight to the transport: replies with the
/// request's own payload plus the given headers. Lets tests exercise the
/// client core against the raw transport boundary, including
/// responder-set headers the typed `Service` API does not expose.
///
/// The subscription is registered before this returns, so requests
/// published afterwards cannot be lost.
async fn spawn_echo_responder(
    transport: TransportPtr,
    service_name: &'static str,
    headers: Headers,
) -> JoinHandle<()> {
    // ---
    let mut sub = transport
        .subscribe(Subscription::from(service_name))
        .await
        .expect("responder subscribe failed");

    tokio::spawn(async move {
        while let Some(env) = sub.inbox.recv().await {
            let (Some(id), Some(reply_to)) = (env.correlation_id.clone(), env.reply_to.clone())
            else {
                continue;
            };

            let reply = Envelope::response(reply_to, env.payload.clone(), id, headers.clone());
            transport.publish(reply).await.expect("responder publish failed");
        }
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct AddRequest {
    a: i32,
    b: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct AddResponse {
    sum: i32,
}

#[tokio::test]
async fn test_reply_delivered_with_headers_and_default_status() -> Result<()> {
    // ---
    init_logging();

    let transport = memory_transport("echo").await;

    let mut headers = Headers::new();
    headers.insert("trace".to_string(), json!("x"));
    let _responder = spawn_echo_responder(transport.clone(), "echo", headers).await;

    let client = ServiceClient::with_transport(transport, client_config("echo")).await?;

    let response = client.call("echo", &json!({ "ok": true })).await?;

    assert_eq!(response.status(), 200);
    assert_eq!(response.body()["ok"], json!(true));
    assert_eq!(response.headers()["trace"], json!("x"));
    assert_eq!(client.in_flight(), 0);

    Ok(())
}

#[tokio::test]
async fn test_timeout_synthesizes_504() -> Result<()> {
    // ---
    init_logging();

    // No responder anywhere on this transport.
    let transport = memory_transport("timeouts").await;
    let client = ServiceClient::with_transport(transport, client_config("timeouts")).await?;

    let options = CallOptions {
        timeout: CallTimeout::After(Duration::from_millis(100)),
        ..CallOptions::default()
    };
    let response = client
        .call_with("lazy.sleep", &json!({ "duration": 5 }), options)
        .await?;

    assert_eq!(response.status(), 504);
    assert_eq!(
        response.body()["error_message"],
        json!("Call to lazy.sleep timed out")
    );

    // The pending slot is cleared on the timeout path too.
    assert_eq!(client.in_flight(), 0);

    Ok(())
}

#[tokio::test]
async fn test_invalid_params_rejected_before_publish() -> Result<()> {
    // ---
    init_logging();

    let transport = memory_transport("invalid").await;

    // Spy on the service queue to prove nothing is published.
    let mut spy = transport.subscribe(Subscription::from("strict")).await?;

    let client = ServiceClient::with_transport(transport, client_config("invalid")).await?;

    let err = client
        .call("strict", &json!(["not", "a", "map"]))
        .await
        .expect_err("array params must be rejected");
    assert!(matches!(err, Error::InvalidParams));

    let err = client.call("strict", &42).await.expect_err("scalar params");
    assert!(matches!(err, Error::InvalidParams));

    assert!(spy.inbox.try_recv().is_err(), "no message may be published");
    assert_eq!(client.in_flight(), 0);

    Ok(())
}

#[tokio::test]
async fn test_stray_reply_is_dropped() -> Result<()> {
    // ---
    init_logging();

    let transport = memory_transport("strays").await;
    let client =
        ServiceClient::with_transport(transport.clone(), client_config("strays")).await?;

    // A reply for a correlation id nobody is waiting on.
    let stray = Envelope::response(
        transport.reply_queue().clone(),
        serde_json::to_vec(&json!({ "stolen": true }))?.into(),
        "no-such-correlation-id".into(),
        Headers::new(),
    );
    transport.publish(stray).await?;

    // The stray must not leak into a later call's result.
    let _responder = spawn_echo_responder(transport.clone(), "echo", Headers::new()).await;
    let response = client.call("echo", &json!({ "mine": 1 })).await?;

    assert_eq!(response.status(), 200);
    assert_eq!(response.body()["mine"], json!(1));
    assert!(response.body().get("stolen").is_none());
    assert_eq!(client.in_flight(), 0);

    Ok(())
}

#[tokio::test]
async fn test_client_reusable_after_timeout() -> Result<()> {
    // ---
    init_logging();

    let transport = memory_transport("reuse").await;
    let client = ServiceClient::with_transport(transport.clone(), client_config("reuse")).await?;

    let options = CallOptions {
        timeout: CallTimeout::After(Duration::from_millis(50)),
        ..CallOptions::default()
    };
    let timed_out = client
        .call_with("math.add", &json!({ "a": 1, "b": 2 }), options)
        .await?;
    assert_eq!(timed_out.status(), 504);
    assert_eq!(client.in_flight(), 0);

    // Same client, same service, now with a responder present.
    let service = Service::new(transport, "math.add", |req: AddRequest| async move {
        Ok(AddResponse { sum: req.a + req.b })
    });
    let _handle = service.run().await?;

    let response = client.call("math.add", &json!({ "a": 1, "b": 2 })).await?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.body()["sum"], json!(3));

    Ok(())
}

#[tokio::test]
async fn test_each_call_publishes_one_message_with_fresh_id() -> Result<()> {
    // ---
    init_logging();

    let transport = memory_transport("unique").await;

    let mut spy = transport.subscribe(Subscription::from("void")).await?;

    let client = ServiceClient::with_transport(transport, client_config("unique")).await?;

    let calls = 5;
    for _ in 0..calls {
        let options = CallOptions {
            timeout: CallTimeout::After(Duration::from_millis(10)),
            ..CallOptions::default()
        };
        let response = client.call_with("void", &json!({}), options).await?;
        assert_eq!(response.status(), 504);
    }

    let mut seen = Vec::new();
    for _ in 0..calls {
        let env = spy.inbox.recv().await.expect("published request");
        let id = env.correlation_id.expect("request carries a correlation id");
        assert!(!seen.contains(&id), "correlation id reused: {id}");
        seen.push(id);
    }
    assert!(spy.inbox.try_recv().is_err(), "exactly one publish per call");

    Ok(())
}

#[tokio::test]
async fn test_request_carries_headers_and_reply_to() -> Result<()> {
    // ---
    init_logging();

    let transport = memory_transport("metadata").await;

    let mut spy = transport.subscribe(Subscription::from("audit")).await?;

    let client =
        ServiceClient::with_transport(transport.clone(), client_config("metadata")).await?;

    let mut headers = Headers::new();
    headers.insert("tenant".to_string(), json!("acme"));
    let options = CallOptions {
        timeout: CallTimeout::After(Duration::from_millis(10)),
        headers,
    };
    let _ = client.call_with("audit", &json!({ "op": "read" }), options).await?;

    let env = spy.inbox.recv().await.expect("published request");
    assert_eq!(env.headers["tenant"], json!("acme"));
    assert_eq!(env.reply_to.as_ref(), Some(transport.reply_queue()));

    let params: Value = serde_json::from_slice(&env.payload)?;
    assert_eq!(params, json!({ "op": "read" }));

    Ok(())
}

#[tokio::test]
async fn test_concurrent_calls_each_get_their_own_reply() {
    // ---
    init_logging();

    let transport = memory_transport("concurrent").await;

    let service = Service::new(
        transport.clone(),
        "math.add",
        |req: AddRequest| async move {
            Ok(AddResponse { sum: req.a + req.b })
        },
    );
    let _handle = service.run().await.unwrap();

    let client = ServiceClient::with_transport(transport, client_config("concurrent"))
        .await
        .unwrap();

    let mut handles = Vec::new();

    for i in 0..10 {
        // ---
        let c = client.clone();

        handles.push(tokio::spawn(async move {
            let response = c
                .call("math.add", &AddRequest { a: i, b: i })
                .await
                .unwrap();
            assert_eq!(response.status(), 200);
            response.body()["sum"].as_i64().unwrap()
        }));
    }

    for (i, task) in handles.into_iter().enumerate() {
        let sum = task.await.unwrap();
        assert_eq!(sum, (i as i64) * 2);
    }

    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_handler_error_becomes_500_response() -> Result<()> {
    // ---
    init_logging();

    let transport = memory_transport("failing").await;

    let service = Service::new(transport.clone(), "broken", |_req: Value| async move {
        Err::<Value, _>(Error::Transport("downstream unavailable".to_string()))
    });
    let _handle = service.run().await?;

    let client = ServiceClient::with_transport(transport, client_config("failing")).await?;

    let response = client.call("broken", &json!({})).await?;

    assert_eq!(response.status(), 500);
    let message = response.body()["error_message"]
        .as_str()
        .expect("error body");
    assert!(message.contains("downstream unavailable"));

    Ok(())
}

#[tokio::test]
async fn test_unbounded_wait_completes_on_late_reply() -> Result<()> {
    // ---
    init_logging();

    let transport = memory_transport("patient").await;

    let service = Service::new(
        transport.clone(),
        "slow.echo",
        |req: Value| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(req)
        },
    );
    let _handle = service.run().await?;

    let client = ServiceClient::with_transport(transport, client_config("patient")).await?;

    let options = CallOptions {
        timeout: CallTimeout::Unbounded,
        ..CallOptions::default()
    };
    let response = client
        .call_with("slow.echo", &json!({ "patience": true }), options)
        .await?;

    assert_eq!(response.status(), 200);
    assert_eq!(response.body()["patience"], json!(true));

    Ok(())
}

#[tokio::test]
async fn test_close_tears_down_transport() -> Result<()> {
    // ---
    init_logging();

    let transport = memory_transport("teardown").await;
    let client = ServiceClient::with_transport(transport, client_config("teardown")).await?;

    client.close().await?;

    // After teardown the reply subscription is gone; a bounded call can
    // only time out.
    let options = CallOptions {
        timeout: CallTimeout::After(Duration::from_millis(50)),
        ..CallOptions::default()
    };
    let response = client.call_with("anyone", &json!({}), options).await?;
    assert_eq!(response.status(), 504);

    Ok(())
}
