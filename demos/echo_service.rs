//! Serves an `echo.shout` service over a real AMQP broker.
//!
//! Usage:
//!   AMQP_URI=amqp://127.0.0.1:5672/%2f cargo run --example echo_service

use amqp_rpc::{create_transport, Result, RpcConfig, Service};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct EchoRequest {
    message: String,
}

#[derive(Debug, Serialize)]
struct EchoReply {
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let uri = std::env::var("AMQP_URI")
        .unwrap_or_else(|_| "amqp://127.0.0.1:5672/%2f".to_string());

    let config = RpcConfig::with_broker(uri, "services").with_node_id("echo-service");
    let transport = create_transport(&config).await?;

    let service = Service::new(transport, "echo.shout", |req: EchoRequest| async move {
        Ok(EchoReply {
            message: req.message.to_uppercase(),
        })
    });

    let handle = service.run().await?;
    println!("echo.shout is serving; ctrl-c to stop");

    handle.await.expect("service task panicked")?;
    Ok(())
}
