//! Calls the `echo.shout` service over a real AMQP broker.
//!
//! Usage (with echo_service running):
//!   AMQP_URI=amqp://127.0.0.1:5672/%2f cargo run --example echo_client -- "hello there"

use amqp_rpc::{Result, RpcConfig, ServiceClient};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let uri = std::env::var("AMQP_URI")
        .unwrap_or_else(|_| "amqp://127.0.0.1:5672/%2f".to_string());

    let message = std::env::args().nth(1).unwrap_or_else(|| "hello".to_string());

    let config = RpcConfig::with_broker(uri, "services").with_node_id("echo-client");
    let client = ServiceClient::connect(config).await?;

    let response = client.call("echo.shout", &json!({ "message": message })).await?;
    println!("status {}: {}", response.status(), response.body());

    client.close().await?;
    Ok(())
}
