//! RPC semantics over AMQP pub/sub with automatic request/response correlation
//!
//! This library provides a simple, ergonomic API for making blocking-style
//! service calls over a fire-and-forget message bus. It handles correlation
//! ID generation, request/response matching, timeout handling, and
//! concurrent in-flight calls.
//!
//! A [`ServiceClient`] publishes each request through a direct exchange
//! under the service name, tagged with a fresh correlation id and the
//! client's private reply-queue name, then waits for the matching reply.
//! No reply within the window yields a status-504 [`Response`] rather than
//! an error. A [`Service`] is the responder half: it consumes one service's
//! queue and answers each request on its reply-to queue.
//!

// Import all sub modules once...
mod client;
mod domain;
mod server;
mod transport;

mod rpc_config;

mod correlation;
mod error;
mod response;

// Re-export main types
pub use client::{CallOptions, CallTimeout, ServiceClient};
pub use server::Service;

pub use rpc_config::{RpcConfig, DEFAULT_CALL_TIMEOUT};

pub use correlation::CorrelationId;
pub use error::{Error, Result};
pub use response::{Headers, RespondOptions, Response, ResponseWriter};

pub use transport::create_memory_transport;

#[cfg(feature = "transport_amqp")]
pub use transport::create_amqp_transport;

// --- public re-exports
pub use domain::{
    //
    Address,
    Envelope,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};

/// Create a transport from the configuration: AMQP when a broker URI is
/// set, in-memory otherwise.
pub async fn create_transport(config: &RpcConfig) -> Result<TransportPtr> {
    // ---
    #[cfg(feature = "transport_amqp")]
    if config.amqp_uri.is_some() {
        return transport::create_amqp_transport(config).await;
    }

    #[cfg(not(feature = "transport_amqp"))]
    if config.amqp_uri.is_some() {
        return Err(Error::Transport(
            "broker URI set but the transport_amqp feature is disabled".to_string(),
        ));
    }

    transport::create_memory_transport(config).await
}
