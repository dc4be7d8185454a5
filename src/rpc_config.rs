//! Public, transport-agnostic RPC configuration.
//!
//! This type intentionally contains no broker-specific concepts beyond
//! the connection URI and exchange name. Transport layers are responsible
//! for interpreting it into concrete connection settings.

use std::time::Duration;

/// Default time a call waits for its reply before synthesizing a 504.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Transport configuration and connection parameters.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    // ---
    /// Broker connection URI (e.g. `"amqp://localhost:5672/%2f"`).
    ///
    /// `None` selects the in-memory transport, used for tests and for
    /// validating higher-level behavior without a broker.
    pub amqp_uri: Option<String>,

    /// Name of the direct exchange service requests are routed through.
    pub exchange_name: String,

    /// Identifier for this node, used in logs and consumer tags.
    pub node_id: String,

    /// Default time a `call()` waits for its reply.
    ///
    /// Overridable per call via `CallOptions`. A call that outlives this
    /// window returns a status-504 response, not an error.
    pub call_timeout: Duration,
}

impl RpcConfig {
    /// Create a config for a broker-backed transport.
    pub fn with_broker(amqp_uri: impl Into<String>, exchange_name: impl Into<String>) -> Self {
        Self {
            amqp_uri: Some(amqp_uri.into()),
            exchange_name: exchange_name.into(),
            node_id: "node".to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Create an in-memory transport config (no broker).
    pub fn memory(exchange_name: impl Into<String>) -> Self {
        Self {
            amqp_uri: None,
            exchange_name: exchange_name.into(),
            node_id: "node".to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Set the node identifier used in logs and consumer tags.
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Set the default reply timeout applied by `call()`.
    ///
    /// # Example
    ///
    /// ```
    /// use amqp_rpc::RpcConfig;
    /// use std::time::Duration;
    ///
    /// let config = RpcConfig::with_broker("amqp://localhost:5672/%2f", "services")
    ///     .with_call_timeout(Duration::from_secs(10));
    /// ```
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}
