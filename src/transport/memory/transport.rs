// src/transport/memory/transport.rs

//! In-memory transport implementation.
//!
//! This transport simulates a message broker entirely within the process
//! and is the **reference implementation** of transport semantics. Other
//! transports are expected to approximate this behavior as closely as
//! their underlying systems allow.
//!
//! ## Semantics
//!
//! - Subscriptions are registered immediately; once `subscribe()` returns,
//!   subsequent matching publishes are deliverable.
//! - A subscription matches an address by exact string equality.
//! - The reply queue is a generated, instance-private name; nothing
//!   enforces exclusivity beyond that name being unguessable.
//! - Dropping a `SubscriptionHandle` implicitly unregisters it.
//!
//! ## Non-Goals
//!
//! - Persistence or durability
//! - Network behavior or failure simulation
//! - Exact emulation of AMQP broker semantics

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::{
    // ---
    Address,
    Envelope,
    Result,
    RpcConfig,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};

struct MemoryTransport {
    // ---
    reply_queue: Address,
    subscriptions: RwLock<HashMap<Subscription, Vec<mpsc::Sender<Envelope>>>>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---

    fn reply_queue(&self) -> &Address {
        &self.reply_queue
    }

    /// Publish an envelope to all matching subscriptions.
    ///
    /// Requests and replies are routed identically here: whoever is
    /// subscribed under the envelope's address receives it.
    async fn publish(&self, env: Envelope) -> Result<()> {
        // ---
        let subs = self.subscriptions.read().await;

        for (sub, senders) in subs.iter() {
            if sub.0 == env.address.0 {
                for sender in senders {
                    // A closed channel just means a dropped handle.
                    let _ = sender.send(env.clone()).await;
                }
            }
        }

        Ok(())
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        let (tx, rx) = mpsc::channel(16);

        let mut subs = self.subscriptions.write().await;
        subs.entry(sub).or_default().push(tx);

        Ok(SubscriptionHandle { inbox: rx })
    }

    /// Close the transport.
    ///
    /// Clears all subscriptions, ending every inbox stream.
    async fn close(&self) -> Result<()> {
        // ---
        let mut subs = self.subscriptions.write().await;
        subs.clear();
        Ok(())
    }
}

/// Create a new in-memory transport.
///
/// Always available; requires no external resources. The reply queue name
/// is generated per instance, mirroring a broker's server-named exclusive
/// queue.
pub async fn create_transport(config: &RpcConfig) -> Result<TransportPtr> {
    // ---
    let reply_queue = Address::from(format!("reply.{}.{}", config.node_id, Uuid::new_v4()));

    Ok(Arc::new(MemoryTransport {
        // ---
        reply_queue,
        subscriptions: RwLock::new(HashMap::new()),
    }))
}
