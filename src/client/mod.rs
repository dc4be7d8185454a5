// src/client/mod.rs
//! RPC correlation client.
//!
//! This module contains the [`ServiceClient`] type which publishes service
//! requests over a transport and pairs them with the replies that arrive
//! on the client's private reply queue.
//!
//! # Architecture
//!
//! The client subscribes to its transport's exclusive reply queue once, at
//! construction, and runs a background receive task to match incoming
//! replies against in-flight calls by correlation ID.
//!
//! Each call generates a fresh correlation ID and registers a oneshot
//! channel in the pending map *before* publishing, so a reply racing ahead
//! of publish-completion can never be missed. When a matching reply
//! arrives, the receive task builds a [`Response`] from its payload and
//! headers and hands it to the waiting call; a reply nobody is waiting for
//! is logged and dropped.
//!
//! # Concurrency
//!
//! Multiple calls can be in flight simultaneously, each keyed by its own
//! correlation ID. The pending map is protected by a mutex but contention
//! is minimal since operations are just HashMap insert/remove.
//!
//! # Timeouts
//!
//! A call that receives no reply within its window does not fail: it
//! returns a status-504 [`Response`] naming the service, and the stale
//! slot is cleared so a late reply is discarded by the identity check.

mod pending;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use pending::PendingCalls;

use crate::response::{Headers, RespondOptions, Response, ResponseWriter};
use crate::{
    // ---
    Address,
    CorrelationId,
    Envelope,
    Error,
    Result,
    RpcConfig,
    Subscription,
    TransportPtr,
};

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// The protected state is the pending-call map (correlation id → oneshot
/// sender); there are no invariants spanning multiple fields, and the
/// worst outcome of a poisoned lock is a dropped or unmatched reply,
/// which the timeout path already handles.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// How long a call waits for its reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallTimeout {
    /// Use the client's configured default.
    #[default]
    Default,
    /// Wait indefinitely; the call blocks until a reply arrives.
    Unbounded,
    /// Wait at most this long.
    After(Duration),
}

/// Per-call options for [`ServiceClient::call_with`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    // ---
    pub timeout: CallTimeout,
    /// Headers attached to the outgoing request message.
    pub headers: Headers,
}

/// RPC client pairing published requests with replies on a private queue.
///
/// Cheap to clone (internally `Arc`-backed).
///
/// # Example
///
/// ```no_run
/// use amqp_rpc::{RpcConfig, ServiceClient};
/// use serde_json::json;
///
/// # async fn example() -> amqp_rpc::Result<()> {
/// let config = RpcConfig::with_broker("amqp://localhost:5672/%2f", "services");
/// let client = ServiceClient::connect(config).await?;
///
/// let response = client.call("lazy.sleep", &json!({ "duration": 5 })).await?;
/// println!("status {}: {}", response.status(), response.body());
///
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<Inner>,
}

struct Inner {
    // ---
    transport: TransportPtr,
    config: RpcConfig,
    pending: Mutex<PendingCalls>,

    /// Receive-task handle, kept so the task is not silently detached.
    _rx_task: JoinHandle<()>,
}

impl ServiceClient {
    // ---
    /// Create a client over an explicitly provided transport.
    ///
    /// The reply subscription is established here, exactly once; every
    /// call reuses it for the client's lifetime.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the reply-queue subscription cannot
    /// be established.
    pub async fn with_transport(transport: TransportPtr, config: RpcConfig) -> Result<Self> {
        // ---
        let reply_queue = transport.reply_queue().clone();
        let mut handle = transport
            .subscribe(Subscription::from(reply_queue.clone()))
            .await?;

        info!(queue = %reply_queue, "subscribed to exclusive reply queue");

        let inner = Arc::new_cyclic(|weak| {
            // ---
            let weak = weak.clone();
            let queue = reply_queue;

            // Receive task: the delivery side of the rendezvous. It never
            // blocks on callers; it hands a reply over and moves on.
            let rx_task = tokio::spawn(async move {
                // ---
                while let Some(env) = handle.inbox.recv().await {
                    let Some(inner) = weak.upgrade() else {
                        // Client dropped, stop draining
                        break;
                    };
                    let client = ServiceClient { inner };
                    client.handle_reply(env, &queue);
                }
                debug!(queue = %queue, "reply subscription closed");
            });

            Inner {
                // ---
                transport,
                config,
                pending: Mutex::new(PendingCalls::new()),
                _rx_task: rx_task,
            }
        });

        Ok(Self { inner })
    }

    /// Connect a client using the transport selected by the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if transport creation or the reply
    /// subscription fails.
    pub async fn connect(config: RpcConfig) -> Result<Self> {
        // ---
        let transport = crate::create_transport(&config).await?;
        Self::with_transport(transport, config).await
    }

    /// Call a service with the default timeout and no extra headers.
    ///
    /// See [`call_with`](Self::call_with).
    pub async fn call<P>(&self, service_name: &str, params: &P) -> Result<Response>
    where
        P: Serialize + ?Sized,
    {
        // ---
        self.call_with(service_name, params, CallOptions::default())
            .await
    }

    /// Call a service and wait for its reply.
    ///
    /// Publishes one request tagged with a fresh correlation id and this
    /// client's reply-queue name, then blocks until the matching reply
    /// arrives or the timeout elapses.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidParams` - `params` did not serialize to a JSON
    ///   object; nothing is published
    /// - `Error::Serialization` - params could not be serialized at all
    /// - `Error::Transport` - the publish failed; the call is aborted
    ///   without retry
    ///
    /// A timeout is *not* an error: the call returns a status-504
    /// [`Response`] whose body names the service.
    pub async fn call_with<P>(
        &self,
        service_name: &str,
        params: &P,
        options: CallOptions,
    ) -> Result<Response>
    where
        P: Serialize + ?Sized,
    {
        // ---
        let params = serde_json::to_value(params)?;
        if !params.is_object() {
            return Err(Error::InvalidParams);
        }
        let payload = Bytes::from(serde_json::to_vec(&params)?);

        let correlation_id = CorrelationId::generate();

        // Register before publishing: the id must be visible to the
        // receive task before the message can leave the transport, or a
        // pathologically fast reply could go unmatched.
        let rx = lock_ignore_poison(&self.inner.pending).register(correlation_id.clone());

        debug!(id = %correlation_id, service = service_name, "calling service");

        let env = Envelope::request(
            Address::from(service_name),
            payload,
            Arc::from(correlation_id.as_str()),
            self.inner.transport.reply_queue().clone(),
            options.headers,
        );

        if let Err(err) = self.inner.transport.publish(env).await {
            lock_ignore_poison(&self.inner.pending).abandon(&correlation_id);
            return Err(err);
        }

        let timeout = match options.timeout {
            CallTimeout::Default => Some(self.inner.config.call_timeout),
            CallTimeout::Unbounded => None,
            CallTimeout::After(duration) => Some(duration),
        };

        let response = match timeout {
            Some(duration) => match time::timeout(duration, rx).await {
                Ok(Ok(response)) => response,
                Ok(Err(_)) => {
                    lock_ignore_poison(&self.inner.pending).abandon(&correlation_id);
                    return Err(Error::ChannelClosed);
                }
                Err(_elapsed) => {
                    // No reply in time. Clear the slot so a late reply is
                    // discarded by the identity check, then surface the
                    // timeout as a well-formed response.
                    lock_ignore_poison(&self.inner.pending).abandon(&correlation_id);
                    ResponseWriter::new().respond_with(
                        json!({ "error_message": format!("Call to {service_name} timed out") }),
                        RespondOptions::status(504),
                    )
                }
            },
            None => match rx.await {
                Ok(response) => response,
                Err(_) => {
                    lock_ignore_poison(&self.inner.pending).abandon(&correlation_id);
                    return Err(Error::ChannelClosed);
                }
            },
        };

        debug!(id = %correlation_id, status = response.status(), "call completed");
        Ok(response)
    }

    /// Number of calls currently awaiting replies.
    pub fn in_flight(&self) -> usize {
        // ---
        lock_ignore_poison(&self.inner.pending).len()
    }

    /// Tear the client down, closing the underlying transport.
    ///
    /// Not designed to run concurrently with an in-flight call; any call
    /// still waiting will end with `Error::ChannelClosed` or a timeout.
    pub async fn close(&self) -> Result<()> {
        // ---
        info!("tearing down");
        self.inner.transport.close().await
    }

    /// Receive-task hook: match one inbound reply against the pending map.
    fn handle_reply(&self, env: Envelope, queue: &Address) {
        // ---
        let Some(id) = env.correlation_id.as_deref() else {
            debug!(queue = %queue, "dropping reply without correlation id");
            return;
        };
        let correlation_id = CorrelationId::from(id);

        let body: Value = match serde_json::from_slice(&env.payload) {
            Ok(body) => body,
            Err(err) => {
                warn!(id, queue = %queue, "dropping undecodable reply payload: {err}");
                return;
            }
        };
        let response = Response::new(body, env.headers);

        if !lock_ignore_poison(&self.inner.pending).complete(&correlation_id, response) {
            debug!(
                id,
                queue = %queue,
                "received reply for a request that already timed out"
            );
        }
    }
}
