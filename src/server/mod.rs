// src/server/mod.rs
//! Service side of the RPC pattern.
//!
//! A [`Service`] consumes requests published under one service name and
//! answers each on the request's reply-to queue, echoing its correlation
//! id. Handler outcomes - success or failure - are normalized into a
//! [`Response`](crate::Response) by the response writer before
//! publication, so clients always receive a body plus a status.

mod handler;

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use handler::{wrap_handler, BoxedHandler};

use crate::response::{RespondOptions, ResponseWriter};
use crate::{Envelope, Result, Subscription, TransportPtr};

/// Serves a single named service over a transport.
///
/// # Example
///
/// ```no_run
/// use amqp_rpc::{create_transport, RpcConfig, Service};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Deserialize)]
/// struct SleepRequest {
///     duration: u64,
/// }
///
/// #[derive(Serialize)]
/// struct SleepReply {
///     slept: u64,
/// }
///
/// # async fn example() -> amqp_rpc::Result<()> {
/// let config = RpcConfig::with_broker("amqp://localhost:5672/%2f", "services");
/// let transport = create_transport(&config).await?;
///
/// let service = Service::new(transport, "lazy.sleep", |req: SleepRequest| async move {
///     tokio::time::sleep(std::time::Duration::from_secs(req.duration)).await;
///     Ok(SleepReply { slept: req.duration })
/// });
///
/// let handle = service.run().await?;
/// handle.await.expect("service task panicked")?;
/// # Ok(())
/// # }
/// ```
pub struct Service {
    // ---
    transport: TransportPtr,
    service_name: Arc<str>,
    handler: BoxedHandler,
}

impl Service {
    // ---
    /// Create a service from a typed async handler.
    ///
    /// The handler receives the request params deserialized into `Req`
    /// and returns the reply body. A returned error (including a params
    /// shape `Req` cannot absorb) becomes a status-500 response carrying
    /// the error message.
    pub fn new<F, Fut, Req, Resp>(
        transport: TransportPtr,
        service_name: impl Into<Arc<str>>,
        handler: F,
    ) -> Self
    where
        F: Fn(Req) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
    {
        // ---
        Self {
            transport,
            service_name: service_name.into(),
            handler: wrap_handler(handler),
        }
    }

    /// Subscribe to the service queue and start serving requests.
    ///
    /// The returned task runs until the transport is closed. Each request
    /// is handled in its own spawned task, so a slow handler does not
    /// hold up the queue.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the request subscription cannot be
    /// established.
    pub async fn run(&self) -> Result<JoinHandle<Result<()>>> {
        // ---
        let mut handle = self
            .transport
            .subscribe(Subscription::from(self.service_name.clone()))
            .await?;

        info!(service = %self.service_name, "serving requests");

        let transport = self.transport.clone();
        let service_name = self.service_name.clone();
        let handler = self.handler.clone();

        Ok(tokio::spawn(async move {
            // ---
            while let Some(env) = handle.inbox.recv().await {
                dispatch(&transport, &service_name, &handler, env);
            }

            debug!(service = %service_name, "request subscription closed");
            Ok(())
        }))
    }
}

/// Handle one request envelope, spawning the handler task.
fn dispatch(transport: &TransportPtr, service_name: &Arc<str>, handler: &BoxedHandler, env: Envelope) {
    // ---
    let Some(correlation_id) = env.correlation_id else {
        warn!(service = %service_name, "dropping request without correlation id");
        return;
    };
    let Some(reply_to) = env.reply_to else {
        warn!(
            service = %service_name,
            id = %correlation_id,
            "dropping request without reply-to"
        );
        return;
    };

    let transport = transport.clone();
    let service_name = service_name.clone();
    let handler = handler.clone();

    tokio::spawn(async move {
        // ---
        let outcome = match serde_json::from_slice::<Value>(&env.payload) {
            Ok(params) => handler(params).await,
            Err(err) => Err(err.into()),
        };

        let response = match outcome {
            Ok(body) => ResponseWriter::new().respond_with(body, RespondOptions::default()),
            Err(err) => {
                warn!(
                    service = %service_name,
                    id = %correlation_id,
                    "handler failed: {err}"
                );
                ResponseWriter::new().respond_with_error(err)
            }
        };

        let (body, headers) = response.into_parts();
        let payload = match serde_json::to_vec(&body) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                warn!(
                    service = %service_name,
                    id = %correlation_id,
                    "failed to encode reply: {err}"
                );
                return;
            }
        };

        let reply = Envelope::response(reply_to, payload, correlation_id, headers);
        if let Err(err) = transport.publish(reply).await {
            warn!(service = %service_name, "failed to publish reply: {err}");
        }
    });
}
