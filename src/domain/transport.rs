// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the transport interface used by the client and
//! server layers to exchange messages. The transport layer is responsible
//! only for delivering opaque envelopes to subscribed consumers;
//! higher-level semantics such as RPC correlation and timeouts are
//! handled elsewhere.
//!
//! Delivery is fire-and-forget: non-persistent, non-mandatory, no
//! delivery confirmation. A lost message surfaces to the caller as a
//! timed-out call, never as a transport error.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::response::Headers;
use crate::Result;

/// A transport address.
///
/// An `Address` names a destination messages may be routed to: a service
/// name acting as a routing key, or a reply queue name. It is treated as
/// an opaque identifier at the domain level; addresses are immutable,
/// cheap to clone, and safe to share across tasks.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Address(value.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A subscription identifier.
///
/// A `Subscription` requests delivery of messages addressed to some
/// destination. How a subscription matches an address is defined by the
/// transport implementation; the in-memory transport provides the
/// reference semantics (exact string equality).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subscription(pub Arc<str>);

impl From<Address> for Subscription {
    fn from(address: Address) -> Self {
        // ---
        Subscription(address.0)
    }
}

impl<T> From<T> for Subscription
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Subscription(value.into())
    }
}

/// An opaque message envelope.
///
/// The unit of transport between producers and consumers: a payload plus
/// the metadata higher layers use for RPC correlation and reply routing.
/// The transport does not interpret the payload or headers.
#[derive(Clone, Debug)]
pub struct Envelope {
    // ---
    /// Routing key: a service name on requests, a queue name on replies.
    pub address: Address,

    /// Opaque payload bytes.
    ///
    /// The interpretation of the payload belongs to higher-level protocol
    /// logic; here it is serialized params on requests and a serialized
    /// reply body on responses.
    pub payload: Bytes,

    /// Correlation identifier pairing a request with its reply.
    pub correlation_id: Option<Arc<str>>,

    /// Queue the responder should publish its answer to.
    ///
    /// Present on request envelopes, absent on replies.
    pub reply_to: Option<Address>,

    /// Application headers carried alongside the payload.
    pub headers: Headers,
}

impl Envelope {
    // ---
    /// Create a request envelope.
    ///
    /// # Arguments
    ///
    /// * `address` - Service name used as the routing key
    /// * `payload` - Serialized request params
    /// * `correlation_id` - Unique identifier echoed back on the reply
    /// * `reply_to` - Queue the reply should be published to
    /// * `headers` - Application headers attached to the message
    pub fn request(
        address: Address,
        payload: Bytes,
        correlation_id: Arc<str>,
        reply_to: Address,
        headers: Headers,
    ) -> Self {
        // ---
        Self {
            address,
            payload,
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_to),
            headers,
        }
    }

    /// Create a reply envelope.
    ///
    /// # Arguments
    ///
    /// * `address` - Destination queue (the request's `reply_to`)
    /// * `payload` - Serialized reply body
    /// * `correlation_id` - Correlation ID from the original request
    /// * `headers` - Reply headers, including the `status` entry
    pub fn response(
        address: Address,
        payload: Bytes,
        correlation_id: Arc<str>,
        headers: Headers,
    ) -> Self {
        // ---
        Self {
            address,
            payload,
            correlation_id: Some(correlation_id),
            reply_to: None,
            headers,
        }
    }
}

/// Handle returned from a successful subscription.
///
/// The subscription remains active until the handle is dropped or the
/// transport is closed; either ends the inbox stream.
pub struct SubscriptionHandle {
    // ---
    /// Receiver channel for envelopes delivered to this subscription.
    pub inbox: mpsc::Receiver<Envelope>,
}

/// Transport abstraction.
///
/// A `Transport` provides best-effort delivery of message envelopes. It
/// owns a broker connection, the direct exchange requests are routed
/// through, and one exclusive reply queue private to this transport
/// instance.
///
/// Implementations must ensure that:
/// - Once `subscribe()` returns successfully, messages published *after*
///   that point and matching the subscription are deliverable.
/// - `publish()` is non-blocking with respect to subscribers.
/// - No ordering, durability, or retry guarantees exist beyond what is
///   explicitly documented.
///
/// The in-memory transport serves as the reference implementation of
/// these semantics.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Name of this transport's private reply queue.
    fn reply_queue(&self) -> &Address;

    /// Publish an envelope, fire-and-forget.
    async fn publish(&self, env: Envelope) -> Result<()>;

    /// Register a subscription and return a handle for receiving messages.
    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle>;

    /// Close the transport and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// An `Arc<dyn Transport>`: cheap to clone, with all clones sharing the
/// same underlying connection. Erases concrete transport types behind a
/// stable domain interface.
pub type TransportPtr = Arc<dyn Transport>;
