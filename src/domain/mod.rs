//! Domain-level abstractions shared by the client and server layers.
//!
//! Nothing in here references a concrete broker or client library;
//! concrete implementations live under `src/transport/`.

mod transport;

pub use transport::{
    //
    Address,
    Envelope,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};
