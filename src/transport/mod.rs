//! Transport implementations.
//!
//! Concrete implementations of the domain-level `Transport` trait. The
//! broker-backed transport is hidden behind a feature flag; the in-memory
//! transport is always available. Both are exposed only through
//! constructor functions - domain code must not depend on
//! transport-specific types.

#[cfg(feature = "transport_amqp")]
mod amqp;

mod memory;

#[cfg(feature = "transport_amqp")]
pub use amqp::create_transport as create_amqp_transport;

pub use memory::create_transport as create_memory_transport;
