//! In-memory transport.

mod transport;

pub use transport::create_transport;
