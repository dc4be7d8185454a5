//! AMQP transport.

mod lapin;

pub use lapin::create_transport;
