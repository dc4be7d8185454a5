use thiserror::Error;

/// Errors that can occur during RPC operations.
///
/// A timed-out call is deliberately *not* an error: it comes back as a
/// normal [`Response`](crate::Response) with status 504, so callers do not
/// need error handling for the common "service slow or down" case. Only
/// precondition violations and transport failures surface as `Err`.
#[derive(Error, Debug)]
pub enum Error {
    /// Call params did not serialize to a string-keyed JSON object.
    #[error("params must serialize to a JSON object")]
    InvalidParams,

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker or transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The reply channel closed before a response was delivered.
    #[error("reply channel closed before a response arrived")]
    ChannelClosed,
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, Error>;
