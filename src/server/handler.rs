use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::Result;

/// Type-erased async service handler.
///
/// Takes the request's deserialized params and returns the reply body.
/// Wrapped in `Arc` for cheap cloning into per-request tasks.
pub(super) type BoxedHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// Wrap a typed handler function into a type-erased handler.
///
/// Deserialization of the params and serialization of the reply happen
/// here, so the service loop deals only in JSON values; a params shape
/// the handler cannot accept surfaces as a handler failure.
pub(super) fn wrap_handler<F, Fut, Req, Resp>(handler: F) -> BoxedHandler
where
    F: Fn(Req) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
{
    // ---
    Arc::new(move |params: Value| {
        let handler = handler.clone();
        let fut = Box::pin(async move {
            // ---
            let request: Req = serde_json::from_value(params)?;

            let reply = handler(request).await?;

            Ok(serde_json::to_value(reply)?)
        });

        fut as Pin<Box<dyn Future<Output = Result<Value>> + Send>>
    })
}
