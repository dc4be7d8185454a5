//! Service reply values and the builder that normalizes outcomes into them.

use std::fmt;

use serde_json::{json, Map, Value};

/// String-keyed message headers.
pub type Headers = Map<String, Value>;

/// Header entry carrying the response status code.
const STATUS_HEADER: &str = "status";

/// Status recorded when the builder is given no explicit one.
const DEFAULT_STATUS: u16 = 200;

/// Status recorded for failure outcomes without an explicit override.
const ERROR_STATUS: u16 = 500;

/// A service reply: body plus headers, immutable once built.
///
/// The status code rides in the `status` header entry; [`Response::status`]
/// reads it back, defaulting to 200 when the entry is absent. There is no
/// "absent response" at the public boundary - a call that times out yields
/// a status-504 `Response` instead of an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    body: Value,
    headers: Headers,
}

impl Response {
    /// Assemble a response from a reply's deserialized payload and headers.
    pub fn new(body: Value, headers: Headers) -> Self {
        Self { body, headers }
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Status code from the `status` header entry, 200 when unset.
    pub fn status(&self) -> u16 {
        self.headers
            .get(STATUS_HEADER)
            .and_then(Value::as_u64)
            .map_or(DEFAULT_STATUS, |status| status as u16)
    }

    /// Split the response into its body and headers for publication.
    pub fn into_parts(self) -> (Value, Headers) {
        (self.body, self.headers)
    }
}

/// Options for [`ResponseWriter::respond_with`].
#[derive(Debug, Clone, Default)]
pub struct RespondOptions {
    /// Status code to record; 200 when `None`.
    pub status: Option<u16>,
    /// Headers merged into the response; these win on key conflicts.
    pub headers: Headers,
}

impl RespondOptions {
    /// Options carrying only a status code.
    pub fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Builder turning an outcome into a well-formed [`Response`].
///
/// Every synthesized response in the crate passes through here: the
/// client's timeout path, the service loop, and handler failures. Whether
/// an outcome is a success or a failure is decided by the caller through
/// the entry point used, never inferred from the value itself.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    headers: Headers,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-set a header for every response built by this writer.
    ///
    /// Headers supplied later through [`RespondOptions`] take precedence.
    pub fn header(mut self, key: impl Into<String>, value: Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// Build a success response from a reply body.
    pub fn respond_with(self, body: Value, options: RespondOptions) -> Response {
        // ---
        let mut headers = self.headers;
        for (key, value) in options.headers {
            headers.insert(key, value);
        }
        let status = options.status.unwrap_or(DEFAULT_STATUS);
        headers.insert(STATUS_HEADER.to_string(), status.into());

        Response { body, headers }
    }

    /// Build a failure response with the default 500 status.
    pub fn respond_with_error(self, error: impl fmt::Display) -> Response {
        // ---
        self.respond_with_error_status(error, ERROR_STATUS)
    }

    /// Build a failure response with an explicit status code.
    pub fn respond_with_error_status(self, error: impl fmt::Display, status: u16) -> Response {
        // ---
        let body = json!({ "error_message": error.to_string() });
        self.respond_with(body, RespondOptions::status(status))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_error_defaults_to_500() {
        // ---
        let response = ResponseWriter::new().respond_with_error("boom");
        assert_eq!(response.status(), 500);
        assert_eq!(response.body()["error_message"], "boom");
    }

    #[test]
    fn test_error_status_override() {
        // ---
        let response = ResponseWriter::new().respond_with_error_status("gone away", 504);
        assert_eq!(response.status(), 504);
        assert_eq!(response.body()["error_message"], "gone away");
    }

    #[test]
    fn test_respond_with_status_and_headers() {
        // ---
        let mut headers = Headers::new();
        headers.insert("a".to_string(), json!(1));

        let response = ResponseWriter::new().respond_with(
            json!({ "ok": true }),
            RespondOptions {
                status: Some(201),
                headers,
            },
        );

        assert_eq!(response.status(), 201);
        assert_eq!(response.headers()["a"], json!(1));
        assert_eq!(response.body()["ok"], json!(true));
    }

    #[test]
    fn test_status_defaults_to_200() {
        // ---
        let built = ResponseWriter::new().respond_with(json!({}), RespondOptions::default());
        assert_eq!(built.status(), 200);

        // A response assembled straight from the wire may carry no status
        // header at all.
        let bare = Response::new(json!({}), Headers::new());
        assert_eq!(bare.status(), 200);
    }

    #[test]
    fn test_option_headers_win_over_writer_headers() {
        // ---
        let mut headers = Headers::new();
        headers.insert("trace".to_string(), json!("override"));

        let response = ResponseWriter::new()
            .header("trace", json!("preset"))
            .header("node", json!("a"))
            .respond_with(
                json!({}),
                RespondOptions {
                    status: None,
                    headers,
                },
            );

        assert_eq!(response.headers()["trace"], json!("override"));
        assert_eq!(response.headers()["node"], json!("a"));
    }
}
