//! HTTP query surface: read-only JSON endpoints backed by the query engine.
//! Errors are answered as `{"error": "..."}` with a 4xx/5xx status.

mod http;

pub use http::ApiServer;
