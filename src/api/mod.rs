//! HTTP API Module
//!
//! Local REST API for the UI layer.

mod http;

pub use http::{AppState, HttpServer, SyncResponse};
