//! HTTP API: router, extractors, middleware and error mapping.

pub mod app;
pub mod context;
pub mod middleware;
