//! HTTP surface for a window cache.
//!
//! - [`http_api`]: routes for `next`, health and Prometheus metrics

pub mod http_api;
