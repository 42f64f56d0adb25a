//! HTTP API: extraction trigger, task status and health.

pub mod app;
pub mod middleware;
