//! The HTTP transport: axum routes over `scheduler::Scheduler`.

pub mod auth;
mod dto;
mod error;
mod routes;
mod sse;

pub use routes::{router, router_with_auth, ApiState, SharedScheduler};
