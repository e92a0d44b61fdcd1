//! API Module
//!
//! HTTP handlers and routing for the cache's health and maintenance surface.

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
