//! Request and Response models for the cache API
//!
//! DTOs serialized to and from HTTP query strings and bodies.

pub mod requests;
pub mod responses;

pub use requests::{EventsParams, InvalidateParams};
pub use responses::{
    EventsResponse, HealthResponse, InvalidateResponse, MetricsResponse, StatsResponse,
};
