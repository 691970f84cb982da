//! HTTP surface: the gateway router and its handlers.

pub mod handlers;
pub mod routes;

pub use routes::create_router;
