//! HTTP API for matchd

pub mod handlers;
pub mod routes;

pub use handlers::ApiState;
pub use routes::create_router;
