//! HTTP surface and process wiring for the media pipeline.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod setup;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
