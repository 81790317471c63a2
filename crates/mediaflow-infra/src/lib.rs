//! Shared infrastructure for mediaflow binaries:
//! - Telemetry initialization (tracing subscriber)
//! - HTTP middleware (request ID, security headers)
//! - Error response body

#[cfg(feature = "middleware")]
pub mod middleware;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub mod error;

#[cfg(feature = "middleware")]
pub use middleware::{get_request_id, request_id_middleware, security_headers_middleware, RequestId};

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, LogFormat};

pub use error::ErrorResponse;
