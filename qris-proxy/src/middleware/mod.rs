pub mod auth;
pub mod client_identity;
pub mod metrics;
pub mod tracing;

pub use auth::{admin_auth_middleware, callback_auth_middleware};
pub use client_identity::ClientIdentity;
pub use self::metrics::metrics_middleware;
pub use self::tracing::request_id_middleware;
