//! Middleware stack for the API

pub mod audit;
pub mod brand;
pub mod layers;
pub mod metrics;
pub mod read_only;
pub mod request_id;
pub mod security;
pub mod session;

// Re-export public API
pub use audit::audit_middleware;
pub use brand::brand_middleware;
pub use layers::{compression, cors, trace};
pub use metrics::metrics_middleware;
pub use read_only::{read_only_middleware, READ_ONLY_HEADER};
pub use request_id::request_id_middleware;
pub use security::security_headers_middleware;
pub use session::session_middleware;
