pub mod client;
pub mod digest;
pub mod request;
pub mod response;
pub mod types;

// Re-export commonly used types for convenient access
pub use client::{ReqwestTransport, Transport};
pub use request::{DigestCredentials, Request, TransportHints};
pub use response::Response;
pub use types::{Method, normalize_url};
