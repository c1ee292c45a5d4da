//! Client for the document-processing backend.
//!
//! [`BackendClient`] is the seam every orchestrator talks through;
//! [`HttpBackendClient`] is the production implementation.

mod http;
mod types;

pub use http::HttpBackendClient;
pub use types::*;
