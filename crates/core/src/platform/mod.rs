//! Remote job execution platform abstraction.
//!
//! Provides the `JobService` and `DocumentStore` traits the pipeline stages
//! depend on, plus an HTTP implementation of both.

mod http;
mod types;

pub use http::PlatformClient;
pub use types::*;
