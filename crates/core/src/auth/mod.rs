//! Platform credential handling and the start-of-run authentication check.

mod types;

pub use types::*;

use thiserror::Error;
use tracing::{error, info};

use crate::platform::{JobService, PlatformError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No platform credential supplied")]
    MissingCredential,

    #[error("Credential rejected: {0}")]
    Rejected(String),

    #[error("Authentication service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Confirm the credential the job service was built with is accepted.
///
/// Any failure here is fatal for the run.
pub async fn authenticate(service: &dyn JobService) -> Result<Identity, AuthError> {
    match service.whoami().await {
        Ok(user_id) => {
            info!("Authenticated to {} as {}", service.name(), user_id);
            Ok(Identity { user_id })
        }
        Err(PlatformError::AuthenticationFailed(msg)) => {
            error!("Credential rejected by {}: {}", service.name(), msg);
            Err(AuthError::Rejected(msg))
        }
        Err(e) => {
            error!("Could not reach {} to authenticate: {}", service.name(), e);
            Err(AuthError::ServiceUnavailable(e.to_string()))
        }
    }
}
