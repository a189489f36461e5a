use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Job executable and output project are set (presence enforced by serde)
/// - Platform timeout is not 0
/// - Test batch size is not 0
/// - Identifier path is not empty
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.job.executable_id.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "job.executable_id cannot be empty".to_string(),
        ));
    }

    if config.job.output_project.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "job.output_project cannot be empty".to_string(),
        ));
    }

    if config.platform.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "platform.timeout_secs cannot be 0".to_string(),
        ));
    }

    if config.run.test_batch_size == 0 {
        return Err(ConfigError::ValidationError(
            "run.test_batch_size cannot be 0".to_string(),
        ));
    }

    if config.verifier.identifier_path.split('.').any(str::is_empty) {
        return Err(ConfigError::ValidationError(format!(
            "verifier.identifier_path is not a valid dotted path: {:?}",
            config.verifier.identifier_path
        )));
    }

    Ok(())
}
