use crate::config::types::{Config, EngineConfig, OutputConfig, SourceConfig, UserAgentConfig};
use crate::ConfigError;
use url::Url;

const MAX_DELAY_CEILING_MS: u64 = 86_400_000;
const MAX_BACKOFF_FACTOR: f64 = 100.0;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_source_config(&config.source)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates engine configuration
///
/// The orchestrator calls this on construction, so library users get the
/// same guarantees as the binary.
pub fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.max_concurrency < 1 || config.max_concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "max_concurrency must be between 1 and 256, got {}",
            config.max_concurrency
        )));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "batch_size must be >= 1, got {}",
            config.batch_size
        )));
    }

    if config.max_delay_ms < config.base_delay_ms {
        return Err(ConfigError::Validation(format!(
            "max_delay ({}ms) must be >= base_delay ({}ms)",
            config.max_delay_ms, config.base_delay_ms
        )));
    }

    if config.max_delay_ms > MAX_DELAY_CEILING_MS {
        return Err(ConfigError::Validation(format!(
            "max_delay must be <= {}ms (one day), got {}ms",
            MAX_DELAY_CEILING_MS, config.max_delay_ms
        )));
    }

    if !(config.backoff_factor > 1.0 && config.backoff_factor <= MAX_BACKOFF_FACTOR) {
        return Err(ConfigError::Validation(format!(
            "backoff_factor must be in (1.0, {}], got {}",
            MAX_BACKOFF_FACTOR, config.backoff_factor
        )));
    }

    if !(config.recovery_factor > 0.0 && config.recovery_factor < 1.0) {
        return Err(ConfigError::Validation(format!(
            "recovery_factor must be in (0.0, 1.0), got {}",
            config.recovery_factor
        )));
    }

    if config.recovery_after < 1 {
        return Err(ConfigError::Validation(
            "recovery_after must be >= 1".to_string(),
        ));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.item_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "item_timeout must be > 0ms".to_string(),
        ));
    }

    Ok(())
}

/// Validates source configuration
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    if config.url_list.is_empty() {
        return Err(ConfigError::Validation(
            "url_list cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.state_dir.is_empty() {
        return Err(ConfigError::Validation(
            "state_dir cannot be empty".to_string(),
        ));
    }

    if config.content_dir.is_empty() {
        return Err(ConfigError::Validation(
            "content_dir cannot be empty".to_string(),
        ));
    }

    if config.state_dir == config.content_dir {
        return Err(ConfigError::Validation(
            "state_dir and content_dir must be different directories".to_string(),
        ));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let (local, domain) = email.split_once('@').ok_or_else(|| {
        ConfigError::Validation(format!("Invalid email format: '{}'", email))
    })?;

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
