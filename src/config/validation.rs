use crate::config::types::{
    ChangeDetectionConfig, CircuitBreakerConfig, Config, CrawlerConfig, OutputConfig,
    RateLimitConfig, RetryConfig, SiteEntry, StrategyConfig, UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_circuit_breaker_config(&config.circuit_breaker)?;
    validate_retry_config(&config.retry)?;
    validate_change_detection_config(&config.change_detection)?;
    validate_strategy_config(&config.strategy)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_sites(&config.sites)?;
    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.worker_count < 1 || config.worker_count > 256 {
        return Err(ConfigError::Validation(format!(
            "worker_count must be between 1 and 256, got {}",
            config.worker_count
        )));
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(format!(
            "queue_capacity must be >= 1, got {}",
            config.queue_capacity
        )));
    }

    if config.per_item_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "per_item_timeout_ms must be > 0".to_string(),
        ));
    }

    if config.metrics_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "metrics_interval_ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_strategy_config(config: &StrategyConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("base_priority", config.base_priority),
        ("quality_weight", config.quality_weight),
        ("depth_penalty", config.depth_penalty),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::Validation(format!(
                "{} must be a non-negative number, got {}",
                name, value
            )));
        }
    }

    if !(0.0..=1.0).contains(&config.quality_threshold) {
        return Err(ConfigError::Validation(format!(
            "quality_threshold must be between 0.0 and 1.0, got {}",
            config.quality_threshold
        )));
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.min_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "min_delay_ms must be > 0".to_string(),
        ));
    }

    if config.min_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "min_delay_ms ({}) must not exceed max_delay_ms ({})",
            config.min_delay_ms, config.max_delay_ms
        )));
    }

    if !(config.initial_requests_per_minute.is_finite()
        && config.initial_requests_per_minute > 0.0)
    {
        return Err(ConfigError::Validation(format!(
            "initial_requests_per_minute must be positive, got {}",
            config.initial_requests_per_minute
        )));
    }

    for (name, value) in [
        ("adaptive_factor", config.adaptive_factor),
        ("penalty_factor", config.penalty_factor),
    ] {
        if !(value > 0.0 && value <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "{} must be in (0, 1], got {}",
                name, value
            )));
        }
    }

    if config.fast_response_threshold_ms > config.slow_response_threshold_ms {
        return Err(ConfigError::Validation(
            "fast_response_threshold_ms must not exceed slow_response_threshold_ms".to_string(),
        ));
    }

    Ok(())
}

fn validate_circuit_breaker_config(config: &CircuitBreakerConfig) -> Result<(), ConfigError> {
    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure_threshold must be >= 1".to_string(),
        ));
    }
    if config.reset_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "reset_timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }
    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "retry base_delay_ms ({}) must not exceed max_delay_ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }
    Ok(())
}

fn validate_change_detection_config(config: &ChangeDetectionConfig) -> Result<(), ConfigError> {
    if config.retention_count < 1 {
        return Err(ConfigError::Validation(
            "retention_count must be >= 1".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&config.notify_threshold_percent) {
        return Err(ConfigError::Validation(format!(
            "notify_threshold_percent must be within 0..=100, got {}",
            config.notify_threshold_percent
        )));
    }
    Ok(())
}

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

    validate_email(&config.contact_email)
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_sites(sites: &[SiteEntry]) -> Result<(), ConfigError> {
    if sites.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[site]] entry is required".to_string(),
        ));
    }

    for entry in sites {
        validate_domain_pattern(&entry.domain)?;

        if entry.seeds.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Site '{}' must have at least one seed URL",
                entry.domain
            )));
        }

        if !entry.priority.is_finite() {
            return Err(ConfigError::Validation(format!(
                "Site '{}' has a non-finite priority",
                entry.domain
            )));
        }

        for seed in &entry.seeds {
            let url = Url::parse(seed).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e))
            })?;

            if url.scheme() != "https" && url.scheme() != "http" {
                return Err(ConfigError::Validation(format!(
                    "Seed URL '{}' must use HTTP or HTTPS",
                    seed
                )));
            }
        }
    }

    Ok(())
}

/// Validates a domain pattern (supports a leading `*.` wildcard)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    validate_domain_string(pattern.strip_prefix("*.").unwrap_or(pattern))
}

fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    if !domain.contains('.') && domain != "localhost" {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
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
