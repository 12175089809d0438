use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Batch size and pool sizes are not 0
/// - The submission queue is at least as deep as the site pool
/// - Test names are present, unique and usable as file names
/// - Runner timeout is not 0
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let crawler = &config.crawler;

    if crawler.batch_size == 0 {
        return Err(invalid("crawler.batch_size cannot be 0"));
    }
    if crawler.max_concurrent_sites == 0 {
        return Err(invalid("crawler.max_concurrent_sites cannot be 0"));
    }
    if crawler.max_concurrent_tests == 0 {
        return Err(invalid("crawler.max_concurrent_tests cannot be 0"));
    }
    if crawler.max_queued_site_tasks < crawler.max_concurrent_sites {
        return Err(invalid(format!(
            "crawler.max_queued_site_tasks ({}) cannot be less than crawler.max_concurrent_sites ({})",
            crawler.max_queued_site_tasks, crawler.max_concurrent_sites
        )));
    }

    // Test names
    if crawler.tests.is_empty() {
        return Err(invalid("crawler.tests cannot be empty"));
    }
    let mut seen = HashSet::new();
    for name in &crawler.tests {
        if name.trim().is_empty() {
            return Err(invalid("crawler.tests contains an empty name"));
        }
        if name == "." || name == ".." || name.contains(&['/', '\\'][..]) {
            return Err(invalid(format!(
                "crawler.tests: '{}' is not a valid program name",
                name
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(invalid(format!("crawler.tests: '{}' is listed twice", name)));
        }
    }

    if config.runner.timeout_ms == 0 {
        return Err(invalid("runner.timeout_ms cannot be 0"));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}
