//! Configuration validation.

use super::{Config, SourceConfig};
use crate::core::validate_identifier;
use crate::error::{DiffError, Result};
use crate::source::SslMode;

const URL_SCHEMES: [&str; 2] = ["postgres://", "postgresql://"];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_source("first", &config.first)?;
    validate_source("second", &config.second)?;

    let diff = &config.diff;
    validate_identifier(&diff.schema)
        .map_err(|e| DiffError::Config(format!("diff.schema: {}", e)))?;
    validate_identifier(diff.second_schema())
        .map_err(|e| DiffError::Config(format!("diff.second_schema: {}", e)))?;

    if diff.chunk_size == 0 {
        return Err(DiffError::Config("diff.chunk_size must be at least 1".into()));
    }
    if diff.chunk_size > i64::MAX as usize {
        return Err(DiffError::Config(format!(
            "diff.chunk_size must be at most {}",
            i64::MAX
        )));
    }
    if diff.workers == 0 {
        return Err(DiffError::Config("diff.workers must be at least 1".into()));
    }
    if diff.only_data && diff.only_sequences {
        return Err(DiffError::Config(
            "diff.only_data and diff.only_sequences cannot both be set".into(),
        ));
    }

    Ok(())
}

fn validate_source(name: &str, source: &SourceConfig) -> Result<()> {
    if source.url.is_empty() {
        return Err(DiffError::Config(format!("{}.url is required", name)));
    }
    if !URL_SCHEMES.iter().any(|s| source.url.starts_with(s)) {
        return Err(DiffError::Config(format!(
            "{}.url must start with postgres:// or postgresql://",
            name
        )));
    }
    if source.max_connections == 0 {
        return Err(DiffError::Config(format!(
            "{}.max_connections must be at least 1",
            name
        )));
    }
    source
        .ssl_mode
        .parse::<SslMode>()
        .map_err(|e| DiffError::Config(format!("{}.ssl_mode: {}", name, e)))?;
    Ok(())
}
