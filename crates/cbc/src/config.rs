use std::fs;
use std::path::Path;

use cbc_frame::Granularity;
use cbc_mux::SessionConfig;
use tracing::debug;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID};

/// Parse a `--granularity` value.
pub fn parse_granularity(value: &str) -> Result<Granularity, String> {
    let bytes: u32 = value
        .parse()
        .map_err(|_| format!("granularity must be a number (got {value})"))?;
    Granularity::try_from(bytes)
}

/// Build the session configuration from an optional JSON file and flag overrides.
pub fn load(path: Option<&Path>, granularity: Option<Granularity>) -> CliResult<SessionConfig> {
    let mut config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
            serde_json::from_str(&text).map_err(|err| {
                CliError::new(
                    DATA_INVALID,
                    format!("invalid config {}: {err}", path.display()),
                )
            })?
        }
        None => SessionConfig::default(),
    };

    if let Some(granularity) = granularity {
        config.link.granularity = granularity;
    }

    debug!(
        granularity = %config.link.granularity,
        pool_size = config.link.pool_size,
        overrides = config.channel_priorities.len(),
        "configuration loaded"
    );
    Ok(config)
}
