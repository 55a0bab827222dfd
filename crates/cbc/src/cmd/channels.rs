use cbc_mux::{SessionConfig, CHANNELS};

use crate::cmd::ChannelsArgs;
use crate::exit::{CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_channels, OutputFormat};

pub fn run(_args: ChannelsArgs, format: OutputFormat, config: &SessionConfig) -> CliResult<i32> {
    for &channel in config.channel_priorities.keys() {
        if channel >= CHANNELS.len() {
            return Err(CliError::new(
                USAGE,
                format!("configuration names unknown channel {channel}"),
            ));
        }
    }

    let rows: Vec<_> = CHANNELS
        .iter()
        .map(|info| {
            let priority = config
                .channel_priorities
                .get(&info.id)
                .copied()
                .unwrap_or(info.default_priority);
            (info, priority)
        })
        .collect();
    print_channels(&rows, format);
    Ok(SUCCESS)
}
