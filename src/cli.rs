use std::{env, path::PathBuf};

use anyhow::{Result, anyhow};

const DEFAULT_CONFIG_PATH: &str = "./wasteland.jsonc";

pub fn config_path_from_args() -> Result<PathBuf> {
    parse_config_path(env::args().skip(1))
}

/// Accepts either `--config <path>` or a single positional `<path>`.
pub fn parse_config_path(args: impl IntoIterator<Item = String>) -> Result<PathBuf> {
    let mut args = args.into_iter();
    let mut config_path = None;

    while let Some(arg) = args.next() {
        let value = match arg.as_str() {
            "--config" => args
                .next()
                .ok_or_else(|| anyhow!("missing value for --config"))?,
            other if other.starts_with('-') => {
                return Err(anyhow!(
                    "unknown argument: {other}. usage: wasteland [--config] [<path>]"
                ));
            }
            _ => arg,
        };

        if config_path.replace(PathBuf::from(value)).is_some() {
            return Err(anyhow!(
                "expected at most one config path. usage: wasteland [--config] [<path>]"
            ));
        }
    }

    Ok(config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)))
}
