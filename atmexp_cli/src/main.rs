mod cli;
mod display;
mod error;

use anyhow::{Context, Result};
use atmexp::config::Config;
use clap::Parser;
use cli::{Cli, RunCommand};
use log::debug;

const DEFAULT_LOGGING_LEVEL: &str = "warn";

fn main() -> Result<()> {
    // Set RUST_LOG to `DEFAULT_LOGGING_LEVEL` if not set
    let _ =
        std::env::var("RUST_LOG").map_err(|_| std::env::set_var("RUST_LOG", DEFAULT_LOGGING_LEVEL));
    pretty_env_logger::init_timed();
    let args = Cli::parse();
    debug!("args: {args:?}");
    let config: Config = read_config_from_toml()?;
    debug!("config: {config:?}");

    if let Some(command) = args.command {
        command.run(config)?;
    }
    Ok(())
}

fn read_config_from_toml() -> Result<Config> {
    // Linux: ~/.config/atmexp/config.toml
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(Config::default());
    };
    let file_path = config_dir.join("atmexp").join("config.toml");
    match std::fs::read_to_string(&file_path) {
        Ok(contents) => toml::from_str(&contents)
            .with_context(|| format!("Invalid TOML in config file {}", file_path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(e)
            .with_context(|| format!("Error reading config file {}", file_path.display())),
    }
}
