//! Config subcommand handlers.

use livefeed_config as config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", config::config_path().display());
        }

        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            print!("{}", cfg.redacted().to_toml()?);
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config()?;
            let active = cfg.active_profile_name(global.profile.as_deref());
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured in {}", config::config_path().display());
            }
            for (name, profile) in &cfg.profiles {
                let marker = if *name == active { "*" } else { " " };
                println!("{marker} {name}\t{}", profile.server);
            }
        }
    }
    Ok(())
}
