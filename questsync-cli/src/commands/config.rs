//! `questsync config init|show`

use anyhow::{Context, Result};
use clap::Subcommand;

use questsync_core::config::{self, Config};

use super::home;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a default config.yaml, keeping an existing one untouched.
    Init {
        /// Working copy of the installed component.
        #[arg(long)]
        install_root: Option<std::path::PathBuf>,

        /// Module-graph snapshot exported by the host.
        #[arg(long)]
        graph_snapshot: Option<std::path::PathBuf>,
    },
    /// Print the effective configuration.
    Show,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = home()?;
    match command {
        ConfigCommand::Init {
            install_root,
            graph_snapshot,
        } => {
            let path = config::config_path_at(&home);
            if path.exists() {
                println!("config already exists: {}", path.display());
                return Ok(());
            }
            let config = Config {
                install_root,
                graph_snapshot,
                ..Config::default()
            };
            let path = config::save_at(&home, &config).context("failed to write config")?;
            println!("✓ Wrote {}", path.display());
        }
        ConfigCommand::Show => {
            let config = config::load_at(&home).context("failed to load config")?;
            let yaml = serde_yaml::to_string(&config).context("failed to render config")?;
            print!("{yaml}");
        }
    }
    Ok(())
}
