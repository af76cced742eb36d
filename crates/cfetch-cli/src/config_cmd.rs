use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cfetch_config::{Config, PROJECT_CONFIG};
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// Print where configuration files are looked up
    Path,

    /// Write a config file with every default spelled out
    Init {
        /// Write ~/.cfetch/config.toml instead of ./.cfetch/config.toml
        #[arg(long)]
        global: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn run(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = Config::load().context("Failed to load configuration")?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigCommands::Path => {
            let global = Config::global_config_path();
            println!("Global:  {}", describe(global.as_deref()));
            println!("Project: {}", describe(Some(Path::new(PROJECT_CONFIG))));
        }
        ConfigCommands::Init { global, force } => {
            let path = if global {
                Config::global_config_path().context("Cannot determine home directory")?
            } else {
                PathBuf::from(PROJECT_CONFIG)
            };
            init(&path, force)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn describe(path: Option<&Path>) -> String {
    match path {
        Some(p) if p.exists() => format!("{} (found)", p.display()),
        Some(p) => format!("{} (not found)", p.display()),
        None => "(unavailable)".to_string(),
    }
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, Config::default_toml()?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_refuses_to_overwrite() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".cfetch/config.toml");
        init(&path, false).unwrap();
        let written: Config = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, Config::default());

        assert!(init(&path, false).is_err());
        init(&path, true).unwrap();
    }
}
