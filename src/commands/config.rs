use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::Context;
use crate::cli::ConfigCommand;
use crate::config::{default_config_path, expand_path};
use crate::ui;

pub fn run(ctx: &Context, explicit: Option<&Path>, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(ctx, explicit),
        ConfigCommand::Path => {
            println!("{}", config_path(explicit)?.display());
            Ok(())
        }
    }
}

fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(expand_path(path)),
        None => default_config_path(),
    }
}

fn show(ctx: &Context, explicit: Option<&Path>) -> Result<()> {
    let path = config_path(explicit)?;
    if !ctx.quiet {
        ui::header("Configuration");
        let origin = if path.exists() { "" } else { " (not found, using defaults)" };
        ui::kv("File", &format!("{}{origin}", path.display()));
        println!();
    }
    print!("{}", ctx.config.to_toml()?);
    Ok(())
}
