pub mod apply;
pub mod config;
pub mod fingerprint;
pub mod plan;

use anyhow::{Context as _, Result};
use keykit::backend::process::resolve_tool;
use keykit::{DesiredState, KeyParams};
use std::path::Path;

use crate::Context;
use crate::cli::KeyArgs;
use crate::config::expand_path;

/// Build the validated descriptor for a key command.
///
/// `--tool` wins over the configured tool; either must resolve to an
/// executable before anything runs.
pub fn desired_state(ctx: &Context, args: &KeyArgs) -> Result<DesiredState> {
    let params = KeyParams {
        tool_path: Some(tool_path(ctx, args.tool.as_deref())?),
        ..args.to_params()
    };
    DesiredState::from_params(params).context("Invalid key parameters")
}

/// Resolve the key tool from an override or the config.
pub fn tool_path(ctx: &Context, tool: Option<&Path>) -> Result<std::path::PathBuf> {
    let tool = tool.map_or_else(|| ctx.config.tool_path(), expand_path);
    resolve_tool(&tool).context("The key tool must be an executable")
}
