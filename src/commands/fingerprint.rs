//! `keyward fingerprint` - resolve the fingerprint of a key file.

use anyhow::{Context as _, Result, bail};
use keykit::backend::process::ProcessRunner;
use keykit::{DesiredState, KeyParams, LifecycleState, Reconciler};
use std::path::Path;

use crate::Context;
use crate::commands::tool_path;
use crate::config::expand_path;
use crate::ui;

pub fn run(ctx: &Context, file: &Path, tool: Option<&Path>) -> Result<()> {
    let desired = DesiredState::from_params(KeyParams {
        key_file: Some(expand_path(file)),
        tool_path: Some(tool_path(ctx, tool)?),
        state: LifecycleState::Present,
        ..KeyParams::default()
    })
    .context("Invalid key file")?;

    let options = ctx.config.reconcile_options()?;
    let runner = ProcessRunner::new();
    let fetcher = ctx.config.fetcher();
    let reconciler = Reconciler::new(&runner, &fetcher, options);

    let (fingerprint, trace) = reconciler.resolve_identifier(&desired)?;
    if ctx.verbose > 0 {
        for entry in trace.entries() {
            ui::dim_err(entry);
        }
    }

    match fingerprint {
        Some(fpr) => {
            println!("{fpr}");
            Ok(())
        }
        None => bail!("no fingerprint found in {}", file.display()),
    }
}
