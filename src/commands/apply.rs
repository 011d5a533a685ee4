//! `keyward apply` - converge the keyring and report the outcome.

use anyhow::{Result, bail};
use keykit::backend::process::ProcessRunner;
use keykit::{Action, CommandRecord, Diagnostics, Error, ReconciliationResult, Reconciler};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::commands::desired_state;
use crate::ui;

/// Machine-readable result, stable for scripts.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub changed: bool,
    pub action: Action,
    pub diagnostics: ReportDiagnostics<'a>,
    pub trace: &'a [String],
}

/// Machine-readable failure.
#[derive(Debug, Serialize)]
pub struct FailureReport<'a> {
    pub failed: bool,
    pub msg: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<ReportDiagnostics<'a>>,
    pub trace: &'a [String],
}

#[derive(Debug, Serialize)]
pub struct ReportDiagnostics<'a> {
    pub commands_used: &'a BTreeMap<String, String>,
    pub last_record: &'a CommandRecord,
}

impl<'a> ReportDiagnostics<'a> {
    fn new(diag: &'a Diagnostics) -> Self {
        Self {
            commands_used: &diag.commands_used,
            last_record: &diag.last_record,
        }
    }
}

impl<'a> Report<'a> {
    pub fn new(result: &'a ReconciliationResult) -> Self {
        Self {
            changed: result.changed,
            action: result.action,
            diagnostics: ReportDiagnostics::new(&result.diagnostics),
            trace: result.trace(),
        }
    }
}

impl<'a> FailureReport<'a> {
    pub fn new(err: &'a Error) -> Self {
        let diagnostics = err.diagnostics();
        Self {
            failed: true,
            msg: err.to_string(),
            retryable: err.is_retryable(),
            diagnostics: diagnostics.map(ReportDiagnostics::new),
            trace: diagnostics.map_or(&[], |d| d.trace.as_slice()),
        }
    }
}

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let desired = desired_state(ctx, &args.key)?;
    let options = ctx.config.reconcile_options()?;
    let runner = ProcessRunner::new();
    let fetcher = ctx.config.fetcher();
    let reconciler = Reconciler::new(&runner, &fetcher, options);

    log::info!(
        "reconciling {} key ({}) to {}",
        desired.mode(),
        desired.identifier().unwrap_or("identifier from key file"),
        desired.state()
    );

    match reconciler.reconcile(&desired) {
        Ok(result) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&Report::new(&result))?);
            } else {
                print_result(ctx, &result, desired.dry_run());
            }
            Ok(())
        }
        Err(err) => {
            if args.json {
                eprintln!("{}", serde_json::to_string_pretty(&FailureReport::new(&err))?);
            } else {
                print_failure(&err);
            }
            bail!("{} failed: {err}", desired.state())
        }
    }
}

fn print_result(ctx: &Context, result: &ReconciliationResult, dry_run: bool) {
    let suffix = if dry_run { " (dry run)" } else { "" };
    if result.changed {
        ui::success(&format!("Changed: {}{suffix}", result.action));
    } else if !ctx.quiet {
        ui::info(&format!("Unchanged: {}{suffix}", result.action));
    }

    if ctx.verbose > 0 {
        ui::section("Trace");
        for entry in result.trace() {
            ui::dim(entry);
        }
    }
}

fn print_failure(err: &Error) {
    ui::error(&err.to_string());
    let category = err.category();
    ui::kv_err("Reason", category.description());
    ui::kv_err("Hint", category.advice());

    if err.is_retryable() {
        ui::kv_err("Retry", "the failure looks transient");
    }

    if let Some(diag) = err.diagnostics() {
        if matches!(err, Error::CommandFailure(_)) {
            ui::kv_err("Exit code", &diag.last_record.exit_code.to_string());
            let stderr = ui::first_line(&diag.last_record.stderr);
            if !stderr.is_empty() {
                ui::kv_err("Stderr", stderr);
            }
        }
        eprintln!();
        for entry in &diag.trace {
            ui::dim_err(entry);
        }
    }
}
