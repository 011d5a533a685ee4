//! `keyward plan` - detect presence and show the converging action.

use anyhow::Result;
use keykit::backend::process::ProcessRunner;
use keykit::{Plan, Presence, Reconciler};

use crate::Context;
use crate::cli::KeyArgs;
use crate::commands::desired_state;
use crate::ui;

pub fn run(ctx: &Context, args: &KeyArgs) -> Result<()> {
    let desired = desired_state(ctx, args)?;
    let options = ctx.config.reconcile_options()?;
    let runner = ProcessRunner::new();
    let fetcher = ctx.config.fetcher();
    let reconciler = Reconciler::new(&runner, &fetcher, options);

    let plan = reconciler.plan(&desired)?;
    print_plan(ctx, &plan);
    Ok(())
}

fn presence_label(presence: Presence) -> &'static str {
    match presence {
        Presence::Present => "present",
        Presence::Absent => "absent",
        Presence::Unknown => "unknown (treated as absent)",
    }
}

fn print_plan(ctx: &Context, plan: &Plan) {
    ui::header("Key plan");
    ui::kv("Mode", &plan.desired.mode().to_string());
    ui::kv("Identifier", plan.desired.identifier().unwrap_or("-"));
    ui::kv("Desired", &plan.desired.state().to_string());
    ui::kv("Presence", presence_label(plan.presence));
    ui::kv("Action", &plan.action.to_string());
    if plan.desired.dry_run() {
        ui::kv("Dry run", "yes");
    }

    if plan.presence == Presence::Unknown {
        ui::warn("Presence was not checked; the key is assumed absent");
    }

    if !plan.action.is_mutating() {
        println!();
        ui::success("Nothing to do");
    } else if let Some(command) = plan
        .action
        .template_name()
        .and_then(|name| plan.commands.get(name))
    {
        ui::section("Would run");
        ui::dim(command);
    }

    if ctx.verbose > 0 {
        ui::section("Commands");
        for (name, command) in plan.commands.as_map() {
            ui::kv(name, command);
        }
        ui::section("Trace");
        for entry in plan.trace.entries() {
            ui::dim(entry);
        }
    }
}
