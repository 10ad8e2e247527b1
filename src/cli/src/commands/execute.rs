//! `cranberry execute` command.

use std::path::PathBuf;

use clap::Args;
use cranberry_core::Settings;
use cranberry_runtime::ExecutionContext;

use crate::output;

#[derive(Args)]
pub struct ExecuteArgs {
    /// Plan file (YAML)
    #[arg(long)]
    pub plan: PathBuf,

    /// Print what would run without contacting registries or tools
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn execute(
    args: ExecuteArgs,
    settings: &Settings,
) -> Result<(), Box<dyn std::error::Error>> {
    let plan = cranberry_runtime::load_plan(&args.plan)?;

    if args.dry_run {
        let actions = plan.dry_run();
        println!("{}", output::actions_table(&actions));
        return Ok(());
    }

    let ctx = ExecutionContext::from_settings(settings);
    let token = ctx.cancellation_token().clone();

    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping after the current resource");
            token.cancel();
        }
    });
    let result = plan.execute(&ctx).await;
    watcher.abort();

    result?;
    println!("Plan '{}' completed", plan.name());
    Ok(())
}
