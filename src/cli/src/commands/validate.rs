//! `cranberry validate` command.

use std::path::PathBuf;

use clap::Args;
use cranberry_runtime::StageKind;

#[derive(Args)]
pub struct ValidateArgs {
    /// Plan file (YAML)
    #[arg(long)]
    pub plan: PathBuf,
}

pub async fn execute(args: ValidateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let plan = cranberry_runtime::load_plan(&args.plan)?;

    let counts: Vec<String> = StageKind::ORDER
        .iter()
        .map(|kind| format!("{} {}", plan.pipeline().stage(*kind).resources().len(), kind))
        .collect();
    println!(
        "Plan '{}' is valid: {} registries, {} build nodes; {}",
        plan.name(),
        plan.registries().len(),
        plan.build_nodes().len(),
        counts.join(", ")
    );
    Ok(())
}
