// src/dbt.rs
use anyhow::{bail, Context, Result};
use std::{path::Path, process::Stdio};
use tokio::process::Command;
use tracing::{info, instrument};

/// dbt subcommands, in the order they run.
pub const DBT_STEPS: [&str; 3] = ["deps", "run", "test"];

/// Run `dbt deps`, `dbt run`, `dbt test` in `project_dir`.
pub async fn run_dbt(project_dir: &Path) -> Result<()> {
    run_steps("dbt", project_dir).await
}

/// Run each of [`DBT_STEPS`] with `program`; the first non-zero exit aborts.
#[instrument(level = "info", skip(project_dir), fields(dir = %project_dir.display()))]
pub async fn run_steps(program: &str, project_dir: &Path) -> Result<()> {
    for step in DBT_STEPS {
        info!(step, "running {} {}", program, step);
        let status = Command::new(program)
            .arg(step)
            .current_dir(project_dir)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("failed to execute `{} {}`. Is it installed and in your PATH?", program, step))?;

        if !status.success() {
            bail!("`{} {}` failed with status: {}", program, step, status);
        }
    }
    info!("dbt finished");
    Ok(())
}
