use anyhow::Result;
use clap::Parser;
use faers_etl::{
    config::{Args, Settings},
    dbt, logging, pipeline,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) config & logging ────────────────────────────────────────
    dotenv::dotenv().ok();
    let settings = Settings::from_args(Args::parse());
    let _guard = logging::init_logging(&settings.log_dir);
    info!(quarters = ?settings.quarters, "startup");

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    // ─── 2) ETL ─────────────────────────────────────────────────────
    let summary = match pipeline::run_etl(&settings).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = ?e, "ETL failed");
            return Err(e);
        }
    };
    info!(
        tables = summary.merged.len(),
        validated = summary.validation.len(),
        loaded = summary.loaded.len(),
        "pipeline complete"
    );

    // ─── 3) dbt ─────────────────────────────────────────────────────
    if settings.run_dbt {
        dbt::run_dbt(&settings.dbt_project_dir).await?;
    } else {
        info!("dbt disabled (set RUN_DBT=1 or --dbt)");
    }

    Ok(())
}
