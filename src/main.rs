use anyhow::{bail, Result};
use bizdir::{
    config::{parse_years, Mode, PipelineConfig},
    executor::StageContext,
    pipeline,
    schema::load_document,
    storage::{BlobStore, GcsBlobStore, LocalBlobStore},
    validate::TableInspector,
    warehouse::{BigQueryWarehouse, Warehouse},
};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Convert, validate, correct and load the yearly business-directory extracts.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Production run. Without it everything lives under `test/` and bad rows are injected.
    #[arg(long)]
    full: bool,

    /// Schema document (fields, field_lists, fixed_width)
    #[arg(long, default_value = "schema.json")]
    schema: PathBuf,

    /// Root for orig/, conv/, err/ and corr/
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// `1997-2015`, `1997,2009` or a mix
    #[arg(long)]
    years: Option<String>,

    /// Concurrent year tasks per stage (default: number of CPUs)
    #[arg(long)]
    workers: Option<usize>,

    /// Use a directory as blob storage instead of Google Cloud Storage
    #[arg(long)]
    local_store: Option<PathBuf>,

    /// Stop after publishing; do not touch the warehouse
    #[arg(long)]
    skip_load: bool,

    #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
    project: Option<String>,

    #[arg(long, env = "BQ_DATASET", default_value = "original")]
    dataset: String,
}

impl Args {
    fn config(&self) -> Result<PipelineConfig> {
        let mut cfg = PipelineConfig::for_mode(if self.full { Mode::Production } else { Mode::Test });
        cfg.schema_path = self.schema.clone();
        cfg.work_dir = self.work_dir.clone();
        if let Some(spec) = &self.years {
            cfg.years = parse_years(spec)?;
        }
        if let Some(n) = self.workers {
            cfg.workers = n;
        }
        cfg.project = self.project.clone();
        cfg.dataset = self.dataset.clone();
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    let args = Args::parse();
    let cfg = args.config()?;
    info!(config = %serde_json::to_string(&cfg)?, "startup");

    let schema = load_document(&cfg.schema_path)?;

    let store: Arc<dyn BlobStore> = match &args.local_store {
        Some(root) => Arc::new(LocalBlobStore::new(root)),
        None => Arc::new(GcsBlobStore::new().await?),
    };

    let bigquery = if args.skip_load {
        None
    } else {
        Some(BigQueryWarehouse::new(cfg.project.clone(), &cfg.dataset).await?)
    };
    let warehouse = bigquery.as_ref().map(|w| w as &dyn Warehouse);

    let ctx = Arc::new(StageContext {
        cfg,
        schema,
        store,
        validator: Arc::new(TableInspector),
    });
    let summary = pipeline::run(ctx, warehouse).await?;

    if !summary.is_clean() {
        for (stage, years) in &summary.failed {
            error!(stage = %stage, years = ?years, "failed years");
        }
        if let Some(load) = &summary.load {
            let failed = load.failed_years();
            if !failed.is_empty() {
                error!(years = ?failed, "warehouse load failed");
            }
        }
        bail!("pipeline finished with failures");
    }
    info!(years = summary.completed.len(), "all years done");
    Ok(())
}
