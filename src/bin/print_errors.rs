//! src/bin/print_errors.rs
//!
//! Print persisted validation reports without running the pipeline.

use anyhow::Result;
use bizdir::{
    config::{parse_years, Mode, PipelineConfig},
    schema::load_document,
    validate::print_errors,
};
use clap::Parser;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Print validation errors per year", long_about = None)]
struct Args {
    /// Read production reports instead of the `test/` ones
    #[arg(long)]
    full: bool,

    #[arg(long, default_value = "schema.json")]
    schema: PathBuf,

    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// `1997-2015`, `1997,2009` or a mix
    #[arg(long, default_value = "1997-2015")]
    years: String,
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut cfg = PipelineConfig::for_mode(if args.full { Mode::Production } else { Mode::Test });
    cfg.work_dir = args.work_dir;
    let schema = load_document(&args.schema)?;

    let mut total = 0;
    for year in parse_years(&args.years)? {
        match print_errors(&cfg, &schema, year) {
            Ok(n) => total += n,
            Err(e) => warn!(year, error = %format!("{:#}", e), "no report"),
        }
    }
    println!("Total errors: {}", total);
    Ok(())
}
