use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::DEFAULT_PARAMS_PATH;

#[derive(Parser, Debug)]
#[command(
    name = "datadrift",
    version,
    about = "Baseline-gated drift scoring for file datasets"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import feature exports into the current cache snapshot.
    Analyze(AnalyzeArgs),
    /// Score the current snapshot against the baseline.
    Detect(DetectArgs),
    /// Run detection for every configured dataset.
    DetectAll(DetectAllArgs),
    /// Replace the baseline with the current snapshot.
    Rebaseline(RebaselineArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, default_value = ".cache/datadrift")]
    pub cache_root: PathBuf,

    #[arg(long, default_value = DEFAULT_PARAMS_PATH)]
    pub params: PathBuf,

    /// Dataset name from the params file.
    #[arg(long)]
    pub dataset: Option<String>,

    /// Dataset root; takes precedence over `--dataset` lookup.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ThresholdArgs {
    #[arg(long)]
    pub threshold_warning: Option<f64>,

    #[arg(long)]
    pub threshold_critical: Option<f64>,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Directory holding attributes.json and embeddings.json.
    #[arg(long)]
    pub export_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DetectArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(flatten)]
    pub thresholds: ThresholdArgs,

    /// Defaults to `<dataset>/analysis/drift`.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DetectAllArgs {
    #[arg(long, default_value = ".cache/datadrift")]
    pub cache_root: PathBuf,

    #[arg(long, default_value = DEFAULT_PARAMS_PATH)]
    pub params: PathBuf,

    #[command(flatten)]
    pub thresholds: ThresholdArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RebaselineArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}
