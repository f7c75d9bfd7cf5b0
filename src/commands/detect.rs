use anyhow::{Context, Result};
use chrono::Utc;

use crate::cli::DetectArgs;
use crate::config::DriftOverrides;
use crate::model::DriftReport;
use crate::pipeline::run_drift;

use super::{open_store, resolve_dataset};

pub fn run(args: DetectArgs) -> Result<()> {
    let (params, dataset) = resolve_dataset(&args.common)?;
    let settings = params.drift_settings(&DriftOverrides::from(&args.thresholds))?;
    let output_dir = args.output_dir.unwrap_or_else(|| dataset.drift_dir());
    let mut store = open_store(&args.common.cache_root)?;

    let outcome = run_drift(&mut store, &dataset, &settings, &output_dir, Utc::now())?;

    if args.json {
        let rendered = serde_json::to_string_pretty(&outcome.report)
            .context("failed to serialize drift report")?;
        println!("{rendered}");
    } else {
        println!("{}", summary_line(&outcome.report));
    }
    Ok(())
}

pub(crate) fn summary_line(report: &DriftReport) -> String {
    let mut line = format!(
        "{}: {} score={:.4} added={} removed={} common={}",
        report.dataset,
        report.status,
        report.overall_score,
        report.files_added,
        report.files_removed,
        report.files_common
    );
    if let Some(quality) = report.quality_drift {
        line.push_str(" quality=");
        line.push_str(quality.as_str());
    }
    line
}
