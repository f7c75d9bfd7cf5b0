use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::model::{DriftStatus, TimelineRow};
use crate::util::ensure_directory;

pub const TIMELINE_FILENAME: &str = "timeline.tsv";
pub const TIMELINE_HEADER: &str = "timestamp\toverall_score\tstatus\tfiles_added\tfiles_removed";

/// Append-only TSV history of drift runs. Existing rows are never rewritten.
#[derive(Debug, Clone)]
pub struct Timeline {
    path: PathBuf,
}

impl Timeline {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(TIMELINE_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, row: &TimelineRow) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_directory(parent)?;
        }

        let needs_header = fs::metadata(&self.path)
            .map(|meta| meta.len() == 0)
            .unwrap_or(true);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open timeline: {}", self.path.display()))?;

        let mut out = String::new();
        if needs_header {
            out.push_str(TIMELINE_HEADER);
            out.push('\n');
        }
        out.push_str(&format_row(row));
        out.push('\n');

        file.write_all(out.as_bytes())
            .with_context(|| format!("failed to append timeline: {}", self.path.display()))
    }

    pub fn read(&self) -> Result<Vec<TimelineRow>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;

        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty() && *line != TIMELINE_HEADER)
            .map(|(index, line)| {
                parse_row(line).with_context(|| {
                    format!("invalid timeline row {} in {}", index + 1, self.path.display())
                })
            })
            .collect()
    }

    pub fn last(&self) -> Result<Option<TimelineRow>> {
        Ok(self.read()?.pop())
    }
}

fn format_row(row: &TimelineRow) -> String {
    format!(
        "{}\t{:.4}\t{}\t{}\t{}",
        row.timestamp, row.overall_score, row.status, row.files_added, row.files_removed
    )
}

fn parse_row(line: &str) -> Result<TimelineRow> {
    let fields = line.split('\t').collect::<Vec<&str>>();
    if fields.len() != 5 {
        bail!("expected 5 columns, found {}", fields.len());
    }

    let status = DriftStatus::parse(fields[2])
        .with_context(|| format!("unknown status: {}", fields[2]))?;

    Ok(TimelineRow {
        timestamp: fields[0].to_string(),
        overall_score: fields[1]
            .trim()
            .parse()
            .with_context(|| format!("invalid score: {}", fields[1]))?,
        status,
        files_added: fields[3]
            .trim()
            .parse()
            .with_context(|| format!("invalid files_added: {}", fields[3]))?,
        files_removed: fields[4]
            .trim()
            .parse()
            .with_context(|| format!("invalid files_removed: {}", fields[4]))?,
    })
}
