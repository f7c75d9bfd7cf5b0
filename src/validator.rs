use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::model::Snapshot;

/// Drops every entry whose file is not in `present`, returning how many were
/// removed. Entries are never added; missing features are not checked here.
pub fn validate(snapshot: &mut Snapshot, present: &HashSet<String>) -> usize {
    let before = snapshot.len();
    snapshot.retain(|file_key, _| {
        let keep = present.contains(file_key);
        if !keep {
            debug!(file = %file_key, "dropping orphan cache entry");
        }
        keep
    });
    before - snapshot.len()
}

/// Counts entries that `validate` would remove, without touching the snapshot.
pub fn count_orphans(snapshot: &Snapshot, present: &HashSet<String>) -> usize {
    snapshot
        .keys()
        .filter(|file_key| !present.contains(*file_key))
        .count()
}

/// File names under `root` (recursively) whose extension is one of `formats`.
/// An empty `formats` list accepts every file.
pub fn discover_present_files(root: &Path, formats: &[String]) -> Result<HashSet<String>> {
    let wanted = formats
        .iter()
        .map(|format| format.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|format| !format.is_empty())
        .collect::<HashSet<String>>();

    let mut present = HashSet::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries =
            fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?;

        for entry in entries {
            let entry =
                entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .with_context(|| format!("failed to inspect file type: {}", path.display()))?;

            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() || !matches_format(&path, &wanted) {
                continue;
            }

            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                present.insert(name.to_string());
            }
        }
    }

    Ok(present)
}

fn matches_format(path: &Path, wanted: &HashSet<String>) -> bool {
    if wanted.is_empty() {
        return true;
    }

    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| wanted.contains(&ext.to_ascii_lowercase()))
        .unwrap_or(false)
}
