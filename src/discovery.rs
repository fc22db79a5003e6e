use std::fs;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};

use crate::error::AnalysisError;

const CAPTURE_PATTERNS: [&str; 6] = [
    "*.pcap",
    "*.pcapng",
    "*.cap",
    "*.pcap.gz",
    "*.pcapng.gz",
    "*.cap.gz",
];

fn capture_globs() -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in CAPTURE_PATTERNS {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    builder.build()
}

/// Every capture file under `dir`, recursively, sorted by path.
pub fn discover_traces(dir: &Path) -> Result<Vec<PathBuf>, AnalysisError> {
    let globs = capture_globs()
        .map_err(|err| AnalysisError::InvalidConfiguration(err.to_string()))?;

    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    let mut root = true;

    while let Some(current) = pending.pop() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(err) if root => return Err(AnalysisError::unreadable(dir, err)),
            Err(err) => {
                warn!("skipping directory {}: {}", current.display(), err);
                continue;
            }
        };
        root = false;

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(path);
            } else if path.file_name().map_or(false, |name| globs.is_match(name)) {
                found.push(path);
            }
        }
    }

    found.sort();
    debug!("found {} capture files under {}", found.len(), dir.display());
    Ok(found)
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::*;

    #[test]
    fn finds_captures_recursively_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("site-b/day2")).unwrap();
        fs::create_dir_all(root.join("site-a")).unwrap();
        for name in [
            "site-b/day2/z.pcapng",
            "site-b/a.PCAP",
            "site-a/morning.cap",
            "site-a/notes.txt",
            "site-a/evening.pcap.gz",
            "top.pcap",
            "top.pcap.bak",
        ] {
            File::create(root.join(name)).unwrap();
        }

        let found = discover_traces(root).unwrap();
        let relative: Vec<String> = found
            .iter()
            .map(|path| {
                path.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        assert_eq!(
            relative,
            [
                "site-a/evening.pcap.gz",
                "site-a/morning.cap",
                "site-b/a.PCAP",
                "site-b/day2/z.pcapng",
                "top.pcap",
            ]
        );
    }

    #[test]
    fn missing_directory_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let result = discover_traces(&dir.path().join("absent"));
        assert!(matches!(result, Err(AnalysisError::TraceUnreadable { .. })));
    }
}
