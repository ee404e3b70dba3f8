use std::path::Path;

use anyhow::{Context, Result};

/// Parsed contents of the sandbox metadata report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    /// CPU time in seconds.
    pub time: f64,
    /// Peak memory in KiB; max of `max-rss` and `cg-mem`.
    pub memory: u64,
    pub exit_code: i32,
    pub message: String,
    /// `TO`, `SG`, `RE`, `XX` or empty when the program exited normally.
    pub status: String,
}

/// Reads and parses the metadata file. A missing or unreadable file is a
/// hard error; the executor degrades it to an internal-error verdict.
pub fn read_metadata(path: &Path) -> Result<Metadata> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read metadata {}", path.display()))?;
    Ok(parse_metadata(&content))
}

/// Line-oriented `key:value` report. Unknown keys are ignored and fields
/// that fail to parse stay zero.
pub fn parse_metadata(content: &str) -> Metadata {
    let mut meta = Metadata::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key {
            "time" => meta.time = value.parse().unwrap_or_default(),
            "max-rss" => meta.memory = meta.memory.max(value.parse().unwrap_or_default()),
            "cg-mem" => meta.memory = meta.memory.max(value.parse().unwrap_or_default()),
            "exitcode" => meta.exit_code = value.parse().unwrap_or_default(),
            "message" => meta.message = value.to_string(),
            "status" => meta.status = value.to_string(),
            _ => {}
        }
    }
    meta
}
