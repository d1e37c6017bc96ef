//! CSV, text and JSON output for scraped records.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::scraper::PageSink;
use crate::types::{JobRecord, RunSummary};

/// Column headers, in file order
pub const CSV_HEADERS: [&str; 5] = ["Job Title", "Company Name", "Location", "Link", "Date Posted"];

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

/// Write records to a CSV file with a header row, even when empty
pub fn write_records(path: &Path, records: &[JobRecord]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(CSV_HEADERS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read records from a CSV file written by [`write_records`]
pub fn read_records(path: &Path) -> Result<Vec<JobRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut records = Vec::new();
    for row in reader.deserialize() {
        let record: JobRecord =
            row.with_context(|| format!("Malformed row in {}", path.display()))?;
        records.push(record);
    }
    Ok(records)
}

/// One `title - link` line per record
pub fn write_listing_text(path: &Path, records: &[JobRecord]) -> Result<()> {
    ensure_parent(path)?;
    let body: String = records
        .iter()
        .map(|r| format!("{} - {}\n", r.title, r.link))
        .collect();
    fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// File names for one run's outputs
#[derive(Debug, Clone)]
pub struct OutputPaths {
    dir: PathBuf,
    prefix: String,
}

impl OutputPaths {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn combined(&self) -> PathBuf {
        self.dir.join(format!("{}_combined.csv", self.prefix))
    }

    pub fn page(&self, page: u32) -> PathBuf {
        self.dir.join(format!("{}_page_{}.csv", self.prefix, page))
    }

    pub fn listing(&self) -> PathBuf {
        self.dir.join(format!("{}_listing.txt", self.prefix))
    }

    pub fn summary(&self) -> PathBuf {
        self.dir.join(format!("{}_summary.json", self.prefix))
    }
}

/// Writes each finished page to its own CSV file
pub struct CsvPageSink {
    paths: OutputPaths,
    written: Vec<PathBuf>,
}

impl CsvPageSink {
    pub fn new(paths: OutputPaths) -> Self {
        Self {
            paths,
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl PageSink for CsvPageSink {
    fn page_completed(&mut self, page: u32, records: &[JobRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let path = self.paths.page(page);
        write_records(&path, records)?;
        info!("Saved {} records to {}", records.len(), path.display());
        self.written.push(path);
        Ok(())
    }
}

/// Outcome of merging CSV files
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CombineStats {
    pub files_read: usize,
    pub files_skipped: usize,
    pub rows: usize,
    pub duplicates_removed: usize,
}

/// Merge CSV exports into `output`.
///
/// Unreadable and empty files are skipped. Exact duplicate rows are removed
/// and the first occurrence keeps its position.
pub fn combine_files(inputs: &[PathBuf], output: &Path) -> Result<CombineStats> {
    let mut stats = CombineStats::default();
    let mut seen = HashSet::new();
    let mut combined = Vec::new();

    for path in inputs {
        let records = match read_records(path) {
            Ok(records) => records,
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                stats.files_skipped += 1;
                continue;
            }
        };
        if records.is_empty() {
            info!("Skipping {} - no data rows", path.display());
            stats.files_skipped += 1;
            continue;
        }

        info!("Added {} rows from {}", records.len(), path.display());
        stats.files_read += 1;
        for record in records {
            if seen.insert(record.clone()) {
                combined.push(record);
            } else {
                stats.duplicates_removed += 1;
            }
        }
    }

    if stats.files_read == 0 {
        anyhow::bail!("No readable CSV files with data among {} input(s)", inputs.len());
    }

    stats.rows = combined.len();
    write_records(output, &combined)?;
    Ok(stats)
}
