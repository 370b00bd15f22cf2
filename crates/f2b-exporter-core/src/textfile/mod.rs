//! Text file collector.
//!
//! Reads `*.prom` files from a directory on every scrape so that metrics
//! written by other tools (cron jobs, ban scripts) are served alongside the
//! fail2ban metrics. File contents are passed through unparsed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use prometheus::proto::MetricFamily;
use tracing::{debug, warn};

use crate::collector::metrics::{FamilySink, MetricDef, MetricKind, Sample, SampleSink};

/// 1 when a file (or the directory itself) could not be read, 0 otherwise.
pub static TEXTFILE_ERROR: MetricDef = MetricDef {
    subsystem: "",
    name: "textfile_error",
    help: "Checks for errors while reading text files",
    labels: &["path"],
    kind: MetricKind::Gauge,
};

const EXTENSION: &str = "prom";

/// Outcome of reading the directory once.
#[derive(Debug, Default)]
pub struct TextfileScan {
    /// Concatenated file contents, each file terminated by a newline.
    pub content: String,
    /// One `TEXTFILE_ERROR` sample per file.
    pub samples: Vec<Sample>,
}

impl TextfileScan {
    fn record(&mut self, path: &Path, failed: bool) {
        self.samples.push(Sample {
            metric: &TEXTFILE_ERROR,
            labels: vec![path.display().to_string()],
            value: if failed { 1.0 } else { 0.0 },
        });
    }

    /// Error gauges as Prometheus metric families.
    pub fn families(&self) -> Vec<MetricFamily> {
        let mut sink = FamilySink::new();
        for sample in &self.samples {
            sink.emit(sample.clone());
        }
        sink.finish()
    }
}

/// Collector of `*.prom` files in one directory.
#[derive(Debug, Clone)]
pub struct TextfileCollector {
    dir: PathBuf,
}

impl TextfileCollector {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads every `*.prom` file in name order.
    ///
    /// Unreadable files are reported through the error gauge and skipped;
    /// a scan never fails.
    pub fn scan(&self) -> TextfileScan {
        let mut scan = TextfileScan::default();

        let paths = match prom_files(&self.dir) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "failed to list textfile directory");
                scan.record(&self.dir, true);
                return scan;
            }
        };

        for path in paths {
            match fs::read_to_string(&path) {
                Ok(text) => {
                    scan.content.push_str(&text);
                    if !text.is_empty() && !text.ends_with('\n') {
                        scan.content.push('\n');
                    }
                    scan.record(&path, false);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read textfile");
                    scan.record(&path, true);
                }
            }
        }

        debug!(files = scan.samples.len(), bytes = scan.content.len(), "textfiles read");
        scan
    }
}

fn prom_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    fn errors(scan: &TextfileScan) -> Vec<(String, f64)> {
        scan.samples
            .iter()
            .map(|s| {
                let name = Path::new(&s.labels[0])
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                (name, s.value)
            })
            .collect()
    }

    #[test]
    fn reads_prom_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.prom"), "ban_script_runs 3\n").unwrap();
        fs::write(dir.path().join("a.prom"), "# TYPE backup_ok gauge\nbackup_ok 1").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored 1\n").unwrap();

        let scan = TextfileCollector::new(dir.path()).scan();

        assert_eq!(
            scan.content,
            "# TYPE backup_ok gauge\nbackup_ok 1\nban_script_runs 3\n"
        );
        assert_eq!(
            errors(&scan),
            vec![("a.prom".to_string(), 0.0), ("b.prom".to_string(), 0.0)]
        );
    }

    #[test]
    fn unreadable_file_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.prom"), "good 1\n").unwrap();
        // A directory with the right extension cannot be read as a file.
        fs::create_dir(dir.path().join("broken.prom")).unwrap();

        let scan = TextfileCollector::new(dir.path()).scan();

        assert_eq!(scan.content, "good 1\n");
        assert_eq!(
            errors(&scan),
            vec![("broken.prom".to_string(), 1.0), ("good.prom".to_string(), 0.0)]
        );
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        let scan = TextfileCollector::new(&missing).scan();

        assert!(scan.content.is_empty());
        assert_eq!(scan.samples.len(), 1);
        assert_eq!(scan.samples[0].labels, [missing.display().to_string()]);
        assert_eq!(scan.samples[0].value, 1.0);
    }

    #[test]
    fn error_gauge_encodes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("broken.prom")).unwrap();

        let families = TextfileCollector::new(dir.path()).scan().families();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&families, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains("# TYPE f2b_textfile_error gauge"));
        assert!(text.contains("broken.prom\"} 1"));
    }

    #[test]
    fn empty_directory_scans_clean() {
        let dir = tempfile::tempdir().unwrap();
        let scan = TextfileCollector::new(dir.path()).scan();
        assert!(scan.content.is_empty());
        assert!(scan.samples.is_empty());
        assert!(scan.families().is_empty());
    }
}
