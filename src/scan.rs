//! Batch driver: path queue, directory expansion, per-message
//! classification and reporting.
//!
//! Nothing below the per-message boundary stops a batch. Load failures are
//! logged and counted as skipped; anomalies are logged where they occur and
//! carried into the report.

use std::collections::{HashSet, VecDeque};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::{classify, Outcome, Policy, Predicate};
use crate::config::ScanConfig;
use crate::error::{Anomaly, Diagnosed, LoadError};
use crate::model::attachment::Attachment;
use crate::model::message::Message;
use crate::parser::eml::{self, DEFAULT_MAX_MESSAGE_SIZE};
use crate::parser::multipart::Walker;

// ── Path queue ──────────────────────────────────────────────────

/// Yields the regular files reachable from the input paths.
///
/// Directories are expanded one level when reached: their children, sorted
/// by name, go to the back of the queue. A directory is expanded at most
/// once (by canonical path). Missing and non-regular paths are logged and
/// skipped.
#[derive(Debug, Default)]
pub struct PathQueue {
    queue: VecDeque<PathBuf>,
    expanded: HashSet<PathBuf>,
    skipped: usize,
}

impl PathQueue {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            queue: paths.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Number of paths dropped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn expand(&mut self, dir: &Path) {
        let key = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        if !self.expanded.insert(key) {
            debug!(path = %dir.display(), "Directory already expanded");
            return;
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Cannot list directory, skipping");
                self.skipped += 1;
                return;
            }
        };

        let mut children: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Unreadable directory entry");
                    None
                }
            })
            .collect();
        children.sort();
        debug!(path = %dir.display(), children = children.len(), "Expanded directory");
        self.queue.extend(children);
    }
}

impl Iterator for PathQueue {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        while let Some(path) = self.queue.pop_front() {
            let metadata = match std::fs::metadata(&path) {
                Ok(m) => m,
                Err(e) => {
                    let err = LoadError::io(&path, e);
                    warn!(error = %err, "Skipping path");
                    self.skipped += 1;
                    continue;
                }
            };
            if metadata.is_dir() {
                self.expand(&path);
                continue;
            }
            if !metadata.is_file() {
                warn!(path = %path.display(), "Not a file, skipping");
                self.skipped += 1;
                continue;
            }
            return Some(path);
        }
        None
    }
}

// ── Options ─────────────────────────────────────────────────────

/// Everything that decides how a message is scanned and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub policy: Policy,
    pub walker: Walker,
    pub max_message_size: u64,
    /// Emit one JSON report per message on the primary stream.
    pub json: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            walker: Walker::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            json: false,
        }
    }
}

impl ScanOptions {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            policy: config.policy,
            walker: Walker::new(config.max_depth),
            max_message_size: config.max_message_size,
            json: false,
        }
    }
}

// ── Per-message inspection ──────────────────────────────────────

/// A loaded message and the attachments walked out of it.
#[derive(Debug)]
pub struct Inspection {
    pub message: Message,
    pub label: String,
    pub attachments: Diagnosed<Vec<Attachment>>,
}

/// Load one message file and collect its attachments.
pub fn inspect(path: &Path, options: &ScanOptions) -> Result<Inspection, LoadError> {
    let message = eml::load_with_limit(path, options.max_message_size)?;
    let label = message.label();
    info!(path = %path.display(), message = %label, "Scanning file");

    let attachments = eml::attachments(&message, &options.walker);
    if eml::is_broken(&attachments) {
        debug!(message = %label, "No attachments recovered from a broken body");
    }
    Ok(Inspection {
        message,
        label,
        attachments,
    })
}

/// One attachment as it appears in a JSON report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentReport {
    pub name: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub depth: usize,
    pub matched: bool,
}

/// The classification of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageReport {
    pub path: PathBuf,
    pub label: String,
    pub outcome: Outcome,
    pub attachments: Vec<AttachmentReport>,
    pub anomalies: Vec<Anomaly>,
}

impl MessageReport {
    pub fn new(inspection: &Inspection, predicate: &impl Predicate) -> Self {
        let found = &inspection.attachments.value;
        let attachments = found
            .iter()
            .map(|a| AttachmentReport {
                name: a.name.clone(),
                size: a.size(),
                content_type: a.content_type.clone(),
                depth: a.depth,
                matched: predicate.matches(a),
            })
            .collect();

        Self {
            path: inspection.message.path.clone(),
            label: inspection.label.clone(),
            outcome: classify(found, predicate),
            attachments,
            anomalies: inspection.attachments.anomalies.clone(),
        }
    }
}

// ── Scanner ─────────────────────────────────────────────────────

/// Totals for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub scanned: usize,
    pub flagged: usize,
    pub skipped: usize,
    pub anomalies: usize,
}

/// Classifies messages and writes the verdicts.
///
/// Positive labels go to `out`; `NOT <label>` lines go to `diag`. In JSON
/// mode every message is reported on `out` instead.
pub struct Scanner<O, D> {
    options: ScanOptions,
    out: O,
    diag: D,
    summary: ScanSummary,
}

impl<O: Write, D: Write> Scanner<O, D> {
    pub fn new(options: ScanOptions, out: O, diag: D) -> Self {
        Self {
            options,
            out,
            diag,
            summary: ScanSummary::default(),
        }
    }

    pub fn summary(&self) -> ScanSummary {
        self.summary
    }

    pub fn into_writers(self) -> (O, D) {
        (self.out, self.diag)
    }

    /// Scan every message reachable from `paths`.
    ///
    /// `progress` receives the number of messages processed so far. Only a
    /// failure to write a verdict is returned as an error.
    pub fn run(
        &mut self,
        paths: impl IntoIterator<Item = PathBuf>,
        progress: Option<&dyn Fn(usize)>,
    ) -> io::Result<ScanSummary> {
        let mut queue = PathQueue::new(paths);
        let mut processed = 0;
        for path in queue.by_ref() {
            self.scan_file(&path)?;
            processed += 1;
            if let Some(cb) = progress {
                cb(processed);
            }
        }
        self.summary.skipped += queue.skipped();
        self.out.flush()?;

        info!(
            scanned = self.summary.scanned,
            flagged = self.summary.flagged,
            skipped = self.summary.skipped,
            anomalies = self.summary.anomalies,
            "Scan finished"
        );
        Ok(self.summary)
    }

    /// Scan a single message file. Returns `None` when it could not be loaded.
    pub fn scan_file(&mut self, path: &Path) -> io::Result<Option<Outcome>> {
        let inspection = match inspect(path, &self.options) {
            Ok(inspection) => inspection,
            Err(e) => {
                warn!(error = %e, "Skipping message");
                self.summary.skipped += 1;
                return Ok(None);
            }
        };

        let report = MessageReport::new(&inspection, &self.options.policy);
        self.summary.scanned += 1;
        self.summary.anomalies += report.anomalies.len();
        if report.outcome == Outcome::Positive {
            self.summary.flagged += 1;
        }
        self.emit(&report)?;
        Ok(Some(report.outcome))
    }

    fn emit(&mut self, report: &MessageReport) -> io::Result<()> {
        if self.options.json {
            serde_json::to_writer(&mut self.out, report)?;
            return writeln!(self.out);
        }
        match report.outcome {
            Outcome::Positive => writeln!(self.out, "{}", report.label),
            Outcome::Negative => writeln!(self.diag, "NOT {}", report.label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn zip_message(tag: &str) -> String {
        format!(
            "Subject: [1] {tag}\r\n\
             Content-Type: multipart/mixed; boundary=\"b\"\r\n\
             \r\n\
             --b\r\n\
             Content-Disposition: attachment; filename=\"a.zip\"\r\n\
             \r\n\
             PK\r\n\
             --b--\r\n"
        )
    }

    #[test]
    fn test_queue_expands_directories_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let b = write(dir.path(), "b.eml", "Subject: b\n\n");
        let a = write(dir.path(), "a.eml", "Subject: a\n\n");
        let found: Vec<PathBuf> = PathQueue::new([dir.path().to_path_buf()]).collect();
        assert_eq!(found, vec![a, b]);
    }

    #[test]
    fn test_queue_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.eml", "Subject: a\n\n");
        let mut queue = PathQueue::new([dir.path().join("missing"), a.clone()]);
        assert_eq!(queue.next(), Some(a));
        assert_eq!(queue.next(), None);
        assert_eq!(queue.skipped(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_queue_skips_non_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("mail.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&socket_path).unwrap();
        let a = write(dir.path(), "a.eml", "Subject: a\n\n");

        let mut queue = PathQueue::new([socket_path, a.clone()]);
        assert_eq!(queue.next(), Some(a));
        assert_eq!(queue.next(), None);
        assert_eq!(queue.skipped(), 1);
    }

    #[test]
    fn test_queue_expands_a_directory_once() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.eml", "Subject: a\n\n");
        let found: Vec<PathBuf> =
            PathQueue::new([dir.path().to_path_buf(), dir.path().to_path_buf()]).collect();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_scanner_positive_and_negative_streams() {
        let dir = tempfile::tempdir().unwrap();
        let flagged = write(dir.path(), "1.eml", &zip_message("zipped"));
        let clean = write(dir.path(), "2.eml", "Subject: [2] plain\n\nhello\n");

        let options = ScanOptions {
            policy: Policy::SuspiciousExtension,
            ..ScanOptions::default()
        };
        let mut scanner = Scanner::new(options, Vec::new(), Vec::new());
        let summary = scanner.run([flagged, clean], None).unwrap();
        let (out, diag) = scanner.into_writers();

        assert_eq!(String::from_utf8(out).unwrap(), "[1] zipped\n");
        assert_eq!(String::from_utf8(diag).unwrap(), "NOT [2] plain\n");
        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.flagged, 1);
        assert_eq!(summary.skipped, 0);
    }

    #[test]
    fn test_scanner_json_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "1.eml", &zip_message("zipped"));
        let options = ScanOptions {
            policy: Policy::SuspiciousExtension,
            json: true,
            ..ScanOptions::default()
        };
        let mut scanner = Scanner::new(options, Vec::new(), Vec::new());
        scanner.run([path], None).unwrap();
        let (out, diag) = scanner.into_writers();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["label"], "[1] zipped");
        assert_eq!(value["outcome"], "positive");
        assert_eq!(value["attachments"][0]["name"], "a.zip");
        assert_eq!(value["attachments"][0]["matched"], true);
        assert_eq!(value["anomalies"].as_array().unwrap().len(), 0);
        assert!(diag.is_empty());
    }

    #[test]
    fn test_scan_file_reports_load_failure_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let empty = write(dir.path(), "empty.eml", "");
        let mut scanner = Scanner::new(ScanOptions::default(), Vec::new(), Vec::new());
        assert_eq!(scanner.scan_file(&empty).unwrap(), None);
        assert_eq!(scanner.summary().skipped, 1);
    }

    #[test]
    fn test_progress_callback_counts_messages() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.eml", "Subject: a\n\n");
        write(dir.path(), "b.eml", "Subject: b\n\n");
        let seen = std::cell::Cell::new(0);
        let mut scanner = Scanner::new(ScanOptions::default(), io::sink(), io::sink());
        scanner
            .run([dir.path().to_path_buf()], Some(&|n| seen.set(n)))
            .unwrap();
        assert_eq!(seen.get(), 2);
    }
}
