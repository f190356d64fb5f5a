//! Result aggregation
//!
//! Turns a run's downloaded artifacts into a structured report. Each
//! artifact is plain text whose final three lines carry the execution
//! summary: a scenario count line and a step count line, each with
//! passed/failed/skipped sub-counts in parentheses, e.g.
//!
//! ```text
//! 3 scenarios (2 passed, 1 failed)
//! 12 steps (10 passed, 1 failed, 1 skipped)
//! ```
//!
//! Counts appearing earlier in the file are intentionally ignored; the
//! summary-in-last-3-lines convention is a format constraint, not a
//! heuristic.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::SystemTime;

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, CellAlignment, ContentArrangement, Table};
use regex::Regex;
use serde::Serialize;

use testfleet_common::defaults::RESULT_SUFFIX;
use testfleet_common::names::{run_result_dir, test_case_from_artifact_key};

/// How many trailing lines of an artifact carry the summary
const SUMMARY_TAIL_LINES: usize = 3;

static SCENARIOS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+scenarios?").expect("valid regex"));
static STEPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+steps?").expect("valid regex"));
static PASSED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+passed").expect("valid regex"));
static FAILED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+failed").expect("valid regex"));
static SKIPPED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+skipped").expect("valid regex"));

/// Pass/fail/skip counts for one count kind (scenarios or steps).
///
/// A sub-count absent from the summary line means zero occurrences of that
/// outcome, not an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

/// Parsed summary for one test case
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaseSummary {
    pub scenarios: OutcomeCounts,
    pub steps: OutcomeCounts,
}

impl CaseSummary {
    pub fn has_failures(&self) -> bool {
        self.scenarios.failed > 0
    }
}

/// Aggregated report for a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Per-test-case details, ascending by test-case name
    pub details: BTreeMap<String, CaseSummary>,
    /// Run-wide sums across all test cases
    pub totals: CaseSummary,
}

fn first_count(re: &Regex, line: &str) -> Option<u32> {
    re.captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn parse_outcomes(line: &str, total: u32) -> OutcomeCounts {
    OutcomeCounts {
        total,
        passed: first_count(&PASSED_RE, line).unwrap_or(0),
        failed: first_count(&FAILED_RE, line).unwrap_or(0),
        skipped: first_count(&SKIPPED_RE, line).unwrap_or(0),
    }
}

/// Parse one artifact's summary from its full text.
pub fn parse_summary(content: &str) -> CaseSummary {
    let mut summary = CaseSummary::default();

    let lines: Vec<&str> = content.lines().collect();
    let tail = lines.len().saturating_sub(SUMMARY_TAIL_LINES);

    for line in &lines[tail..] {
        if let Some(total) = first_count(&SCENARIOS_RE, line) {
            summary.scenarios = parse_outcomes(line, total);
        }
        if let Some(total) = first_count(&STEPS_RE, line) {
            summary.steps = parse_outcomes(line, total);
        }
    }

    summary
}

fn add(into: &mut OutcomeCounts, from: OutcomeCounts) {
    into.total += from.total;
    into.passed += from.passed;
    into.failed += from.failed;
    into.skipped += from.skipped;
}

/// Aggregate every locally stored artifact for an image id.
///
/// Recomputed on demand from the files on disk; running it twice over the
/// same artifacts yields identical output. Returns `None` when no artifacts
/// exist for the image id.
pub fn summarize(result_root: &Path, image_id: &str) -> Result<Option<RunReport>> {
    let dir = run_result_dir(result_root, image_id);
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut details = BTreeMap::new();
    let mut totals = CaseSummary::default();

    for entry in fs::read_dir(&dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else { continue };
        let Some(test_case) = test_case_from_artifact_key(name) else {
            continue;
        };

        let content = fs::read_to_string(entry.path())
            .with_context(|| format!("Failed to read artifact {}", entry.path().display()))?;
        let summary = parse_summary(&content);

        add(&mut totals.scenarios, summary.scenarios);
        add(&mut totals.steps, summary.steps);
        details.insert(test_case.to_string(), summary);
    }

    if details.is_empty() {
        return Ok(None);
    }

    Ok(Some(RunReport { details, totals }))
}

/// A run with results available locally
#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub image_id: String,
    pub modified: SystemTime,
}

/// List runs that have results under the result root, newest first.
pub fn available_reports(result_root: &Path) -> Result<Vec<ReportEntry>> {
    if !result_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(result_root)
        .with_context(|| format!("Failed to read {}", result_root.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(image_id) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let modified = entry.metadata()?.modified()?;
        entries.push(ReportEntry { image_id, modified });
    }

    entries.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(entries)
}

/// Render a report as a table, optionally restricted to failing test cases.
pub fn render_report(report: &RunReport, only_failed: bool) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Test Case"),
            Cell::new("Scenarios"),
            Cell::new("Passed"),
            Cell::new("Failed"),
            Cell::new("Steps"),
            Cell::new("Passed"),
            Cell::new("Failed"),
            Cell::new("Skipped"),
        ]);

    let numeric =
        |v: u32| -> Cell { Cell::new(v.to_string()).set_alignment(CellAlignment::Right) };

    for (test_case, summary) in &report.details {
        if only_failed && !summary.has_failures() {
            continue;
        }
        table.add_row(vec![
            Cell::new(test_case),
            numeric(summary.scenarios.total),
            numeric(summary.scenarios.passed),
            numeric(summary.scenarios.failed),
            numeric(summary.steps.total),
            numeric(summary.steps.passed),
            numeric(summary.steps.failed),
            numeric(summary.steps.skipped),
        ]);
    }

    table.add_row(vec![
        Cell::new("TOTAL"),
        numeric(report.totals.scenarios.total),
        numeric(report.totals.scenarios.passed),
        numeric(report.totals.scenarios.failed),
        numeric(report.totals.steps.total),
        numeric(report.totals.steps.passed),
        numeric(report.totals.steps.failed),
        numeric(report.totals.steps.skipped),
    ]);

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const IMAGE_ID: &str = "ami-report";

    fn write_artifact(root: &Path, test_case: &str, content: &str) {
        let dir = run_result_dir(root, IMAGE_ID);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{test_case}{RESULT_SUFFIX}")), content).unwrap();
    }

    #[test]
    fn parses_scenario_and_step_lines() {
        let content = "\
Feature: login
  lots of output above

3 scenarios (3 passed)
12 steps (10 passed, 2 failed)
0m4.32s
";
        let summary = parse_summary(content);
        assert_eq!(
            summary.scenarios,
            OutcomeCounts {
                total: 3,
                passed: 3,
                failed: 0,
                skipped: 0
            }
        );
        assert_eq!(
            summary.steps,
            OutcomeCounts {
                total: 12,
                passed: 10,
                failed: 2,
                skipped: 0
            }
        );
    }

    #[test]
    fn singular_forms_parse_too() {
        let summary = parse_summary("1 scenario (1 passed)\n1 step (1 skipped)\n");
        assert_eq!(summary.scenarios.total, 1);
        assert_eq!(summary.steps.total, 1);
        assert_eq!(summary.steps.skipped, 1);
    }

    #[test]
    fn counts_outside_the_final_three_lines_are_ignored() {
        let content = "\
9 scenarios (9 passed)
filler
filler
filler
2 scenarios (2 passed)
4 steps (4 passed)
done
";
        let summary = parse_summary(content);
        assert_eq!(summary.scenarios.total, 2);
        assert_eq!(summary.steps.total, 4);
    }

    #[test]
    fn missing_sub_counts_default_to_zero() {
        let summary = parse_summary("5 scenarios\n20 steps\n");
        assert_eq!(summary.scenarios.passed, 0);
        assert_eq!(summary.steps.failed, 0);
        assert_eq!(summary.steps.skipped, 0);
        assert_eq!(summary.scenarios.total, 5);
        assert_eq!(summary.steps.total, 20);
    }

    #[test]
    fn summarize_returns_none_without_artifacts() {
        let root = TempDir::new().unwrap();
        assert!(summarize(root.path(), IMAGE_ID).unwrap().is_none());

        // An empty directory is also "no results"
        fs::create_dir_all(run_result_dir(root.path(), IMAGE_ID)).unwrap();
        assert!(summarize(root.path(), IMAGE_ID).unwrap().is_none());
    }

    #[test]
    fn details_sort_ascending_by_test_case_name() {
        let root = TempDir::new().unwrap();
        write_artifact(root.path(), "b.feature", "1 scenario (1 passed)\n2 steps (2 passed)\n");
        write_artifact(root.path(), "a.feature", "1 scenario (1 failed)\n2 steps (2 failed)\n");

        let report = summarize(root.path(), IMAGE_ID).unwrap().unwrap();
        let names: Vec<_> = report.details.keys().cloned().collect();
        assert_eq!(names, vec!["a.feature", "b.feature"]);
    }

    #[test]
    fn totals_sum_across_test_cases() {
        let root = TempDir::new().unwrap();
        write_artifact(
            root.path(),
            "a.feature",
            "3 scenarios (2 passed, 1 failed)\n10 steps (8 passed, 1 failed, 1 skipped)\n",
        );
        write_artifact(
            root.path(),
            "b.feature",
            "2 scenarios (2 passed)\n6 steps (6 passed)\n",
        );

        let report = summarize(root.path(), IMAGE_ID).unwrap().unwrap();
        assert_eq!(report.totals.scenarios.total, 5);
        assert_eq!(report.totals.scenarios.passed, 4);
        assert_eq!(report.totals.scenarios.failed, 1);
        assert_eq!(report.totals.steps.total, 16);
        assert_eq!(report.totals.steps.passed, 14);
        assert_eq!(report.totals.steps.skipped, 1);
    }

    #[test]
    fn summarize_is_idempotent() {
        let root = TempDir::new().unwrap();
        write_artifact(
            root.path(),
            "a.feature",
            "3 scenarios (3 passed)\n12 steps (10 passed, 2 failed)\n",
        );

        let first = summarize(root.path(), IMAGE_ID).unwrap().unwrap();
        let second = summarize(root.path(), IMAGE_ID).unwrap().unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn non_artifact_files_are_skipped() {
        let root = TempDir::new().unwrap();
        write_artifact(root.path(), "a.feature", "1 scenario (1 passed)\n1 step (1 passed)\n");
        let dir = run_result_dir(root.path(), IMAGE_ID);
        fs::write(dir.join("notes.txt"), "9 scenarios (9 passed)\n").unwrap();

        let report = summarize(root.path(), IMAGE_ID).unwrap().unwrap();
        assert_eq!(report.details.len(), 1);
        assert_eq!(report.totals.scenarios.total, 1);
    }

    #[test]
    fn only_failed_filter_drops_passing_rows() {
        let root = TempDir::new().unwrap();
        write_artifact(
            root.path(),
            "bad.feature",
            "1 scenario (1 failed)\n3 steps (2 passed, 1 failed)\n",
        );
        write_artifact(root.path(), "good.feature", "1 scenario (1 passed)\n3 steps (3 passed)\n");

        let report = summarize(root.path(), IMAGE_ID).unwrap().unwrap();
        let rendered = render_report(&report, true).to_string();
        assert!(rendered.contains("bad.feature"));
        assert!(!rendered.contains("good.feature"));
        assert!(rendered.contains("TOTAL"));
    }

    #[test]
    fn available_reports_newest_first() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("ami-old")).unwrap();
        fs::create_dir_all(root.path().join("ami-new")).unwrap();

        // Bump the mtime of ami-new by touching a file inside it
        let newer = root.path().join("ami-new");
        fs::write(newer.join("x.result"), "").unwrap();
        filetime_bump(&newer);

        let entries = available_reports(root.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].image_id, "ami-new");
    }

    #[test]
    fn available_reports_empty_root() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("never-created");
        assert!(available_reports(&missing).unwrap().is_empty());
    }

    /// Make a directory's mtime strictly newer than its siblings.
    fn filetime_bump(dir: &Path) {
        let later = SystemTime::now() + std::time::Duration::from_secs(5);
        let file = fs::File::open(dir).unwrap();
        let _ = file.set_modified(later);
    }
}
