//! `axle-cli` -- the `axle-kpi` reporting tool.
//!
//! Reads trace logs, aggregates KPIs, gates them against thresholds,
//! and optionally appends to a history store with trend detection.
//! All runnable logic lives here so it stays testable; `main` only
//! parses arguments and maps the outcome to a process exit code.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use axle_kpi::{
    check_quality, detect_trends, load_events, KpiAggregator, KpiHistory, KpiHistoryRecord,
    KpiThresholds,
};

/// Exit code when the quality gate fails.
pub const EXIT_VIOLATION: i32 = 2;

/// Aggregate automation trace logs into a KPI report.
#[derive(Debug, Parser)]
#[command(name = "axle-kpi", version, about = "Aggregate automation trace logs into a KPI report")]
pub struct Args {
    /// Trace files, or directories scanned for *.jsonl run logs
    #[arg(required = true)]
    pub traces: Vec<PathBuf>,

    /// Write the full JSON summary to this path
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// JSON file overriding the default thresholds (partial overrides allowed)
    #[arg(long)]
    pub thresholds: Option<PathBuf>,

    /// Append the summary to this history store and run trend detection
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Environment tag recorded in the history store
    #[arg(long, default_value = "dev")]
    pub env: String,

    /// Application tag recorded in the history store
    #[arg(long, default_value = "unknown")]
    pub app: String,

    /// Build tag recorded in the history store
    #[arg(long, default_value = "unknown")]
    pub build: String,

    /// After appending, keep only the newest N history records
    #[arg(long)]
    pub keep_history: Option<usize>,

    /// Report violations but always exit 0
    #[arg(long)]
    pub no_fail: bool,
}

/// Run the tool. Returns the process exit code: 0 clean, 2 when the
/// quality gate fails (unless `--no-fail`).
pub fn run(args: &Args) -> anyhow::Result<i32> {
    let (events, stats) = load_events(&args.traces).context("Failed to read trace input")?;

    let mut aggregator = KpiAggregator::new();
    for event in &events {
        aggregator.process(event);
    }
    let summary = aggregator.finalize();

    if let Some(out) = &args.out {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(out, json)
            .with_context(|| format!("Failed to write summary to {}", out.display()))?;
    }

    let thresholds = match &args.thresholds {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read thresholds from {}", path.display()))?;
            serde_json::from_str(&content).context("Invalid thresholds file")?
        }
        None => KpiThresholds::default(),
    };
    let violations = check_quality(&summary, &thresholds);

    println!(
        "tasks {} ({:.1}% ok) | steps {} ({:.1}% ok) | actions {} ({:.1}% ok, p90 {}ms) | {} file(s), {} line(s) skipped | {} violation(s)",
        summary.tasks.count,
        summary.tasks.success_rate * 100.0,
        summary.steps.count,
        summary.steps.success_rate * 100.0,
        summary.actions.base.count,
        summary.actions.base.success_rate * 100.0,
        summary.actions.base.p90_duration_ms,
        stats.files,
        stats.skipped_lines,
        violations.len(),
    );

    if !violations.is_empty() {
        eprintln!("Quality gate failed:");
        for violation in &violations {
            eprintln!("  - {violation}");
        }
    }

    if let Some(path) = &args.history {
        let history = KpiHistory::new(path);
        history.append(&KpiHistoryRecord::new(
            &args.env,
            &args.app,
            &args.build,
            summary,
        ))?;
        if let Some(n) = args.keep_history {
            history.retain_last(n)?;
        }

        // Trend alerts are advisory: stderr only, never the exit code.
        let alerts = detect_trends(&history.load()?);
        if !alerts.is_empty() {
            eprintln!("Trend anomalies:");
            for alert in &alerts {
                eprintln!("  - {alert}");
            }
        }
    }

    if !violations.is_empty() && !args.no_fail {
        return Ok(EXIT_VIOLATION);
    }
    Ok(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    fn write_trace(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        path
    }

    fn base_args(traces: Vec<PathBuf>) -> Args {
        Args {
            traces,
            out: None,
            thresholds: None,
            history: None,
            env: "test".to_string(),
            app: "app".to_string(),
            build: "0".to_string(),
            keep_history: None,
            no_fail: false,
        }
    }

    const CLEAN_RUN: &[&str] = &[
        r#"{"run_id":"r1","type":"action","action":"click","success":true,"attempt":0,"elapsed_ms":50,"layer":"dom"}"#,
        r#"{"run_id":"r1","type":"action","action":"type","success":true,"attempt":0,"elapsed_ms":30,"layer":"dom"}"#,
    ];

    const FAILING_RUN: &[&str] = &[
        r#"{"run_id":"r2","type":"action","action":"click","success":false,"attempt":0,"elapsed_ms":50,"layer":"pixel","fail_type":"MISCLICK"}"#,
    ];

    #[test]
    fn clean_traces_exit_zero() {
        let dir = tempfile::tempdir().unwrap();
        let trace = write_trace(dir.path(), "run.jsonl", CLEAN_RUN);
        let code = run(&base_args(vec![trace])).unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn violations_exit_two() {
        let dir = tempfile::tempdir().unwrap();
        let trace = write_trace(dir.path(), "run.jsonl", FAILING_RUN);
        let code = run(&base_args(vec![trace])).unwrap();
        assert_eq!(code, EXIT_VIOLATION);
    }

    #[test]
    fn no_fail_suppresses_the_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let trace = write_trace(dir.path(), "run.jsonl", FAILING_RUN);
        let mut args = base_args(vec![trace]);
        args.no_fail = true;
        assert_eq!(run(&args).unwrap(), 0);
    }

    #[test]
    fn out_file_holds_the_summary_document() {
        let dir = tempfile::tempdir().unwrap();
        let trace = write_trace(dir.path(), "run.jsonl", CLEAN_RUN);
        let out = dir.path().join("summary.json");
        let mut args = base_args(vec![trace]);
        args.out = Some(out.clone());
        run(&args).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(json["actions"]["count"], 2);
        assert_eq!(json["tasks"]["count"], 1);
    }

    #[test]
    fn thresholds_file_relaxes_the_gate() {
        let dir = tempfile::tempdir().unwrap();
        let trace = write_trace(dir.path(), "run.jsonl", FAILING_RUN);
        let thresholds = dir.path().join("thresholds.json");
        std::fs::write(
            &thresholds,
            r#"{"max_pixel_rate":1.0,"max_misclick_rate":1.0,"min_task_success_rate":0.0,"min_step_success_rate":0.0,"min_action_success_rate":0.0}"#,
        )
        .unwrap();

        let mut args = base_args(vec![trace]);
        args.thresholds = Some(thresholds);
        assert_eq!(run(&args).unwrap(), 0);
    }

    #[test]
    fn history_grows_and_is_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let trace = write_trace(dir.path(), "run.jsonl", CLEAN_RUN);
        let history_path = dir.path().join("history.jsonl");

        for _ in 0..4 {
            let mut args = base_args(vec![trace.clone()]);
            args.history = Some(history_path.clone());
            args.keep_history = Some(3);
            run(&args).unwrap();
        }

        let records = KpiHistory::new(&history_path).load().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].env, "test");
    }

    #[test]
    fn unreadable_input_is_an_error() {
        let missing = PathBuf::from("/definitely/not/here.jsonl");
        assert!(run(&base_args(vec![missing])).is_err());
    }
}
