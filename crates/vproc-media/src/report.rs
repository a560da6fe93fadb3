//! Pipeline completion report parsing and the success verdict.
//!
//! The pipeline prints a machine-parseable JSON line
//! `{"success": bool, "message": string}` on completion. A run succeeds only
//! with exit code 0, a success report, no error marker in the combined
//! output, and at least one produced artifact; everything else is failure
//! regardless of exit code.

use serde::{Deserialize, Serialize};

use crate::command::PipelineOutput;
use crate::error::PipelineError;

// Case-insensitive marker that flags a failed run even on a clean exit.
const ERROR_MARKER: &str = "error:";

/// Machine-parseable completion line printed by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReport {
    /// Whether the pipeline considers the run successful
    pub success: bool,
    /// Human-readable outcome message
    #[serde(default)]
    pub message: String,
}

/// Scan stdout (last line first) for the completion report.
pub fn parse_report(stdout: &str) -> Option<CompletionReport> {
    stdout.lines().rev().find_map(|line| {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    })
}

/// First line of the combined output carrying the error marker, if any.
pub fn find_error_marker(output: &PipelineOutput) -> Option<String> {
    output
        .combined()
        .lines()
        .find(|line| line.to_lowercase().contains(ERROR_MARKER))
        .map(str::to_string)
}

/// Decide whether a finished run succeeded.
///
/// `artifacts` is the number of files found in the output directory after
/// the run.
pub fn evaluate(
    output: &PipelineOutput,
    artifacts: usize,
) -> Result<CompletionReport, PipelineError> {
    if let Some(line) = find_error_marker(output) {
        return Err(PipelineError::ErrorMarker(line));
    }

    let report = parse_report(&output.stdout).ok_or(PipelineError::MissingReport)?;

    if output.exit_code != Some(0) {
        return Err(PipelineError::NonZeroExit {
            code: output.exit_code,
            detail: stderr_tail(&output.stderr),
        });
    }

    if !report.success {
        return Err(PipelineError::ReportedFailure(report.message));
    }

    if artifacts == 0 {
        return Err(PipelineError::NoArtifacts);
    }

    Ok(report)
}

fn stderr_tail(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no stderr output")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: Option<i32>, stdout: &str, stderr: &str) -> PipelineOutput {
        PipelineOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_parse_report_takes_last_json_line() {
        let stdout = "processing scene 1\n{\"success\": false, \"message\": \"partial\"}\n{\"success\": true, \"message\": \"done\"}\n";
        let report = parse_report(stdout).unwrap();
        assert!(report.success);
        assert_eq!(report.message, "done");
    }

    #[test]
    fn test_successful_run() {
        let out = output(Some(0), "{\"success\": true, \"message\": \"done\"}", "");
        let report = evaluate(&out, 3).unwrap();
        assert_eq!(report.message, "done");
    }

    #[test]
    fn test_nonzero_exit_fails() {
        let out = output(
            Some(2),
            "{\"success\": true, \"message\": \"done\"}",
            "segfault in scaler",
        );
        let err = evaluate(&out, 3).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::NonZeroExit { code: Some(2), .. }
        ));
    }

    #[test]
    fn test_error_marker_overrides_clean_exit() {
        let out = output(
            Some(0),
            "{\"success\": true, \"message\": \"done\"}",
            "ERROR: codec not found",
        );
        let err = evaluate(&out, 3).unwrap_err();
        assert!(matches!(err, PipelineError::ErrorMarker(_)));
    }

    #[test]
    fn test_missing_report_fails_clean_exit() {
        let out = output(Some(0), "all good, trust me", "");
        let err = evaluate(&out, 3).unwrap_err();
        assert!(matches!(err, PipelineError::MissingReport));
    }

    #[test]
    fn test_reported_failure() {
        let out = output(
            Some(0),
            "{\"success\": false, \"message\": \"no scenes detected\"}",
            "",
        );
        let err = evaluate(&out, 3).unwrap_err();
        match err {
            PipelineError::ReportedFailure(msg) => assert_eq!(msg, "no scenes detected"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_zero_artifacts_fails() {
        let out = output(Some(0), "{\"success\": true, \"message\": \"done\"}", "");
        let err = evaluate(&out, 0).unwrap_err();
        assert!(matches!(err, PipelineError::NoArtifacts));
    }
}
