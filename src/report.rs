use std::io::Write;

use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;
use colored::Colorize;
use serde::Serialize;

use crate::branch::BranchStatus;
use crate::outcome::OperationOutcome;

// -----------------------------------------------------------------------------
// Types

/// Aggregate counters for one orchestration run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub total_branches: usize,
    pub total_repositories: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl RunSummary {
    /// Percentage of successful operations; 0.0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }
        self.successful_operations as f64 / self.total_operations as f64 * 100.0
    }
}

/// Everything that happened to one branch during a run.
#[derive(Debug, Clone, Serialize)]
pub struct BranchReport {
    pub branch: String,
    pub repository: String,
    pub operations: Vec<OperationOutcome>,
    pub status: Option<BranchStatus>,
    /// True iff every operation succeeded (vacuously true when none ran).
    pub success: bool,
}

impl BranchReport {
    pub fn new(
        branch: &str,
        repository: &str,
        operations: Vec<OperationOutcome>,
        status: Option<BranchStatus>,
    ) -> Self {
        let success = operations.iter().all(|op| op.success);
        Self {
            branch: branch.to_string(),
            repository: repository.to_string(),
            operations,
            status,
            success,
        }
    }
}

/// The complete result of one orchestration run. Assembled once, read-only
/// afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub summary: RunSummary,
    pub branches: Vec<BranchReport>,
    /// Repository-level failures that prevented any branch outcome.
    pub errors: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

// -----------------------------------------------------------------------------
// Report impl

impl Report {
    /// Fold the collected branch reports into a summary. The summary is only
    /// ever derived here, so its counters always match the branch data.
    pub fn assemble(
        branches: Vec<BranchReport>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        errors: Vec<String>,
    ) -> Self {
        let total_operations: usize = branches.iter().map(|b| b.operations.len()).sum();
        let successful_operations: usize = branches
            .iter()
            .map(|b| b.operations.iter().filter(|op| op.success).count())
            .sum();

        let mut repositories: Vec<&str> = branches.iter().map(|b| b.repository.as_str()).collect();
        repositories.sort_unstable();
        repositories.dedup();

        let summary = RunSummary {
            total_operations,
            successful_operations,
            failed_operations: total_operations - successful_operations,
            total_branches: branches.len(),
            total_repositories: repositories.len(),
            started_at,
            finished_at,
            duration_secs: (finished_at - started_at)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        };

        Self {
            summary,
            branches,
            errors,
            generated_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the human-readable summary block.
    pub fn render_summary(&self, out: &mut impl Write) -> std::io::Result<()> {
        let summary = &self.summary;

        let succeeded = format!("{} succeeded", summary.successful_operations);
        let failed = format!("{} failed", summary.failed_operations);
        writeln!(
            out,
            "{} {} operations, {}, {} ({:.1}%)",
            "Run summary:".bold(),
            summary.total_operations,
            if summary.failed_operations == 0 {
                succeeded.green()
            } else {
                succeeded.normal()
            },
            if summary.failed_operations > 0 {
                failed.red()
            } else {
                failed.normal()
            },
            summary.success_rate(),
        )?;
        writeln!(
            out,
            "Branches: {} across {} repositories",
            summary.total_branches, summary.total_repositories
        )?;
        writeln!(out, "Duration: {}", format_duration(summary.duration_secs))?;

        for branch in self.branches.iter().filter(|b| !b.success) {
            writeln!(
                out,
                "{} {}/{}",
                "✗".red(),
                branch.repository,
                branch.branch
            )?;
            for op in branch.operations.iter().filter(|op| !op.success) {
                writeln!(
                    out,
                    "  {}: {}",
                    op.kind,
                    op.error.as_deref().unwrap_or(&op.message)
                )?;
            }
        }

        for error in &self.errors {
            writeln!(out, "{} {}", "error:".red().bold(), error)?;
        }

        Ok(())
    }
}

/// Format a duration in seconds as a compact human-readable string.
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        return format!("{seconds:.1}s");
    }

    let minutes = (seconds / 60.0) as u64;
    let remaining_seconds = (seconds % 60.0) as u64;

    if minutes < 60 {
        return format!("{minutes}m {remaining_seconds}s");
    }

    let hours = minutes / 60;
    let remaining_minutes = minutes % 60;
    format!("{hours}h {remaining_minutes}m {remaining_seconds}s")
}
