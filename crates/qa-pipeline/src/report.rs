//! Final pipeline report: thin aggregation over a finished run.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use coordination::changes::ComparisonSummary;
use coordination::quality::{QualityGateEngine, QualityGateEvaluation, QualitySummary, StageKind};
use coordination::versioning::{VersionStats, VersionStore};
use coordination::{analyze_quality_progression, ChangeTracker, QualityProgression};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::{ConvergenceCheck, PipelineState};
use crate::state_machine::PipelineNode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub success: bool,
    pub human_handoff: bool,
    pub escalated: bool,
    pub final_stage: PipelineNode,
    pub iterations_completed: u32,
    pub starting_version: String,
    pub final_version: String,
    pub transitions: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_processing_time_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionProgression {
    /// Versions produced by successful stage runs, in order
    pub versions_created: Vec<String>,
    /// Root-to-leaf lineage of the final version
    pub final_lineage: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_stats: Option<VersionStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_summary: Option<QualitySummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_evaluation: Option<QualityGateEvaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progression: Option<QualityProgression>,
    pub convergence_checks: Vec<ConvergenceCheck>,
}

/// Executions and scores of one stage across all iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePerformance {
    pub stage: StageKind,
    pub executions: usize,
    pub successes: usize,
    pub total_time_secs: f64,
    pub scores: Vec<f64>,
}

/// Before/after comparison of the starting and final versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonOverview {
    pub old_version: String,
    pub new_version: String,
    pub summary: ComparisonSummary,
    pub summary_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub workflow_id: String,
    pub content_source: String,
    pub generated_at: DateTime<Utc>,
    pub execution: ExecutionSummary,
    pub versions: VersionProgression,
    pub quality: QualityReport,
    pub stages: Vec<StagePerformance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonOverview>,
}

impl PipelineReport {
    /// Aggregate a finished run. Store lookups that fail are logged and
    /// left out of the report.
    pub fn build(state: &PipelineState, store: &VersionStore, engine: &QualityGateEngine) -> Self {
        let versions_created: Vec<String> = state
            .agent_results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.version_created.clone())
            .collect();

        let final_lineage = match store.lineage(&state.current_version) {
            Ok(lineage) => lineage,
            Err(e) => {
                warn!(version = %state.current_version, error = %e, "No lineage for final version");
                Vec::new()
            }
        };
        let store_stats = store
            .stats()
            .map_err(|e| warn!(error = %e, "Failed to read version stats"))
            .ok();

        let scored: Vec<(String, f64)> = state
            .agent_results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.quality_score.map(|s| (r.version_created.clone(), s)))
            .collect();

        let stages = StageKind::ALL
            .iter()
            .map(|&stage| {
                let runs: Vec<_> = state.agent_results.iter().filter(|r| r.stage == stage).collect();
                StagePerformance {
                    stage,
                    executions: runs.len(),
                    successes: runs.iter().filter(|r| r.success).count(),
                    total_time_secs: runs.iter().map(|r| r.processing_time_secs).sum(),
                    scores: runs.iter().filter_map(|r| r.quality_score).collect(),
                }
            })
            .collect();

        Self {
            workflow_id: state.workflow_id.clone(),
            content_source: state.content_source.clone(),
            generated_at: Utc::now(),
            execution: ExecutionSummary {
                success: state.success,
                human_handoff: state.human_handoff,
                escalated: state.escalated,
                final_stage: state.current_stage,
                iterations_completed: state.iterations_completed,
                starting_version: state.starting_version.clone(),
                final_version: state.current_version.clone(),
                transitions: state.transitions.len(),
                start_time: state.start_time,
                end_time: state.end_time,
                total_processing_time_secs: state.total_processing_time_secs,
            },
            versions: VersionProgression {
                versions_created,
                final_lineage,
                store_stats,
            },
            quality: QualityReport {
                final_summary: state
                    .quality_assessments
                    .last()
                    .map(|a| engine.quality_summary(a)),
                final_evaluation: state.quality_evaluations.last().cloned(),
                progression: analyze_quality_progression(&scored),
                convergence_checks: state.convergence_checks.clone(),
            },
            stages,
            comparison: None,
        }
    }

    /// Attach a before/after change report when both ends are stored and
    /// differ. Returns whether one was written.
    pub fn attach_comparison(
        &mut self,
        store: &VersionStore,
        tracker: &ChangeTracker,
    ) -> Result<bool> {
        let old = self.execution.starting_version.clone();
        let new = self.execution.final_version.clone();
        if old == new || !store.exists(&old)? || !store.exists(&new)? {
            return Ok(false);
        }

        let old_quality = store.get(&old)?.and_then(|r| r.metadata_f64("quality_score"));
        let new_quality = self
            .quality
            .final_summary
            .as_ref()
            .and_then(|s| s.overall_score);

        let (comparison, saved) = tracker
            .create_change_report(store, &old, &new, old_quality, new_quality)
            .with_context(|| format!("Failed to compare {old} with {new}"))?;
        self.comparison = Some(ComparisonOverview {
            old_version: old,
            new_version: new,
            summary: comparison.summary,
            summary_path: saved.summary_path,
        });
        Ok(true)
    }

    /// Write `<workflow_id>_report.json` and `<workflow_id>_report.md`.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report directory {}", dir.display()))?;
        let json_path = dir.join(format!("{}_report.json", self.workflow_id));
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(&json_path, json)
            .with_context(|| format!("Failed to write {}", json_path.display()))?;

        let md_path = dir.join(format!("{}_report.md", self.workflow_id));
        std::fs::write(&md_path, self.to_markdown())
            .with_context(|| format!("Failed to write {}", md_path.display()))?;

        info!(path = %json_path.display(), "Wrote pipeline report");
        Ok(json_path)
    }

    pub fn to_markdown(&self) -> String {
        let e = &self.execution;
        let mut md = String::new();
        let _ = writeln!(md, "# Pipeline Report: {}\n", self.workflow_id);
        let _ = writeln!(md, "- **Content source:** {}", self.content_source);
        let outcome = if e.human_handoff {
            "ready for human handoff"
        } else if e.escalated {
            "escalated"
        } else {
            "incomplete"
        };
        let _ = writeln!(md, "- **Outcome:** {} ({})", outcome, e.final_stage);
        let _ = writeln!(md, "- **Iterations:** {}", e.iterations_completed);
        let _ = writeln!(md, "- **Versions:** {} → {}", e.starting_version, e.final_version);
        if let Some(secs) = e.total_processing_time_secs {
            let _ = writeln!(md, "- **Processing time:** {secs:.1}s");
        }

        let _ = writeln!(md, "\n## Quality\n");
        match self.quality.final_summary.as_ref().and_then(|s| s.overall_score) {
            Some(score) => {
                let _ = writeln!(md, "Overall score: {score:.1}");
            }
            None => {
                let _ = writeln!(md, "Overall score: not measured");
            }
        }
        if let Some(eval) = &self.quality.final_evaluation {
            let _ = writeln!(md, "Final gate: {} ({})", eval.verdict, eval.gate_name);
            for reason in &eval.reasons {
                let _ = writeln!(md, "- {reason}");
            }
        }
        if let Some(p) = &self.quality.progression {
            let _ = writeln!(
                md,
                "\nTrend: {} ({:+.1} over {} versions, best {} at {:.1})",
                p.trend, p.overall_improvement, p.versions_analyzed, p.best_version.name, p.best_version.score
            );
        }

        let _ = writeln!(md, "\n## Stages\n");
        let _ = writeln!(md, "| Stage | Runs | Successes | Time (s) | Scores |");
        let _ = writeln!(md, "|---|---|---|---|---|");
        for s in &self.stages {
            let scores: Vec<String> = s.scores.iter().map(|v| format!("{v:.1}")).collect();
            let _ = writeln!(
                md,
                "| {} | {} | {} | {:.1} | {} |",
                s.stage,
                s.executions,
                s.successes,
                s.total_time_secs,
                scores.join(", ")
            );
        }

        if let Some(c) = &self.comparison {
            let _ = writeln!(md, "\n## Changes\n");
            let _ = writeln!(
                md,
                "{} → {}: {} modified, {} added, {} removed, {:.1}% average similarity",
                c.old_version,
                c.new_version,
                c.summary.files_modified.len(),
                c.summary.files_added.len(),
                c.summary.files_removed.len(),
                c.summary.average_similarity
            );
            let _ = writeln!(md, "\nSee `{}`", c.summary_path.display());
        }
        md
    }
}
