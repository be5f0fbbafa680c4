//! Run telemetry: one JSON line per finished pipeline run.
//!
//! Appended to `.qa-telemetry.jsonl` (path configurable). Telemetry is
//! best-effort: write failures are logged and never fail a run.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::PipelineState;
use crate::state_machine::PipelineNode;

/// Per-stage invocation counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageCounts {
    pub invocations: usize,
    pub failures: usize,
}

/// Flat summary of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTelemetry {
    pub run_id: String,
    pub workflow_id: String,
    pub content_source: String,
    pub outcome: PipelineNode,
    pub human_handoff: bool,
    pub escalated: bool,
    pub iterations_completed: u32,
    pub final_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
    pub stage_invocations: StageCounts,
    pub transitions: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<f64>,
}

impl RunTelemetry {
    pub fn from_state(state: &PipelineState) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            workflow_id: state.workflow_id.clone(),
            content_source: state.content_source.clone(),
            outcome: state.current_stage,
            human_handoff: state.human_handoff,
            escalated: state.escalated,
            iterations_completed: state.iterations_completed,
            final_version: state.current_version.clone(),
            final_score: state
                .quality_assessments
                .last()
                .and_then(|a| a.overall_score()),
            stage_invocations: StageCounts {
                invocations: state.agent_results.len(),
                failures: state.agent_results.iter().filter(|r| !r.success).count(),
            },
            transitions: state.transitions.len(),
            started_at: state.start_time,
            elapsed_secs: state.total_processing_time_secs,
        }
    }
}

/// Append run telemetry to a JSONL file.
pub fn append_telemetry(telemetry: &RunTelemetry, path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Failed to create telemetry directory: {e}");
            return;
        }
    }
    match serde_json::to_string(telemetry) {
        Ok(json) => {
            use std::io::Write;
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append telemetry: {e}");
                    } else {
                        info!(path = %path.display(), "Appended run telemetry");
                    }
                }
                Err(e) => warn!("Failed to open telemetry file: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize telemetry: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AgentResult, NodeUpdate};
    use coordination::quality::StageKind;

    #[test]
    fn test_append_telemetry_writes_one_line_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/.qa-telemetry.jsonl");

        let mut state = PipelineState::new("wf-9", "doc", "original");
        state.apply(NodeUpdate {
            agent_results: vec![AgentResult::failed(StageKind::ContentReview, "v1", "boom", 0.2)],
            escalated: Some(true),
            ..Default::default()
        });
        state.finish();

        let telemetry = RunTelemetry::from_state(&state);
        assert_eq!(telemetry.stage_invocations.failures, 1);
        assert_eq!(telemetry.final_score, None);

        append_telemetry(&telemetry, &path);
        append_telemetry(&RunTelemetry::from_state(&state), &path);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: RunTelemetry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.workflow_id, "wf-9");
        assert!(first.escalated);
        assert_ne!(first.run_id, serde_json::from_str::<RunTelemetry>(lines[1]).unwrap().run_id);
    }
}
