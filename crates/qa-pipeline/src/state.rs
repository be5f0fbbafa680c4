//! Pipeline run state: the record threaded through every node.
//!
//! Nodes never mutate `PipelineState` directly. Each returns a [`NodeUpdate`]
//! describing what to append and what to replace, and the driver merges it.

use chrono::{DateTime, Utc};
use coordination::quality::{FormatComponents, QualityAssessment, QualityGateEvaluation, StageKind};
use serde::{Deserialize, Serialize};

use crate::state_machine::{PipelineNode, TransitionRecord};

/// Immutable record of one stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub stage: StageKind,
    pub success: bool,
    /// Set to the intended target version even when the stage failed.
    pub version_created: String,
    /// `None` means "not measured", never zero.
    pub quality_score: Option<f64>,
    pub processing_time_secs: f64,
    #[serde(default)]
    pub issues_found: Vec<String>,
    #[serde(default)]
    pub optimizations_applied: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AgentResult {
    /// Failed invocation: no score, the intended version, and the reason as
    /// both error message and issue.
    pub fn failed(stage: StageKind, target_version: &str, error: impl Into<String>, secs: f64) -> Self {
        let error = error.into();
        Self {
            stage,
            success: false,
            version_created: target_version.to_string(),
            quality_score: None,
            processing_time_secs: secs,
            issues_found: vec![error.clone()],
            optimizations_applied: Vec::new(),
            error_message: Some(error),
            metadata: serde_json::Value::Null,
        }
    }

    /// Format component scores reported in the metadata, if any.
    pub fn format_components(&self) -> FormatComponents {
        FormatComponents::from_metadata(&self.metadata)
    }
}

/// Rebuild a quality assessment from the full result history.
///
/// Results are applied in order, so the latest result of each stage wins and
/// earlier stages' scores stay visible to later gates.
pub fn assess(results: &[AgentResult]) -> QualityAssessment {
    let mut assessment = QualityAssessment::new();
    for result in results {
        let components = (result.stage == StageKind::FormatOptimization)
            .then(|| result.format_components());
        assessment.record_stage(
            result.stage,
            result.success,
            result.quality_score,
            &result.issues_found,
            components,
        );
    }
    assessment
}

/// Advisory notes left by the content stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentNotes {
    pub quality_score: Option<f64>,
    pub issues_found: Vec<String>,
    pub has_complex_tables: bool,
    pub readability_concerns: Vec<String>,
}

/// Advisory notes left by the format stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatNotes {
    pub quality_score: Option<f64>,
    pub structure_score: Option<f64>,
    pub typography_score: Option<f64>,
    pub typography_issues: Vec<String>,
    pub packages_used: Vec<String>,
    /// `None` when no render check ran
    pub render_succeeded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_error: Option<String>,
}

/// A note written by one stage for later stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ContextNote {
    Content(ContentNotes),
    Format(FormatNotes),
}

/// Key-merged side channel between stages. Absent notes are normal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentNotes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FormatNotes>,
}

impl AgentContext {
    /// Later notes replace earlier notes of the same stage.
    pub fn merge(&mut self, note: ContextNote) {
        match note {
            ContextNote::Content(notes) => self.content = Some(notes),
            ContextNote::Format(notes) => self.format = Some(notes),
        }
    }

    pub fn has_complex_tables(&self) -> bool {
        self.content.as_ref().is_some_and(|n| n.has_complex_tables)
    }

    pub fn typography_score(&self) -> Option<f64> {
        self.format.as_ref().and_then(|n| n.typography_score)
    }
}

/// Outcome of the advisory convergence check at one assessment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceCheck {
    pub iteration: u32,
    pub converged: bool,
    pub improvement: f64,
}

/// What a node asks the driver to merge into the state.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub current_version: Option<String>,
    pub iterations_completed: Option<u32>,
    pub agent_results: Vec<AgentResult>,
    pub quality_assessments: Vec<QualityAssessment>,
    pub quality_evaluations: Vec<QualityGateEvaluation>,
    pub convergence_checks: Vec<ConvergenceCheck>,
    pub context_notes: Vec<ContextNote>,
    pub success: Option<bool>,
    pub human_handoff: Option<bool>,
    pub escalated: Option<bool>,
}

/// The single mutable record of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub workflow_id: String,
    pub content_source: String,
    pub starting_version: String,

    pub current_version: String,
    pub current_stage: PipelineNode,
    pub iterations_completed: u32,

    pub success: bool,
    pub human_handoff: bool,
    pub escalated: bool,

    pub agent_results: Vec<AgentResult>,
    pub quality_assessments: Vec<QualityAssessment>,
    pub quality_evaluations: Vec<QualityGateEvaluation>,
    #[serde(default)]
    pub convergence_checks: Vec<ConvergenceCheck>,
    #[serde(default)]
    pub agent_context: AgentContext,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,

    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_processing_time_secs: Option<f64>,
}

impl PipelineState {
    pub fn new(workflow_id: &str, content_source: &str, starting_version: &str) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            content_source: content_source.to_string(),
            starting_version: starting_version.to_string(),
            current_version: starting_version.to_string(),
            current_stage: PipelineNode::Initialization,
            iterations_completed: 0,
            success: false,
            human_handoff: false,
            escalated: false,
            agent_results: Vec::new(),
            quality_assessments: Vec::new(),
            quality_evaluations: Vec::new(),
            convergence_checks: Vec::new(),
            agent_context: AgentContext::default(),
            transitions: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            total_processing_time_secs: None,
        }
    }

    /// Merge a node's update: lists append, scalars replace, notes key-merge.
    pub fn apply(&mut self, update: NodeUpdate) {
        if let Some(version) = update.current_version {
            self.current_version = version;
        }
        if let Some(iterations) = update.iterations_completed {
            self.iterations_completed = iterations;
        }
        self.agent_results.extend(update.agent_results);
        self.quality_assessments.extend(update.quality_assessments);
        self.quality_evaluations.extend(update.quality_evaluations);
        self.convergence_checks.extend(update.convergence_checks);
        for note in update.context_notes {
            self.agent_context.merge(note);
        }
        if let Some(success) = update.success {
            self.success = success;
        }
        if let Some(handoff) = update.human_handoff {
            self.human_handoff = handoff;
        }
        if let Some(escalated) = update.escalated {
            self.escalated = escalated;
        }
    }

    /// Assessment over every result so far.
    pub fn assessment(&self) -> QualityAssessment {
        assess(&self.agent_results)
    }

    pub fn is_finished(&self) -> bool {
        self.current_stage.is_terminal()
    }

    /// Stamp end time and total duration.
    pub fn finish(&mut self) {
        let end = Utc::now();
        let elapsed = end - self.start_time;
        self.end_time = Some(end);
        self.total_processing_time_secs = Some(elapsed.num_milliseconds() as f64 / 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(stage: StageKind, score: f64) -> AgentResult {
        AgentResult {
            stage,
            success: true,
            version_created: format!("{stage}_v"),
            quality_score: Some(score),
            processing_time_secs: 0.1,
            issues_found: vec![],
            optimizations_applied: vec![],
            error_message: None,
            metadata: json!({}),
        }
    }

    #[test]
    fn test_assess_uses_whole_history() {
        let results = vec![
            ok(StageKind::ContentReview, 84.0),
            ok(StageKind::FormatOptimization, 90.0),
        ];
        let a = assess(&results);
        assert_eq!(a.content_score, Some(84.0));
        assert_eq!(a.format_score, Some(90.0));
        assert_eq!(a.overall_score(), Some(87.0));
    }

    #[test]
    fn test_assess_latest_result_wins() {
        let results = vec![
            ok(StageKind::ContentReview, 70.0),
            ok(StageKind::ContentReview, 88.0),
        ];
        assert_eq!(assess(&results).content_score, Some(88.0));

        let results = vec![
            ok(StageKind::ContentReview, 88.0),
            AgentResult::failed(StageKind::ContentReview, "v1", "boom", 0.0),
        ];
        assert_eq!(assess(&results).content_score, None);
    }

    #[test]
    fn test_assess_reads_format_components() {
        let mut result = ok(StageKind::FormatOptimization, 92.0);
        result.metadata = json!({"format_analysis": {"structure_score": 21, "typography_score": 19}});
        let a = assess(&[result]);
        assert_eq!(a.format_components.structure, Some(21.0));
        assert_eq!(a.format_components.typography, Some(19.0));
        assert_eq!(a.format_components.best_practices, None);
    }

    #[test]
    fn test_failed_result_keeps_target_version() {
        let r = AgentResult::failed(StageKind::FormatOptimization, "v2_format_optimized", "exit 1", 1.5);
        assert!(!r.success);
        assert_eq!(r.version_created, "v2_format_optimized");
        assert_eq!(r.quality_score, None);
        assert_eq!(r.error_message.as_deref(), Some("exit 1"));
    }

    #[test]
    fn test_apply_appends_and_replaces() {
        let mut state = PipelineState::new("wf", "doc", "original");
        state.apply(NodeUpdate {
            current_version: Some("v1".into()),
            agent_results: vec![ok(StageKind::ContentReview, 80.0)],
            ..Default::default()
        });
        state.apply(NodeUpdate {
            agent_results: vec![ok(StageKind::FormatOptimization, 90.0)],
            escalated: Some(true),
            ..Default::default()
        });
        assert_eq!(state.current_version, "v1");
        assert_eq!(state.starting_version, "original");
        assert_eq!(state.agent_results.len(), 2);
        assert!(state.escalated);
        assert!(!state.human_handoff);
    }

    #[test]
    fn test_context_merge_overwrites_same_stage_only() {
        let mut ctx = AgentContext::default();
        assert!(!ctx.has_complex_tables());
        assert_eq!(ctx.typography_score(), None);

        ctx.merge(ContextNote::Content(ContentNotes {
            has_complex_tables: true,
            ..Default::default()
        }));
        ctx.merge(ContextNote::Format(FormatNotes {
            typography_score: Some(17.0),
            ..Default::default()
        }));
        ctx.merge(ContextNote::Content(ContentNotes::default()));

        assert!(!ctx.has_complex_tables());
        assert_eq!(ctx.typography_score(), Some(17.0));
    }

    #[test]
    fn test_state_serializes() {
        let mut state = PipelineState::new("wf", "doc", "original");
        state.finish();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["current_stage"], "initialization");
        assert!(json["total_processing_time_secs"].is_number());
    }
}
