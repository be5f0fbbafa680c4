//! Conditional routing: gate verdicts mapped to the next pipeline node.
//!
//! Every routing function rebuilds the assessment from the full result
//! history, asks the gate engine for a verdict, and picks an edge. The
//! iteration ceiling is the only budget; convergence is reported but never
//! consulted here.

use coordination::quality::{GateVerdict, QualityGateEngine, QualityGateEvaluation, StageKind};

use crate::state::{assess, AgentResult};
use crate::state_machine::PipelineNode;

/// A routing choice together with the evaluation that produced it.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub next: PipelineNode,
    pub evaluation: QualityGateEvaluation,
}

impl RouteDecision {
    /// Short human-readable reason for the transition log.
    pub fn reason(&self) -> String {
        let score = self
            .evaluation
            .score
            .map(|s| format!("{s:.1}"))
            .unwrap_or_else(|| "n/a".to_string());
        format!("{} {} (score {})", self.evaluation.gate_name, self.evaluation.verdict, score)
    }
}

/// Route after the content stage: PASS goes on to format.
pub fn route_after_content(
    engine: &QualityGateEngine,
    results: &[AgentResult],
    iterations_completed: u32,
) -> RouteDecision {
    route_after_stage(
        engine,
        results,
        StageKind::ContentReview,
        PipelineNode::FormatStage,
        iterations_completed,
    )
}

/// Route after the format stage: PASS goes on to visual inspection.
pub fn route_after_format(
    engine: &QualityGateEngine,
    results: &[AgentResult],
    iterations_completed: u32,
) -> RouteDecision {
    route_after_stage(
        engine,
        results,
        StageKind::FormatOptimization,
        PipelineNode::VisualStage,
        iterations_completed,
    )
}

fn route_after_stage(
    engine: &QualityGateEngine,
    results: &[AgentResult],
    stage: StageKind,
    on_pass: PipelineNode,
    iterations_completed: u32,
) -> RouteDecision {
    let assessment = assess(results);
    let evaluation = engine.evaluate_stage_gate(&assessment, stage);
    let max = engine.thresholds().max_iterations;

    let next = match evaluation.verdict {
        GateVerdict::Pass => on_pass,
        GateVerdict::Iterate => iterate_or_escalate(iterations_completed, max),
        GateVerdict::Fail | GateVerdict::Escalate => PipelineNode::Escalation,
    };

    tracing::info!(
        gate = %evaluation.gate_name,
        verdict = %evaluation.verdict,
        score = ?evaluation.score,
        next = %next,
        iteration = iterations_completed,
        "Stage gate routed"
    );

    RouteDecision { next, evaluation }
}

/// Route after the overall assessment: PASS completes the run.
pub fn route_after_assessment(
    engine: &QualityGateEngine,
    results: &[AgentResult],
    iterations_completed: u32,
) -> RouteDecision {
    let assessment = assess(results);
    let evaluation = engine.evaluate_overall_gate(&assessment, iterations_completed);
    let max = engine.thresholds().max_iterations;

    let next = match evaluation.verdict {
        GateVerdict::Pass => PipelineNode::Completion,
        GateVerdict::Iterate => iterate_or_escalate(iterations_completed, max),
        GateVerdict::Fail | GateVerdict::Escalate => PipelineNode::Escalation,
    };

    tracing::info!(
        verdict = %evaluation.verdict,
        score = ?evaluation.score,
        next_action = ?evaluation.next_action,
        next = %next,
        iteration = iterations_completed,
        "Overall gate routed"
    );

    RouteDecision { next, evaluation }
}

fn iterate_or_escalate(iterations_completed: u32, max_iterations: u32) -> PipelineNode {
    if iterations_completed < max_iterations {
        PipelineNode::Iteration
    } else {
        PipelineNode::Escalation
    }
}
