//! Orchestrator: drives one document through the gated pipeline.
//!
//! ```text
//! initialization → content → format → visual → quality_assessment → completion
//!                     ↑   ↘ iteration ↙   ↘ escalation ↙                ↘ escalation
//!                     └─────────┘
//! ```
//!
//! Stage nodes never fail the run: a collaborator error becomes a failed
//! [`AgentResult`] and the normal gate logic routes it. Only version store
//! lookups, illegal transitions, and cancellation stop a run early.
//! Cancellation is observed between nodes; a running stage always finishes.

use std::sync::Arc;
use std::time::Instant;

use coordination::quality::{QualityGateEngine, StageKind};
use coordination::versioning::{SharedVersionStore, VersionError, VersionRecord};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::routing::{route_after_assessment, route_after_content, route_after_format, RouteDecision};
use crate::stages::{Stage, StageOutcome, StageRequest};
use crate::state::{AgentResult, ConvergenceCheck, NodeUpdate, PipelineState};
use crate::state_machine::{IllegalTransition, PipelineNode, StateMachine};

/// Error type for orchestrator runs
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// `state` holds everything recorded before `node` would have run.
    #[error("Run {workflow_id} cancelled before {node}")]
    Cancelled {
        workflow_id: String,
        node: PipelineNode,
        state: Box<PipelineState>,
    },

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error("Version store error: {0}")]
    Version(#[from] VersionError),
}

/// Base version name per stage.
fn stage_version_base(stage: StageKind) -> &'static str {
    match stage {
        StageKind::ContentReview => "v1_content_edited",
        StageKind::FormatOptimization => "v2_format_optimized",
        StageKind::VisualInspection => "v3_visual_inspected",
    }
}

/// Deterministic target version name for a stage at an iteration.
///
/// Iteration 0 uses the bare name; later iterations append `_iter{n+1}`.
/// A namespace, when set, prefixes the name so concurrent runs sharing a
/// store never collide.
pub fn version_name(stage: StageKind, iteration: u32, namespace: Option<&str>) -> String {
    let mut name = String::new();
    if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
        name.push_str(ns);
        name.push('_');
    }
    name.push_str(stage_version_base(stage));
    if iteration > 0 {
        name.push_str(&format!("_iter{}", iteration + 1));
    }
    name
}

/// The three stages of a pipeline.
#[derive(Clone)]
pub struct PipelineStages {
    pub content: Arc<dyn Stage>,
    pub format: Arc<dyn Stage>,
    pub visual: Arc<dyn Stage>,
}

/// Runs pipelines against one version store.
pub struct Orchestrator {
    store: SharedVersionStore,
    engine: QualityGateEngine,
    stages: PipelineStages,
    namespace: Option<String>,
}

impl Orchestrator {
    pub fn new(store: SharedVersionStore, engine: QualityGateEngine, stages: PipelineStages) -> Self {
        Self {
            store,
            engine,
            stages,
            namespace: None,
        }
    }

    /// Prefix every version name this orchestrator creates.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn store(&self) -> &SharedVersionStore {
        &self.store
    }

    pub fn engine(&self) -> &QualityGateEngine {
        &self.engine
    }

    /// Run one document from `starting_version` to a terminal node.
    ///
    /// The returned state has either `human_handoff` or `escalated` set.
    pub async fn run(
        &self,
        workflow_id: &str,
        content_source: &str,
        starting_version: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineState, OrchestratorError> {
        let mut state = PipelineState::new(workflow_id, content_source, starting_version);
        let mut machine = StateMachine::new();

        info!(
            workflow_id,
            content_source,
            starting_version,
            max_iterations = self.engine.thresholds().max_iterations,
            "Starting quality pipeline"
        );

        machine.advance(PipelineNode::ContentStage, Some("pipeline initialized"))?;
        state.current_stage = PipelineNode::ContentStage;

        while !machine.is_terminal() {
            let node = machine.current();
            if cancel.is_cancelled() {
                warn!(workflow_id, node = %node, "Pipeline run cancelled");
                state.transitions = machine.transitions().to_vec();
                return Err(OrchestratorError::Cancelled {
                    workflow_id: workflow_id.to_string(),
                    node,
                    state: Box::new(state),
                });
            }

            let (next, reason) = match node {
                PipelineNode::ContentStage => {
                    let update = self.stage_node(&*self.stages.content, &state).await?;
                    state.apply(update);
                    let decision = route_after_content(
                        &self.engine,
                        &state.agent_results,
                        state.iterations_completed,
                    );
                    record_decision(&mut state, decision)
                }
                PipelineNode::FormatStage => {
                    let update = self.stage_node(&*self.stages.format, &state).await?;
                    state.apply(update);
                    let decision = route_after_format(
                        &self.engine,
                        &state.agent_results,
                        state.iterations_completed,
                    );
                    record_decision(&mut state, decision)
                }
                PipelineNode::VisualStage => {
                    let update = self.stage_node(&*self.stages.visual, &state).await?;
                    state.apply(update);
                    (PipelineNode::QualityAssessment, None)
                }
                PipelineNode::QualityAssessment => {
                    let (update, decision) = self.assessment_node(&state);
                    state.apply(update);
                    let reason = decision.reason();
                    (decision.next, Some(reason))
                }
                PipelineNode::Iteration => {
                    let iterations = state.iterations_completed + 1;
                    info!(workflow_id, iteration = iterations, "Starting pipeline iteration");
                    state.apply(NodeUpdate {
                        iterations_completed: Some(iterations),
                        ..Default::default()
                    });
                    machine.set_iteration(iterations);
                    (PipelineNode::ContentStage, Some(format!("iteration {iterations}")))
                }
                PipelineNode::Initialization
                | PipelineNode::Completion
                | PipelineNode::Escalation => break,
            };

            machine.advance(next, reason.as_deref())?;
            state.current_stage = next;
        }

        state.apply(terminal_update(machine.current()));
        state.transitions = machine.transitions().to_vec();
        state.finish();

        info!(
            workflow_id,
            outcome = %state.current_stage,
            final_version = %state.current_version,
            iterations = state.iterations_completed,
            secs = ?state.total_processing_time_secs,
            history = %machine.summary(),
            "Quality pipeline finished"
        );
        Ok(state)
    }

    /// Run one stage: reuse a stored version of the target name, or invoke
    /// the collaborator and fold any failure into the result. Reused
    /// versions still go through the stage's post-invocation checks.
    async fn stage_node(
        &self,
        stage: &dyn Stage,
        state: &PipelineState,
    ) -> Result<NodeUpdate, OrchestratorError> {
        let kind = stage.kind();
        let target = version_name(kind, state.iterations_completed, self.namespace.as_deref());

        if let Some(record) = self.store.get(&target)? {
            info!(stage = %kind, version = %target, "Reusing stored version");
            let outcome = stage.recheck(cached_outcome(&record)).await;
            let notes = stage.notes(&outcome);
            return Ok(NodeUpdate {
                current_version: Some(target),
                agent_results: vec![outcome.into_result(kind)],
                context_notes: notes.into_iter().collect(),
                ..Default::default()
            });
        }

        let request = StageRequest {
            content_source: state.content_source.clone(),
            input_version: state.current_version.clone(),
            target_version: target.clone(),
            options: stage.options(&state.agent_context),
        };
        info!(
            stage = %kind,
            input = %request.input_version,
            target = %target,
            options = ?request.options,
            "Invoking stage"
        );

        let started = Instant::now();
        let invoked = stage.invoke(&request).await;
        let elapsed = started.elapsed().as_secs_f64();

        let mut outcome = match invoked {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(stage = %kind, target = %target, error = %e, "Stage invocation failed");
                return Ok(failed_update(AgentResult::failed(kind, &target, e.to_string(), elapsed)));
            }
        };
        if outcome.version_created.is_empty() {
            outcome.version_created = target.clone();
        }
        if outcome.processing_time_secs <= 0.0 {
            outcome.processing_time_secs = elapsed;
        }

        if !outcome.success {
            warn!(
                stage = %kind,
                error = ?outcome.error_message,
                "Stage reported failure"
            );
            return Ok(failed_update(outcome.into_result(kind)));
        }

        if !self.store.exists(&outcome.version_created)? {
            let message = format!(
                "Stage reported success but version {} is not in the store",
                outcome.version_created
            );
            error!(stage = %kind, version = %outcome.version_created, "{message}");
            return Ok(failed_update(AgentResult::failed(
                kind,
                &outcome.version_created,
                message,
                elapsed,
            )));
        }

        info!(
            stage = %kind,
            version = %outcome.version_created,
            score = ?outcome.quality_score,
            issues = outcome.issues_found.len(),
            secs = outcome.processing_time_secs,
            "Stage completed"
        );
        let notes = stage.notes(&outcome);
        Ok(NodeUpdate {
            current_version: Some(outcome.version_created.clone()),
            agent_results: vec![outcome.into_result(kind)],
            context_notes: notes.into_iter().collect(),
            ..Default::default()
        })
    }

    /// Overall gate plus the advisory convergence check.
    fn assessment_node(&self, state: &PipelineState) -> (NodeUpdate, RouteDecision) {
        let assessment = state.assessment();
        let (converged, improvement) = self
            .engine
            .check_improvement_convergence(&assessment, state.quality_assessments.last());
        if converged {
            info!(
                iteration = state.iterations_completed,
                improvement,
                "Quality improvement has plateaued"
            );
        }

        let decision = route_after_assessment(
            &self.engine,
            &state.agent_results,
            state.iterations_completed,
        );
        let update = NodeUpdate {
            quality_assessments: vec![assessment],
            quality_evaluations: vec![decision.evaluation.clone()],
            convergence_checks: vec![ConvergenceCheck {
                iteration: state.iterations_completed,
                converged,
                improvement,
            }],
            ..Default::default()
        };
        (update, decision)
    }
}

/// Result synthesized from a stored version instead of re-invoking.
fn cached_outcome(record: &VersionRecord) -> StageOutcome {
    let mut outcome = StageOutcome::succeeded(&record.name, record.metadata_f64("quality_score"));
    outcome.issues_found = crate::stages::metadata_strings(record.metadata.get("issues_found"));
    outcome.optimizations_applied =
        crate::stages::metadata_strings(record.metadata.get("optimizations_applied"));
    outcome.metadata = record.metadata.clone();
    outcome
}

fn failed_update(result: AgentResult) -> NodeUpdate {
    NodeUpdate {
        agent_results: vec![result],
        ..Default::default()
    }
}

fn record_decision(state: &mut PipelineState, decision: RouteDecision) -> (PipelineNode, Option<String>) {
    let reason = decision.reason();
    let next = decision.next;
    state.apply(NodeUpdate {
        quality_evaluations: vec![decision.evaluation],
        ..Default::default()
    });
    (next, Some(reason))
}

fn terminal_update(node: PipelineNode) -> NodeUpdate {
    match node {
        PipelineNode::Completion => NodeUpdate {
            success: Some(true),
            human_handoff: Some(true),
            ..Default::default()
        },
        _ => NodeUpdate {
            success: Some(false),
            escalated: Some(true),
            ..Default::default()
        },
    }
}
