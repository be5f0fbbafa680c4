//! Quality Gate Engine: Deterministic pass/iterate/escalate decisions
//!
//! Consumes a `QualityAssessment` and the configured `QualityThresholds` and
//! produces immutable `QualityGateEvaluation`s. The engine holds no state
//! beyond its thresholds; evaluation history belongs to the caller.

use crate::quality::assessment::{QualityAssessment, StageKind};
use crate::quality::thresholds::QualityThresholds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Issue prefix recorded when a stage's output failed to render.
///
/// A stage carrying this issue never passes its gate, whatever its score.
pub const RENDER_FAILURE_MARKER: &str = "RENDER_FAILED:";

/// Gate verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateVerdict {
    /// Quality meets the gate
    Pass,
    /// Nothing to evaluate (score not measured)
    Fail,
    /// Below threshold; run the stage again
    Iterate,
    /// Hand to a human
    Escalate,
}

impl std::fmt::Display for GateVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Iterate => write!(f, "iterate"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

/// Reporting tier of a PASS. Never changes the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassTier {
    Acceptable,
    Good,
    Excellent,
}

impl std::fmt::Display for PassTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acceptable => write!(f, "Acceptable"),
            Self::Good => write!(f, "Good"),
            Self::Excellent => write!(f, "Excellent"),
        }
    }
}

/// Recommended next action attached to an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    RunContentReview,
    RunFormatOptimization,
    RunVisualInspection,
    ProceedToFormat,
    ProceedToVisual,
    ProceedToAssessment,
    StartPipeline,
    IteratePipeline,
    /// Ready for human review now
    HumanHandoff,
    /// Budget exhausted but quality acceptable
    HumanReview,
    /// Budget exhausted and quality below target
    HumanEscalation,
}

impl NextAction {
    fn rerun(stage: StageKind) -> Self {
        match stage {
            StageKind::ContentReview => Self::RunContentReview,
            StageKind::FormatOptimization => Self::RunFormatOptimization,
            StageKind::VisualInspection => Self::RunVisualInspection,
        }
    }

    fn proceed_after(stage: StageKind) -> Self {
        match stage {
            StageKind::ContentReview => Self::ProceedToFormat,
            StageKind::FormatOptimization => Self::ProceedToVisual,
            StageKind::VisualInspection => Self::ProceedToAssessment,
        }
    }
}

/// Result of evaluating one gate. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateEvaluation {
    pub gate_name: String,
    pub verdict: GateVerdict,
    pub score: Option<f64>,
    pub threshold: Option<f64>,
    /// Set on PASS only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<PassTier>,
    pub reasons: Vec<String>,
    pub recommendations: Vec<String>,
    pub next_action: NextAction,
    pub evaluated_at: DateTime<Utc>,
}

impl QualityGateEvaluation {
    fn new(
        gate_name: &str,
        verdict: GateVerdict,
        score: Option<f64>,
        threshold: f64,
        next_action: NextAction,
    ) -> Self {
        Self {
            gate_name: gate_name.to_string(),
            verdict,
            score,
            threshold: Some(threshold),
            tier: None,
            reasons: Vec::new(),
            recommendations: Vec::new(),
            next_action,
            evaluated_at: Utc::now(),
        }
    }

    fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    fn recommend(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }

    pub fn is_pass(&self) -> bool {
        self.verdict == GateVerdict::Pass
    }
}

/// Per-stage thresholds resolved from `QualityThresholds`.
struct StageLimits {
    minimum: f64,
    good: f64,
    excellent: f64,
    max_issues: usize,
}

/// Compact, report-friendly view of an assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub overall_score: Option<f64>,
    pub assessed_at: DateTime<Utc>,
    pub content: ComponentSummary,
    pub format: ComponentSummary,
    pub visual: ComponentSummary,
    pub format_components: crate::quality::assessment::FormatComponents,
    pub content_passes: bool,
    pub format_passes: bool,
    pub overall_passes: bool,
    pub ready_for_handoff: bool,
}

/// Score and first few issues of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSummary {
    pub score: Option<f64>,
    pub issues_count: usize,
    pub issues: Vec<String>,
}

/// Issues shown per component in a summary.
const SUMMARY_ISSUE_LIMIT: usize = 5;

/// The Quality Gate Engine: pure functions over thresholds.
#[derive(Debug, Clone, Default)]
pub struct QualityGateEngine {
    thresholds: QualityThresholds,
}

impl QualityGateEngine {
    /// Create an engine with default thresholds
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom thresholds
    pub fn with_thresholds(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    fn limits(&self, stage: StageKind) -> StageLimits {
        let t = &self.thresholds;
        match stage {
            StageKind::ContentReview => StageLimits {
                minimum: t.content_minimum,
                good: t.content_good,
                excellent: t.content_excellent,
                max_issues: t.max_content_issues,
            },
            StageKind::FormatOptimization => StageLimits {
                minimum: t.format_minimum,
                good: t.format_good,
                excellent: t.format_excellent,
                max_issues: t.max_format_issues,
            },
            StageKind::VisualInspection => StageLimits {
                minimum: t.visual_minimum,
                good: t.visual_good,
                excellent: t.visual_excellent,
                max_issues: t.max_visual_issues,
            },
        }
    }

    /// Evaluate the gate for a single stage.
    ///
    /// Order of checks: score present, render failure, minimum score,
    /// format component minimums, issue volume. The first failing check
    /// decides; otherwise PASS with a reporting tier.
    pub fn evaluate_stage_gate(
        &self,
        assessment: &QualityAssessment,
        stage: StageKind,
    ) -> QualityGateEvaluation {
        let gate = stage.gate_name();
        let limits = self.limits(stage);

        let score = match assessment.score_for(stage) {
            Some(score) => score,
            None => {
                return QualityGateEvaluation::new(
                    gate,
                    GateVerdict::Fail,
                    None,
                    limits.minimum,
                    NextAction::rerun(stage),
                )
                .reason(format!("{} score not available", stage))
                .recommend(format!("Run {}", stage));
            }
        };

        let iterate = |reason: String, recommendation: String| {
            QualityGateEvaluation::new(
                gate,
                GateVerdict::Iterate,
                Some(score),
                limits.minimum,
                NextAction::rerun(stage),
            )
            .reason(reason)
            .recommend(recommendation)
        };

        let issues = assessment.issues_for(stage);

        if let Some(failure) = issues
            .iter()
            .find(|issue| issue.starts_with(RENDER_FAILURE_MARKER))
        {
            return iterate(
                format!("Output failed to render: {}", failure),
                "Fix rendering errors before re-evaluating quality".to_string(),
            );
        }

        if score < limits.minimum {
            return iterate(
                format!(
                    "{} score {} below minimum {}",
                    stage, score, limits.minimum
                ),
                format!("Run {} again to raise the score", stage),
            );
        }

        if stage == StageKind::FormatOptimization {
            let below = self.components_below_minimum(assessment);
            if !below.is_empty() {
                return iterate(
                    format!("Component scores below minimum: {}", below.join(", ")),
                    "Improve format component scores".to_string(),
                );
            }
        }

        if issues.len() > limits.max_issues {
            return iterate(
                format!(
                    "Too many {} issues: {} > {}",
                    stage,
                    issues.len(),
                    limits.max_issues
                ),
                format!("Address remaining {} issues", stage),
            );
        }

        let tier = if score >= limits.excellent {
            PassTier::Excellent
        } else if score >= limits.good {
            PassTier::Good
        } else {
            PassTier::Acceptable
        };

        let mut evaluation = QualityGateEvaluation::new(
            gate,
            GateVerdict::Pass,
            Some(score),
            limits.minimum,
            NextAction::proceed_after(stage),
        )
        .reason(format!("{} {} quality: {}", tier, stage, score))
        .recommend(format!("{} quality meets standards", stage));
        evaluation.tier = Some(tier);
        evaluation
    }

    fn components_below_minimum(&self, assessment: &QualityAssessment) -> Vec<String> {
        let t = &self.thresholds;
        let c = &assessment.format_components;
        [
            ("Structure", c.structure, t.format_structure_minimum),
            ("Typography", c.typography, t.format_typography_minimum),
            (
                "Tables/Figures",
                c.tables_figures,
                t.format_tables_figures_minimum,
            ),
            (
                "Best Practices",
                c.best_practices,
                t.format_best_practices_minimum,
            ),
        ]
        .into_iter()
        .filter_map(|(name, value, minimum)| match value {
            Some(v) if v < minimum => Some(format!("{}: {}/{}", name, v, minimum)),
            _ => None,
        })
        .collect()
    }

    /// Evaluate the overall gate for the final routing decision.
    ///
    /// Reaching the iteration ceiling always yields ESCALATE, whatever the
    /// score; only `next_action` and the reasons tell "good enough for a
    /// human" apart from "ran out of budget".
    pub fn evaluate_overall_gate(
        &self,
        assessment: &QualityAssessment,
        iteration_count: u32,
    ) -> QualityGateEvaluation {
        let t = &self.thresholds;
        const GATE: &str = "overall_quality";

        let overall = match assessment.overall_score() {
            Some(score) => score,
            None => {
                return QualityGateEvaluation::new(
                    GATE,
                    GateVerdict::Fail,
                    None,
                    t.overall_target,
                    NextAction::StartPipeline,
                )
                .reason("No quality scores available")
                .recommend("Run the complete pipeline");
            }
        };

        if iteration_count >= t.max_iterations {
            let base = QualityGateEvaluation::new(
                GATE,
                GateVerdict::Escalate,
                Some(overall),
                t.overall_target,
                NextAction::HumanReview,
            )
            .reason(format!("Maximum iterations reached: {}", iteration_count));

            return if overall >= t.overall_target {
                base.recommend(
                    "Quality acceptable despite max iterations - proceed with human review",
                )
            } else {
                let mut e = base.recommend(
                    "Quality below target at max iterations - escalate to human",
                );
                e.next_action = NextAction::HumanEscalation;
                e
            };
        }

        if overall >= t.human_handoff_threshold {
            let mut e = QualityGateEvaluation::new(
                GATE,
                GateVerdict::Pass,
                Some(overall),
                t.human_handoff_threshold,
                NextAction::HumanHandoff,
            )
            .reason(format!("Excellent overall quality: {}", overall))
            .recommend("Quality exceeds handoff threshold - ready for immediate human handoff");
            e.tier = Some(PassTier::Excellent);
            return e;
        }

        if overall >= t.overall_target {
            let mut e = QualityGateEvaluation::new(
                GATE,
                GateVerdict::Pass,
                Some(overall),
                t.overall_target,
                NextAction::HumanHandoff,
            )
            .reason(format!(
                "Good overall quality: {} (meets target, below handoff threshold {})",
                overall, t.human_handoff_threshold
            ))
            .recommend("Quality meets target - ready for human review");
            e.tier = Some(PassTier::Good);
            return e;
        }

        let mut e = QualityGateEvaluation::new(
            GATE,
            GateVerdict::Iterate,
            Some(overall),
            t.overall_target,
            NextAction::IteratePipeline,
        )
        .reason(format!(
            "Overall quality {} below target {}",
            overall, t.overall_target
        ));
        if matches!(assessment.content_score, Some(s) if s < t.content_good) {
            e = e.recommend("Improve content quality");
        }
        if matches!(assessment.format_score, Some(s) if s < t.format_good) {
            e = e.recommend("Improve format quality");
        }
        if matches!(assessment.visual_score, Some(s) if s < t.visual_good) {
            e = e.recommend("Improve visual quality");
        }
        e
    }

    /// Check whether score improvement has plateaued.
    ///
    /// Returns `(converged, improvement)`. A regression (negative
    /// improvement) also counts as converged. Without a previous assessment,
    /// or without an overall score on either side, returns `(false, 0.0)`.
    pub fn check_improvement_convergence(
        &self,
        current: &QualityAssessment,
        previous: Option<&QualityAssessment>,
    ) -> (bool, f64) {
        let (current, previous) = match (
            current.overall_score(),
            previous.and_then(QualityAssessment::overall_score),
        ) {
            (Some(c), Some(p)) => (c, p),
            _ => return (false, 0.0),
        };

        let improvement = current - previous;
        (improvement < self.thresholds.convergence_threshold, improvement)
    }

    /// Summarize an assessment for reports.
    pub fn quality_summary(&self, assessment: &QualityAssessment) -> QualitySummary {
        let t = &self.thresholds;
        let overall = assessment.overall_score();
        let component = |stage: StageKind| {
            let issues = assessment.issues_for(stage);
            ComponentSummary {
                score: assessment.score_for(stage),
                issues_count: issues.len(),
                issues: issues.iter().take(SUMMARY_ISSUE_LIMIT).cloned().collect(),
            }
        };

        QualitySummary {
            overall_score: overall,
            assessed_at: assessment.assessed_at,
            content: component(StageKind::ContentReview),
            format: component(StageKind::FormatOptimization),
            visual: component(StageKind::VisualInspection),
            format_components: assessment.format_components,
            content_passes: matches!(assessment.content_score, Some(s) if s >= t.content_minimum),
            format_passes: matches!(assessment.format_score, Some(s) if s >= t.format_minimum),
            overall_passes: matches!(overall, Some(s) if s >= t.overall_target),
            ready_for_handoff: matches!(overall, Some(s) if s >= t.human_handoff_threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::assessment::FormatComponents;

    fn content(score: f64, issues: usize) -> QualityAssessment {
        QualityAssessment {
            content_score: Some(score),
            content_issues: (0..issues).map(|i| format!("issue {i}")).collect(),
            ..QualityAssessment::new()
        }
    }

    fn format(score: f64, components: FormatComponents, issues: Vec<String>) -> QualityAssessment {
        QualityAssessment {
            format_score: Some(score),
            format_components: components,
            format_issues: issues,
            ..QualityAssessment::new()
        }
    }

    fn passing_components() -> FormatComponents {
        FormatComponents {
            structure: Some(24.0),
            typography: Some(22.0),
            tables_figures: Some(23.0),
            best_practices: Some(21.0),
        }
    }

    #[test]
    fn test_content_pass_at_82() {
        let engine = QualityGateEngine::new();
        let e = engine.evaluate_stage_gate(&content(82.0, 0), StageKind::ContentReview);
        assert_eq!(e.verdict, GateVerdict::Pass);
        assert_eq!(e.tier, Some(PassTier::Acceptable));
        assert_eq!(e.next_action, NextAction::ProceedToFormat);
        assert_eq!(e.threshold, Some(80.0));
    }

    #[test]
    fn test_content_iterate_at_75() {
        let engine = QualityGateEngine::new();
        let e = engine.evaluate_stage_gate(&content(75.0, 0), StageKind::ContentReview);
        assert_eq!(e.verdict, GateVerdict::Iterate);
        assert_eq!(e.next_action, NextAction::RunContentReview);
        assert!(e.reasons[0].contains("below minimum"));
    }

    #[test]
    fn test_missing_score_fails() {
        let engine = QualityGateEngine::new();
        for stage in StageKind::ALL {
            let e = engine.evaluate_stage_gate(&QualityAssessment::new(), stage);
            assert_eq!(e.verdict, GateVerdict::Fail, "stage {stage}");
            assert!(e.score.is_none());
        }
    }

    #[test]
    fn test_zero_score_is_evaluated_not_failed() {
        let engine = QualityGateEngine::new();
        let e = engine.evaluate_stage_gate(&content(0.0, 0), StageKind::ContentReview);
        assert_eq!(e.verdict, GateVerdict::Iterate);
        assert_eq!(e.score, Some(0.0));
    }

    #[test]
    fn test_issue_volume_forces_iterate_above_minimum() {
        let engine = QualityGateEngine::new();
        let e = engine.evaluate_stage_gate(&content(95.0, 6), StageKind::ContentReview);
        assert_eq!(e.verdict, GateVerdict::Iterate);
        assert!(e.reasons[0].contains("Too many"));

        let e = engine.evaluate_stage_gate(&content(95.0, 5), StageKind::ContentReview);
        assert_eq!(e.verdict, GateVerdict::Pass);
        assert_eq!(e.tier, Some(PassTier::Excellent));
    }

    #[test]
    fn test_pass_tiers() {
        let engine = QualityGateEngine::new();
        let tier = |s| {
            engine
                .evaluate_stage_gate(&content(s, 0), StageKind::ContentReview)
                .tier
        };
        assert_eq!(tier(80.0), Some(PassTier::Acceptable));
        assert_eq!(tier(85.0), Some(PassTier::Good));
        assert_eq!(tier(90.0), Some(PassTier::Excellent));
    }

    #[test]
    fn test_format_component_below_minimum_iterates() {
        let engine = QualityGateEngine::new();
        let components = FormatComponents {
            structure: Some(20.0),
            ..passing_components()
        };
        let e = engine.evaluate_stage_gate(
            &format(92.0, components, vec![]),
            StageKind::FormatOptimization,
        );
        assert_eq!(e.verdict, GateVerdict::Iterate);
        assert!(e.reasons[0].contains("Structure: 20/22"));
    }

    #[test]
    fn test_format_component_zero_is_not_skipped() {
        let engine = QualityGateEngine::new();
        let components = FormatComponents {
            typography: Some(0.0),
            ..passing_components()
        };
        let e = engine.evaluate_stage_gate(
            &format(92.0, components, vec![]),
            StageKind::FormatOptimization,
        );
        assert_eq!(e.verdict, GateVerdict::Iterate);
    }

    #[test]
    fn test_format_missing_components_do_not_block() {
        let engine = QualityGateEngine::new();
        let e = engine.evaluate_stage_gate(
            &format(91.0, FormatComponents::default(), vec![]),
            StageKind::FormatOptimization,
        );
        assert_eq!(e.verdict, GateVerdict::Pass);
        assert_eq!(e.next_action, NextAction::ProceedToVisual);
    }

    #[test]
    fn test_render_failure_overrides_score() {
        let engine = QualityGateEngine::new();
        let issues = vec![format!("{} undefined control sequence", RENDER_FAILURE_MARKER)];
        let e = engine.evaluate_stage_gate(
            &format(95.0, passing_components(), issues),
            StageKind::FormatOptimization,
        );
        assert_eq!(e.verdict, GateVerdict::Iterate);
        assert!(e.reasons[0].contains("render"));
    }

    #[test]
    fn test_overall_handoff_at_90() {
        let engine = QualityGateEngine::new();
        let a = QualityAssessment {
            content_score: Some(92.0),
            format_score: Some(88.0),
            ..QualityAssessment::new()
        };
        let e = engine.evaluate_overall_gate(&a, 0);
        assert_eq!(e.verdict, GateVerdict::Pass);
        assert_eq!(e.next_action, NextAction::HumanHandoff);
        assert_eq!(e.threshold, Some(90.0));
        assert!(e.reasons[0].contains("Excellent"));
    }

    #[test]
    fn test_overall_meets_target_has_distinct_reason() {
        let engine = QualityGateEngine::new();
        let a = QualityAssessment {
            content_score: Some(84.0),
            format_score: Some(86.0),
            ..QualityAssessment::new()
        };
        let e = engine.evaluate_overall_gate(&a, 0);
        assert_eq!(e.verdict, GateVerdict::Pass);
        assert_eq!(e.threshold, Some(80.0));
        assert!(e.reasons[0].contains("meets target"));
        assert!(!e.reasons[0].contains("Excellent"));
    }

    #[test]
    fn test_overall_below_target_iterates_with_recommendations() {
        let engine = QualityGateEngine::new();
        let a = QualityAssessment {
            content_score: Some(70.0),
            format_score: Some(75.0),
            ..QualityAssessment::new()
        };
        let e = engine.evaluate_overall_gate(&a, 1);
        assert_eq!(e.verdict, GateVerdict::Iterate);
        assert_eq!(e.next_action, NextAction::IteratePipeline);
        assert_eq!(e.recommendations.len(), 2);
    }

    #[test]
    fn test_overall_no_scores_fails() {
        let engine = QualityGateEngine::new();
        let e = engine.evaluate_overall_gate(&QualityAssessment::new(), 0);
        assert_eq!(e.verdict, GateVerdict::Fail);
        assert_eq!(e.next_action, NextAction::StartPipeline);
    }

    #[test]
    fn test_ceiling_always_escalates() {
        let engine = QualityGateEngine::new();
        for score in [10.0, 79.9, 80.0, 95.0, 100.0] {
            for iterations in [3, 4, 10] {
                let e = engine.evaluate_overall_gate(&content(score, 0), iterations);
                assert_eq!(e.verdict, GateVerdict::Escalate, "score {score}");
            }
        }
        let good = engine.evaluate_overall_gate(&content(95.0, 0), 3);
        assert_eq!(good.next_action, NextAction::HumanReview);
        let bad = engine.evaluate_overall_gate(&content(50.0, 0), 3);
        assert_eq!(bad.next_action, NextAction::HumanEscalation);
    }

    #[test]
    fn test_convergence_first_iteration_never_converges() {
        let engine = QualityGateEngine::new();
        assert_eq!(
            engine.check_improvement_convergence(&content(90.0, 0), None),
            (false, 0.0)
        );
        assert_eq!(
            engine.check_improvement_convergence(
                &content(90.0, 0),
                Some(&QualityAssessment::new())
            ),
            (false, 0.0)
        );
    }

    #[test]
    fn test_convergence_small_and_negative_improvement() {
        let engine = QualityGateEngine::new();
        let (converged, delta) =
            engine.check_improvement_convergence(&content(81.0, 0), Some(&content(80.0, 0)));
        assert!(converged);
        assert_eq!(delta, 1.0);

        let (converged, delta) =
            engine.check_improvement_convergence(&content(75.0, 0), Some(&content(80.0, 0)));
        assert!(converged);
        assert_eq!(delta, -5.0);

        let (converged, delta) =
            engine.check_improvement_convergence(&content(88.0, 0), Some(&content(80.0, 0)));
        assert!(!converged);
        assert_eq!(delta, 8.0);
    }

    #[test]
    fn test_quality_summary_limits_issues() {
        let engine = QualityGateEngine::new();
        let summary = engine.quality_summary(&content(91.0, 8));
        assert_eq!(summary.content.issues_count, 8);
        assert_eq!(summary.content.issues.len(), 5);
        assert!(summary.content_passes);
        assert!(!summary.format_passes);
        assert!(summary.ready_for_handoff);
    }

    #[test]
    fn test_evaluation_serde_roundtrip() {
        let engine = QualityGateEngine::new();
        let e = engine.evaluate_stage_gate(&content(86.0, 0), StageKind::ContentReview);
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"verdict\":\"pass\""));
        let back: QualityGateEvaluation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
