//! Pipeline State Machine: explicit nodes and legal transition guards.
//!
//! Every run starts at `Initialization` and terminates at either `Completion`
//! or `Escalation`. The driver calls `advance()` after each node; illegal
//! edges are rejected and every legal one is recorded for the final report.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Nodes of the pipeline graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineNode {
    /// Run setup; no stage work.
    Initialization,
    /// Content review collaborator.
    ContentStage,
    /// Format optimization collaborator.
    FormatStage,
    /// Visual inspection collaborator.
    VisualStage,
    /// Overall gate over every stage result so far.
    QualityAssessment,
    /// Bump the iteration counter and loop back.
    Iteration,
    /// Ready for human handoff (terminal).
    Completion,
    /// Needs human intervention (terminal).
    Escalation,
}

impl PipelineNode {
    /// Whether this is a terminal node (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completion | Self::Escalation)
    }
}

impl fmt::Display for PipelineNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialization => write!(f, "initialization"),
            Self::ContentStage => write!(f, "content_stage"),
            Self::FormatStage => write!(f, "format_stage"),
            Self::VisualStage => write!(f, "visual_stage"),
            Self::QualityAssessment => write!(f, "quality_assessment"),
            Self::Iteration => write!(f, "iteration"),
            Self::Completion => write!(f, "completion"),
            Self::Escalation => write!(f, "escalation"),
        }
    }
}

/// Legal edges of the pipeline graph:
/// ```text
/// Initialization → ContentStage
/// ContentStage → FormatStage | Iteration | Escalation
/// FormatStage → VisualStage | Iteration | Escalation
/// VisualStage → QualityAssessment
/// QualityAssessment → Completion | Iteration | Escalation
/// Iteration → ContentStage
/// ```
pub fn is_legal_transition(from: PipelineNode, to: PipelineNode) -> bool {
    use PipelineNode::*;

    matches!(
        (from, to),
        (Initialization, ContentStage)
            | (ContentStage, FormatStage)
            | (ContentStage, Iteration)
            | (ContentStage, Escalation)
            | (FormatStage, VisualStage)
            | (FormatStage, Iteration)
            | (FormatStage, Escalation)
            | (VisualStage, QualityAssessment)
            | (QualityAssessment, Completion)
            | (QualityAssessment, Iteration)
            | (QualityAssessment, Escalation)
            | (Iteration, ContentStage)
    )
}

/// A single recorded transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: PipelineNode,
    pub to: PipelineNode,
    /// Iterations completed at the time of transition.
    pub iteration: u32,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Illegal pipeline transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: PipelineNode,
    pub to: PipelineNode,
}

/// Tracks the current node and keeps an auditable transition log.
pub struct StateMachine {
    current: PipelineNode,
    iteration: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    /// Create a new state machine starting at `Initialization`.
    pub fn new() -> Self {
        Self {
            current: PipelineNode::Initialization,
            iteration: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> PipelineNode {
        self.current
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    /// Attempt to advance to the next node.
    pub fn advance(&mut self, to: PipelineNode, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            iteration: self.iteration,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            from = %self.current,
            to = %to,
            iteration = self.iteration,
            "Pipeline transition"
        );

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Get the full transition log.
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// One-line history, e.g. `initialization → completion (12ms, 5 transitions)`.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} → {} ({}ms, {} transitions)",
            PipelineNode::Initialization,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !self.transitions.is_empty() {
            let nodes: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
            summary.push_str(&format!(" [{}]", nodes.join(" → ")));
        }
        summary
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineNode::*;

    #[test]
    fn test_initial_state() {
        let sm = StateMachine::new();
        assert_eq!(sm.current(), Initialization);
        assert!(!sm.is_terminal());
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut sm = StateMachine::new();
        for node in [
            ContentStage,
            FormatStage,
            VisualStage,
            QualityAssessment,
            Completion,
        ] {
            sm.advance(node, None).unwrap();
        }
        assert!(sm.is_terminal());
        assert_eq!(sm.transitions().len(), 5);
    }

    #[test]
    fn test_iteration_loop() {
        let mut sm = StateMachine::new();
        sm.advance(ContentStage, None).unwrap();
        sm.advance(Iteration, Some("content below minimum")).unwrap();
        sm.set_iteration(1);
        sm.advance(ContentStage, None).unwrap();
        sm.advance(FormatStage, None).unwrap();
        sm.advance(Escalation, Some("format failed")).unwrap();

        assert!(sm.is_terminal());
        assert_eq!(sm.transitions()[2].iteration, 1);
        assert_eq!(
            sm.transitions()[1].reason.as_deref(),
            Some("content below minimum")
        );
    }

    #[test]
    fn test_cannot_leave_terminal() {
        for terminal in [Completion, Escalation] {
            for to in [ContentStage, Iteration, Escalation, Completion] {
                assert!(!is_legal_transition(terminal, to));
            }
        }
    }

    #[test]
    fn test_illegal_skips() {
        let mut sm = StateMachine::new();
        let err = sm.advance(FormatStage, None).unwrap_err();
        assert_eq!(err.from, Initialization);
        assert_eq!(err.to, FormatStage);

        // Visual inspection always proceeds to the overall gate.
        assert!(!is_legal_transition(VisualStage, Iteration));
        assert!(!is_legal_transition(VisualStage, Escalation));
        // Iteration only loops back to content review.
        assert!(!is_legal_transition(Iteration, FormatStage));
    }

    #[test]
    fn test_transition_record_serde_roundtrip() {
        let record = TransitionRecord {
            from: QualityAssessment,
            to: Iteration,
            iteration: 2,
            elapsed_ms: 321,
            reason: Some("overall below target".into()),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"quality_assessment\""));
        let restored: TransitionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_summary() {
        let mut sm = StateMachine::new();
        sm.advance(ContentStage, None).unwrap();
        sm.advance(Escalation, None).unwrap();
        let summary = sm.summary();
        assert!(summary.contains("escalation"));
        assert!(summary.contains("2 transitions"));
        assert_eq!(IllegalTransition { from: Completion, to: Iteration }.to_string(),
            "Illegal pipeline transition: completion → iteration");
    }
}
