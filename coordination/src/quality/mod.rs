//! Quality Module: Deterministic quality gates for the document pipeline
//!
//! Stage collaborators report numeric scores and issue lists. This module
//! folds them into a [`QualityAssessment`] and decides, without any hidden
//! state beyond [`QualityThresholds`], whether a stage passes, needs another
//! iteration, or must be handed to a human.
//!
//! # Gates
//!
//! ```text
//! content_quality → format_quality → visual_quality → overall_quality
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::quality::{QualityAssessment, QualityGateEngine, StageKind};
//!
//! let engine = QualityGateEngine::new();
//! let evaluation = engine.evaluate_stage_gate(&assessment, StageKind::ContentReview);
//! println!("{}: {}", evaluation.gate_name, evaluation.verdict);
//! ```

pub mod assessment;
pub mod gates;
pub mod thresholds;

pub use assessment::{FormatComponents, QualityAssessment, StageKind};
pub use gates::{
    ComponentSummary, GateVerdict, NextAction, PassTier, QualityGateEngine,
    QualityGateEvaluation, QualitySummary, RENDER_FAILURE_MARKER,
};
pub use thresholds::QualityThresholds;
