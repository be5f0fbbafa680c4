//! Document Quality Coordination Library
//!
//! The deterministic core of the document quality pipeline:
//! - Quality gates deciding pass / iterate / escalate from stage scores
//! - A file-backed version store with lineage, rollback, and stats
//! - Change tracking: line diffs, character similarity, comparison reports
//!
//! Nothing in this crate calls a stage collaborator. The orchestrator in
//! `qa-pipeline` sequences the stages and feeds their results in here.
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::{QualityGateEngine, StageKind, VersionStore};
//!
//! let store = VersionStore::open("./artifacts")?;
//! let engine = QualityGateEngine::new();
//! let verdict = engine.evaluate_stage_gate(&assessment, StageKind::ContentReview).verdict;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod changes;
pub mod quality;
pub mod versioning;

// Re-export key quality types
pub use quality::{
    FormatComponents, GateVerdict, NextAction, PassTier, QualityAssessment, QualityGateEngine,
    QualityGateEvaluation, QualitySummary, QualityThresholds, StageKind, RENDER_FAILURE_MARKER,
};

// Re-export key versioning types
pub use versioning::{
    SharedVersionStore, VersionError, VersionRecord, VersionResult, VersionStats, VersionStore,
};

// Re-export key change tracking types
pub use changes::{
    analyze_quality_progression, generate_diff, ChangeTracker, ComparisonReport, FileDiff,
    QualityProgression, TrackerError,
};
