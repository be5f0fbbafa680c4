//! Changes Module: diffs and comparison reports between versions
//!
//! Pure functions compute per-file diffs ([`generate_diff`]) and snapshot
//! comparisons ([`ComparisonReport::compare`]). [`ChangeTracker`] adds
//! persistence on top. Nothing here feeds back into pipeline routing.

pub mod diff;
pub mod matcher;
pub mod report;
pub mod tracker;

pub use diff::{generate_diff, similarity_ratio, DiffStatistics, FileDiff, FileStatus};
pub use matcher::{OpTag, Opcode, SequenceMatcher};
pub use report::{
    analyze_quality_progression, ComparisonReport, ComparisonSummary, QualityDelta,
    QualityProgression, QualityStep, QualityTrend, ScoredVersion,
};
pub use tracker::{ChangeTracker, SavedComparison, TrackerError, TrackerResult};
