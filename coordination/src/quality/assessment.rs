//! Quality Assessment: aggregated scores and issues across pipeline stages
//!
//! An assessment is a derived view. It is rebuilt from stage results every
//! time a gate needs it and is never treated as ground truth on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata key under which the format stage reports its analysis.
pub const FORMAT_ANALYSIS_KEY: &str = "format_analysis";
/// Component score keys inside [`FORMAT_ANALYSIS_KEY`].
pub const STRUCTURE_SCORE_KEY: &str = "structure_score";
pub const TYPOGRAPHY_SCORE_KEY: &str = "typography_score";
pub const TABLES_FIGURES_SCORE_KEY: &str = "tables_figures_score";
pub const BEST_PRACTICES_SCORE_KEY: &str = "best_practices_score";

/// The three improvement stages of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Content review (grammar, readability, structure).
    ContentReview,
    /// Format optimization (typesetting source).
    FormatOptimization,
    /// Visual inspection of the rendered artifact.
    VisualInspection,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [
        Self::ContentReview,
        Self::FormatOptimization,
        Self::VisualInspection,
    ];

    /// Gate name used in evaluations for this stage.
    pub fn gate_name(self) -> &'static str {
        match self {
            Self::ContentReview => "content_quality",
            Self::FormatOptimization => "format_quality",
            Self::VisualInspection => "visual_quality",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContentReview => write!(f, "content_review"),
            Self::FormatOptimization => write!(f, "format_optimization"),
            Self::VisualInspection => write!(f, "visual_inspection"),
        }
    }
}

/// Format sub-scores, each out of 25.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatComponents {
    pub structure: Option<f64>,
    pub typography: Option<f64>,
    pub tables_figures: Option<f64>,
    pub best_practices: Option<f64>,
}

impl FormatComponents {
    /// Extract component scores from a format stage metadata blob.
    ///
    /// Missing keys, or values that are not numbers, stay `None`.
    pub fn from_metadata(metadata: &serde_json::Value) -> Self {
        let analysis = match metadata.get(FORMAT_ANALYSIS_KEY) {
            Some(a) => a,
            None => return Self::default(),
        };
        let read = |key: &str| analysis.get(key).and_then(serde_json::Value::as_f64);
        Self {
            structure: read(STRUCTURE_SCORE_KEY),
            typography: read(TYPOGRAPHY_SCORE_KEY),
            tables_figures: read(TABLES_FIGURES_SCORE_KEY),
            best_practices: read(BEST_PRACTICES_SCORE_KEY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.structure.is_none()
            && self.typography.is_none()
            && self.tables_figures.is_none()
            && self.best_practices.is_none()
    }
}

/// Complete quality assessment.
///
/// `None` always means "not measured" and is distinct from a score of zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub content_score: Option<f64>,
    pub format_score: Option<f64>,
    #[serde(default)]
    pub format_components: FormatComponents,
    pub visual_score: Option<f64>,

    #[serde(default)]
    pub content_issues: Vec<String>,
    #[serde(default)]
    pub format_issues: Vec<String>,
    #[serde(default)]
    pub visual_issues: Vec<String>,

    pub assessed_at: DateTime<Utc>,
}

impl Default for QualityAssessment {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityAssessment {
    /// Empty assessment: nothing measured yet.
    pub fn new() -> Self {
        Self {
            content_score: None,
            format_score: None,
            format_components: FormatComponents::default(),
            visual_score: None,
            content_issues: Vec::new(),
            format_issues: Vec::new(),
            visual_issues: Vec::new(),
            assessed_at: Utc::now(),
        }
    }

    /// Record the latest outcome of a stage, replacing what was there.
    ///
    /// A failed stage clears the stage's score so that the gate sees
    /// "not measured" instead of a stale score from an earlier iteration.
    pub fn record_stage(
        &mut self,
        stage: StageKind,
        success: bool,
        score: Option<f64>,
        issues: &[String],
        components: Option<FormatComponents>,
    ) {
        let score = if success { score } else { None };
        let issues = issues.to_vec();
        match stage {
            StageKind::ContentReview => {
                self.content_score = score;
                self.content_issues = issues;
            }
            StageKind::FormatOptimization => {
                self.format_score = score;
                self.format_issues = issues;
                self.format_components = if success {
                    components.unwrap_or_default()
                } else {
                    FormatComponents::default()
                };
            }
            StageKind::VisualInspection => {
                self.visual_score = score;
                self.visual_issues = issues;
            }
        }
    }

    /// Score for one stage.
    pub fn score_for(&self, stage: StageKind) -> Option<f64> {
        match stage {
            StageKind::ContentReview => self.content_score,
            StageKind::FormatOptimization => self.format_score,
            StageKind::VisualInspection => self.visual_score,
        }
    }

    /// Issues reported by one stage.
    pub fn issues_for(&self, stage: StageKind) -> &[String] {
        match stage {
            StageKind::ContentReview => &self.content_issues,
            StageKind::FormatOptimization => &self.format_issues,
            StageKind::VisualInspection => &self.visual_issues,
        }
    }

    /// Top-level scores that are present, in stage order.
    pub fn present_scores(&self) -> Vec<f64> {
        StageKind::ALL
            .iter()
            .filter_map(|s| self.score_for(*s))
            .collect()
    }

    /// Mean of the top-level scores that are present.
    pub fn overall_score(&self) -> Option<f64> {
        let scores = self.present_scores();
        if scores.is_empty() {
            return None;
        }
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}
