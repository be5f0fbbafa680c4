//! Quality thresholds: the only configuration the gate engine reads.

use serde::{Deserialize, Serialize};

/// Threshold configuration for every quality gate.
///
/// Scores are on a 0–100 scale, except the format component scores which
/// are out of 25 each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    // Content review
    pub content_minimum: f64,
    pub content_good: f64,
    pub content_excellent: f64,

    // Format optimization
    pub format_minimum: f64,
    pub format_good: f64,
    pub format_excellent: f64,

    // Format components (out of 25 each)
    pub format_structure_minimum: f64,
    /// Kept lower than the other components to avoid iteration loops on
    /// acceptable typography.
    pub format_typography_minimum: f64,
    pub format_tables_figures_minimum: f64,
    pub format_best_practices_minimum: f64,

    // Visual inspection
    pub visual_minimum: f64,
    pub visual_good: f64,
    pub visual_excellent: f64,

    // Overall pipeline
    pub overall_target: f64,
    pub human_handoff_threshold: f64,

    // Iteration control
    pub improvement_minimum: f64,
    pub convergence_threshold: f64,
    pub max_iterations: u32,

    // Issue volume
    pub max_content_issues: usize,
    pub max_format_issues: usize,
    pub max_visual_issues: usize,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            content_minimum: 80.0,
            content_good: 85.0,
            content_excellent: 90.0,
            format_minimum: 85.0,
            format_good: 90.0,
            format_excellent: 95.0,
            format_structure_minimum: 22.0,
            format_typography_minimum: 18.0,
            format_tables_figures_minimum: 20.0,
            format_best_practices_minimum: 20.0,
            visual_minimum: 75.0,
            visual_good: 85.0,
            visual_excellent: 92.0,
            overall_target: 80.0,
            human_handoff_threshold: 90.0,
            improvement_minimum: 5.0,
            convergence_threshold: 2.0,
            max_iterations: 3,
            max_content_issues: 5,
            max_format_issues: 3,
            max_visual_issues: 10,
        }
    }
}

impl QualityThresholds {
    /// Strict profile: no tolerance for issue volume and a higher target.
    pub fn strict() -> Self {
        Self {
            overall_target: 85.0,
            max_content_issues: 0,
            max_format_issues: 0,
            max_visual_issues: 0,
            ..Default::default()
        }
    }

    /// Override the iteration ceiling, keeping everything else.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let t = QualityThresholds::default();
        assert_eq!(t.content_minimum, 80.0);
        assert_eq!(t.format_minimum, 85.0);
        assert_eq!(t.human_handoff_threshold, 90.0);
        assert_eq!(t.max_iterations, 3);
        assert_eq!(t.max_format_issues, 3);
    }

    #[test]
    fn test_partial_toml_like_json_uses_defaults() {
        let t: QualityThresholds =
            serde_json::from_str(r#"{"content_minimum": 70, "max_iterations": 5}"#).unwrap();
        assert_eq!(t.content_minimum, 70.0);
        assert_eq!(t.max_iterations, 5);
        assert_eq!(t.format_minimum, 85.0);
    }

    #[test]
    fn test_strict_profile() {
        let t = QualityThresholds::strict().with_max_iterations(1);
        assert_eq!(t.max_content_issues, 0);
        assert_eq!(t.max_iterations, 1);
        assert_eq!(t.overall_target, 85.0);
    }
}
