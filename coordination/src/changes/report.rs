//! Snapshot comparison and quality progression reports

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::diff::{generate_diff, percent, FileDiff, FileStatus};

/// Diff lines shown per file in the markdown summary.
const SAMPLE_DIFF_LINES: usize = 10;

/// Totals across every file of a comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub files_added: Vec<String>,
    pub files_removed: Vec<String>,
    pub files_modified: Vec<String>,
    pub files_unchanged: Vec<String>,
    pub total_additions: usize,
    pub total_deletions: usize,
    pub total_modifications: usize,
    /// Mean similarity percentage over files present in both snapshots
    pub average_similarity: f64,
}

impl ComparisonSummary {
    pub fn net_change(&self) -> i64 {
        self.total_additions as i64 - self.total_deletions as i64
    }
}

/// Quality delta attached to a change report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityDelta {
    pub old_quality_score: f64,
    pub new_quality_score: f64,
    pub quality_improvement: f64,
}

impl QualityDelta {
    pub fn new(old: f64, new: f64) -> Self {
        Self {
            old_quality_score: old,
            new_quality_score: new,
            quality_improvement: new - old,
        }
    }
}

/// File-by-file comparison of two version snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub old_version: String,
    pub new_version: String,
    pub compared_at: DateTime<Utc>,
    pub file_changes: BTreeMap<String, FileDiff>,
    pub summary: ComparisonSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_analysis: Option<QualityDelta>,
}

impl ComparisonReport {
    /// Compare two full snapshots (file name → content).
    pub fn compare(
        old_files: &BTreeMap<String, String>,
        new_files: &BTreeMap<String, String>,
        old_version: &str,
        new_version: &str,
    ) -> Self {
        let old_names: BTreeSet<&String> = old_files.keys().collect();
        let new_names: BTreeSet<&String> = new_files.keys().collect();

        let mut summary = ComparisonSummary::default();
        let mut file_changes = BTreeMap::new();
        let mut similarities = Vec::new();

        for name in old_names.intersection(&new_names) {
            let diff = generate_diff(&old_files[*name], &new_files[*name], name);
            match diff.status {
                FileStatus::Modified => summary.files_modified.push((*name).clone()),
                _ => summary.files_unchanged.push((*name).clone()),
            }
            summary.total_additions += diff.statistics.additions;
            summary.total_deletions += diff.statistics.deletions;
            summary.total_modifications += diff.statistics.modifications;
            similarities.push(diff.similarity_ratio);
            file_changes.insert((*name).clone(), diff);
        }

        for name in new_names.difference(&old_names) {
            let diff = FileDiff::added(name, &new_files[*name]);
            summary.total_additions += diff.statistics.additions;
            summary.files_added.push((*name).clone());
            file_changes.insert((*name).clone(), diff);
        }

        for name in old_names.difference(&new_names) {
            let diff = FileDiff::removed(name, &old_files[*name]);
            summary.total_deletions += diff.statistics.deletions;
            summary.files_removed.push((*name).clone());
            file_changes.insert((*name).clone(), diff);
        }

        if !similarities.is_empty() {
            summary.average_similarity =
                percent(similarities.iter().sum::<f64>() / similarities.len() as f64);
        }

        Self {
            old_version: old_version.to_string(),
            new_version: new_version.to_string(),
            compared_at: Utc::now(),
            file_changes,
            summary,
            quality_analysis: None,
        }
    }

    pub fn with_quality(mut self, old_score: f64, new_score: f64) -> Self {
        self.quality_analysis = Some(QualityDelta::new(old_score, new_score));
        self
    }

    /// File stem shared by every artifact saved for this comparison.
    pub fn file_stem(&self) -> String {
        format!("{}_to_{}", self.old_version, self.new_version)
    }

    /// Human-readable markdown summary.
    pub fn to_markdown(&self) -> String {
        let s = &self.summary;
        let mut md = String::new();

        let _ = writeln!(
            md,
            "# Change Summary: {} → {}\n",
            self.old_version, self.new_version
        );
        let _ = writeln!(md, "**Generated:** {}\n", self.compared_at.to_rfc3339());
        md.push_str("## Overview\n\n");
        md.push_str("| Metric | Count |\n|--------|-------|\n");
        let _ = writeln!(md, "| Files Added | {} |", s.files_added.len());
        let _ = writeln!(md, "| Files Removed | {} |", s.files_removed.len());
        let _ = writeln!(md, "| Files Modified | {} |", s.files_modified.len());
        let _ = writeln!(md, "| Total Additions | +{} lines |", s.total_additions);
        let _ = writeln!(md, "| Total Deletions | -{} lines |", s.total_deletions);
        let _ = writeln!(md, "| Net Change | {:+} lines |", s.net_change());
        let _ = writeln!(md, "| Average Similarity | {}% |\n", s.average_similarity);

        if let Some(q) = &self.quality_analysis {
            md.push_str("## Quality\n\n");
            let _ = writeln!(
                md,
                "- **Score:** {} → {} ({:+})\n",
                q.old_quality_score, q.new_quality_score, q.quality_improvement
            );
        }

        if !s.files_added.is_empty() {
            md.push_str("## Files Added\n\n");
            for name in &s.files_added {
                let additions = self.file_changes[name].statistics.additions;
                let _ = writeln!(md, "- **{}** (+{} lines)", name, additions);
            }
            md.push('\n');
        }

        if !s.files_removed.is_empty() {
            md.push_str("## Files Removed\n\n");
            for name in &s.files_removed {
                let deletions = self.file_changes[name].statistics.deletions;
                let _ = writeln!(md, "- **{}** (-{} lines)", name, deletions);
            }
            md.push('\n');
        }

        if !s.files_modified.is_empty() {
            md.push_str("## Files Modified\n\n");
            for name in &s.files_modified {
                let diff = &self.file_changes[name];
                let stats = &diff.statistics;
                let _ = writeln!(md, "### {}", name);
                let _ = writeln!(md, "- **Similarity:** {}%", stats.similarity_percentage);
                let _ = writeln!(
                    md,
                    "- **Changes:** +{} -{} lines",
                    stats.additions, stats.deletions
                );
                let _ = writeln!(md, "- **Modifications:** {} lines", stats.modifications);
                if !diff.unified_diff.is_empty() {
                    md.push_str("- **Sample changes:**\n  ```diff\n");
                    for line in diff
                        .unified_diff
                        .iter()
                        .take(SAMPLE_DIFF_LINES)
                        .filter(|l| l.starts_with(['+', '-', '@']))
                    {
                        let _ = writeln!(md, "  {}", line.trim_end());
                    }
                    if diff.unified_diff.len() > SAMPLE_DIFF_LINES {
                        md.push_str("  ...\n");
                    }
                    md.push_str("  ```\n");
                }
                md.push('\n');
            }
        }

        md
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTrend {
    Improving,
    Declining,
    Stable,
}

impl std::fmt::Display for QualityTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Improving => write!(f, "improving"),
            Self::Declining => write!(f, "declining"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityStep {
    pub from: String,
    pub to: String,
    pub from_score: f64,
    pub to_score: f64,
    pub improvement: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredVersion {
    pub name: String,
    pub score: f64,
}

/// Score movement across an ordered list of versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityProgression {
    pub versions_analyzed: usize,
    pub steps: Vec<QualityStep>,
    pub overall_improvement: f64,
    pub best_version: ScoredVersion,
    pub worst_version: ScoredVersion,
    pub trend: QualityTrend,
}

/// Analyze `(version, score)` pairs in order.
///
/// Returns `None` for fewer than two points. Ties for best/worst go to the
/// earliest version.
pub fn analyze_quality_progression(scores: &[(String, f64)]) -> Option<QualityProgression> {
    if scores.len() < 2 {
        return None;
    }

    let steps: Vec<QualityStep> = scores
        .windows(2)
        .map(|pair| QualityStep {
            from: pair[0].0.clone(),
            to: pair[1].0.clone(),
            from_score: pair[0].1,
            to_score: pair[1].1,
            improvement: pair[1].1 - pair[0].1,
        })
        .collect();

    let mut best = &scores[0];
    let mut worst = &scores[0];
    for entry in &scores[1..] {
        if entry.1 > best.1 {
            best = entry;
        }
        if entry.1 < worst.1 {
            worst = entry;
        }
    }

    let positive = steps.iter().filter(|s| s.improvement > 0.0).count();
    let negative = steps.iter().filter(|s| s.improvement < 0.0).count();
    let trend = match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => QualityTrend::Improving,
        std::cmp::Ordering::Less => QualityTrend::Declining,
        std::cmp::Ordering::Equal => QualityTrend::Stable,
    };

    let first = scores[0].1;
    let last = scores[scores.len() - 1].1;
    Some(QualityProgression {
        versions_analyzed: scores.len(),
        steps,
        overall_improvement: last - first,
        best_version: ScoredVersion {
            name: best.0.clone(),
            score: best.1,
        },
        worst_version: ScoredVersion {
            name: worst.0.clone(),
            score: worst.1,
        },
        trend,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_compare_classifies_files() {
        let old = snapshot(&[
            ("same.md", "a\nb\n"),
            ("edit.md", "one\ntwo\n"),
            ("gone.md", "x\ny\nz\n"),
        ]);
        let new = snapshot(&[
            ("same.md", "a\nb\n"),
            ("edit.md", "one\nTWO\n"),
            ("new.md", "fresh\n"),
        ]);
        let report = ComparisonReport::compare(&old, &new, "v1", "v2");
        let s = &report.summary;
        assert_eq!(s.files_added, vec!["new.md"]);
        assert_eq!(s.files_removed, vec!["gone.md"]);
        assert_eq!(s.files_modified, vec!["edit.md"]);
        assert_eq!(s.files_unchanged, vec!["same.md"]);
        assert_eq!(s.total_additions, 1);
        assert_eq!(s.total_deletions, 3);
        assert_eq!(s.total_modifications, 1);
        assert_eq!(report.file_changes.len(), 4);
    }

    #[test]
    fn test_line_ending_only_edit_is_modified() {
        let old = snapshot(&[("f", "a\r\nb\r\n")]);
        let new = snapshot(&[("f", "a\nb\n")]);
        let report = ComparisonReport::compare(&old, &new, "v1", "v2");
        assert_eq!(report.summary.files_modified, vec!["f"]);
        assert!(report.summary.files_unchanged.is_empty());
        assert!(report.summary.average_similarity < 100.0);
    }

    #[test]
    fn test_average_similarity_ignores_added_and_removed() {
        let old = snapshot(&[("a.md", "same"), ("gone.md", "zzz")]);
        let new = snapshot(&[("a.md", "same"), ("new.md", "qqq")]);
        let report = ComparisonReport::compare(&old, &new, "v1", "v2");
        assert_eq!(report.summary.average_similarity, 100.0);
    }

    #[test]
    fn test_markdown_summary_sections() {
        let old = snapshot(&[("doc.md", "alpha\nbeta\n")]);
        let new = snapshot(&[("doc.md", "alpha\ngamma\n"), ("extra.md", "x\n")]);
        let md = ComparisonReport::compare(&old, &new, "v1", "v2")
            .with_quality(80.0, 88.0)
            .to_markdown();
        assert!(md.starts_with("# Change Summary: v1 → v2"));
        assert!(md.contains("## Files Added"));
        assert!(md.contains("### doc.md"));
        assert!(md.contains("  -beta"));
        assert!(md.contains("  +gamma"));
        assert!(md.contains("(+8)"));
        assert!(!md.contains("## Files Removed"));
    }

    #[test]
    fn test_quality_progression() {
        let scores = vec![
            ("v1".to_string(), 70.0),
            ("v2".to_string(), 82.0),
            ("v3".to_string(), 80.0),
            ("v4".to_string(), 90.0),
        ];
        let p = analyze_quality_progression(&scores).unwrap();
        assert_eq!(p.versions_analyzed, 4);
        assert_eq!(p.steps.len(), 3);
        assert_eq!(p.overall_improvement, 20.0);
        assert_eq!(p.best_version.name, "v4");
        assert_eq!(p.worst_version.name, "v1");
        assert_eq!(p.trend, QualityTrend::Improving);
    }

    #[test]
    fn test_quality_progression_needs_two_points() {
        assert!(analyze_quality_progression(&[]).is_none());
        assert!(analyze_quality_progression(&[("v1".to_string(), 1.0)]).is_none());
    }

    #[test]
    fn test_quality_progression_stable_when_balanced() {
        let scores = vec![
            ("v1".to_string(), 80.0),
            ("v2".to_string(), 85.0),
            ("v3".to_string(), 80.0),
        ];
        let p = analyze_quality_progression(&scores).unwrap();
        assert_eq!(p.trend, QualityTrend::Stable);
        assert_eq!(p.overall_improvement, 0.0);
    }
}
