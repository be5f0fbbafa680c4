//! Pipeline configuration
//!
//! Loaded from a TOML file (every key optional) or from defaults, then
//! overridden by `QA_ARTIFACTS_DIR`, `QA_CONTENT_SOURCE`, and
//! `QA_MAX_ITERATIONS`. Stage collaborators and the render check are
//! configured as external commands under `[stages]`.

use anyhow::{Context, Result};
use coordination::quality::{QualityThresholds, StageKind};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::stages::CommandSpec;

/// One external program per pipeline stage.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageCommands {
    pub content: Option<CommandSpec>,
    pub format: Option<CommandSpec>,
    pub visual: Option<CommandSpec>,
    /// Render check run after a successful format stage
    pub render: Option<CommandSpec>,
}

impl StageCommands {
    pub fn for_stage(&self, stage: StageKind) -> Option<&CommandSpec> {
        match stage {
            StageKind::ContentReview => self.content.as_ref(),
            StageKind::FormatOptimization => self.format.as_ref(),
            StageKind::VisualInspection => self.visual.as_ref(),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of the version store (`reviewed_content/`, `version_history/`).
    pub artifacts_dir: PathBuf,
    /// Identifier of the document being processed.
    pub content_source: String,
    pub starting_version: String,
    /// Prefix for every version name a run creates (None = bare names).
    pub namespace: Option<String>,
    pub thresholds: QualityThresholds,
    pub stages: StageCommands,
    /// Where run reports are written (None = `<artifacts>/reports`).
    pub output_dir: Option<PathBuf>,
    /// JSONL run log (None = `<artifacts>/.qa-telemetry.jsonl`).
    pub telemetry_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: std::env::var("QA_ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("artifacts")),
            content_source: std::env::var("QA_CONTENT_SOURCE").unwrap_or_default(),
            starting_version: "original".into(),
            namespace: None,
            thresholds: QualityThresholds::default(),
            stages: StageCommands::default(),
            output_dir: None,
            telemetry_path: None,
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file, then layer environment overrides on top.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config = Self::from_toml(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for runs without a config file.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid pipeline config")
    }

    /// Apply `QA_ARTIFACTS_DIR`, `QA_CONTENT_SOURCE`, and `QA_MAX_ITERATIONS`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup("QA_ARTIFACTS_DIR") {
            self.artifacts_dir = PathBuf::from(dir);
        }
        if let Some(source) = lookup("QA_CONTENT_SOURCE") {
            self.content_source = source;
        }
        if let Some(max) = lookup("QA_MAX_ITERATIONS") {
            self.thresholds.max_iterations = max
                .trim()
                .parse()
                .with_context(|| format!("QA_MAX_ITERATIONS must be a non-negative integer, got {max:?}"))?;
        }
        Ok(())
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.artifacts_dir.join("reports"))
    }

    pub fn telemetry_path(&self) -> PathBuf {
        self.telemetry_path
            .clone()
            .unwrap_or_else(|| self.artifacts_dir.join(".qa-telemetry.jsonl"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
artifacts_dir = "/srv/qa"
content_source = "annual-report"
namespace = "run7"

[thresholds]
content_minimum = 70
max_iterations = 5

[stages.content]
program = "content-agent"
args = ["--mode", "review"]

[stages.render]
program = "latexmk"
args = ["-pdf"]
timeout_secs = 120
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = PipelineConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.artifacts_dir, PathBuf::from("/srv/qa"));
        assert_eq!(config.content_source, "annual-report");
        assert_eq!(config.namespace.as_deref(), Some("run7"));
        assert_eq!(config.starting_version, "original");
        assert_eq!(config.thresholds.content_minimum, 70.0);
        assert_eq!(config.thresholds.format_minimum, 85.0);
        assert_eq!(config.thresholds.max_iterations, 5);

        let content = config.stages.for_stage(StageKind::ContentReview).unwrap();
        assert_eq!(content.args, vec!["--mode", "review"]);
        assert_eq!(content.timeout_secs, 600);
        assert!(config.stages.for_stage(StageKind::VisualInspection).is_none());
        assert_eq!(config.stages.render.as_ref().unwrap().timeout_secs, 120);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("QA_ARTIFACTS_DIR", "/tmp/other"),
            ("QA_MAX_ITERATIONS", "1"),
        ]
        .into_iter()
        .collect();
        let mut config = PipelineConfig::from_toml(SAMPLE).unwrap();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.artifacts_dir, PathBuf::from("/tmp/other"));
        assert_eq!(config.content_source, "annual-report");
        assert_eq!(config.thresholds.max_iterations, 1);
        assert_eq!(
            config.telemetry_path(),
            PathBuf::from("/tmp/other/.qa-telemetry.jsonl")
        );
    }

    #[test]
    fn test_bad_max_iterations_is_an_error() {
        let mut config = PipelineConfig::from_toml("").unwrap();
        let err = config
            .apply_overrides(|k| (k == "QA_MAX_ITERATIONS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("QA_MAX_ITERATIONS"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = PipelineConfig::load(Path::new("/nonexistent/qa.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
