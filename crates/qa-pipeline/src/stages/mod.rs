//! Pipeline stages: black-box collaborators behind one interface.
//!
//! A [`Stage`] turns an input version into a target version by calling an
//! external [`Collaborator`]. The collaborator reads the input from the
//! version store and registers the target itself; the stage only returns the
//! structured [`StageOutcome`]. Stages may also read and write advisory
//! [`ContextNote`]s.

pub mod command;
pub mod content;
pub mod format;
pub mod visual;

use std::collections::BTreeMap;

use async_trait::async_trait;
use coordination::quality::StageKind;
use serde::{Deserialize, Serialize};

use crate::state::{AgentContext, AgentResult, ContextNote};

pub use command::{CommandCollaborator, CommandSpec};
pub use content::ContentReviewStage;
pub use format::{CommandRenderCheck, FormatOptimizationStage, RenderCheck};
pub use visual::VisualInspectionStage;

/// How aggressively the format stage may restructure content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    Conservative,
    Moderate,
    Aggressive,
}

impl std::fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conservative => write!(f, "conservative"),
            Self::Moderate => write!(f, "moderate"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Invocation options. Serialized as a flat JSON map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization_level: Option<OptimizationLevel>,
    /// Inner improvement passes a collaborator may run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_passes: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Everything a collaborator needs for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRequest {
    pub content_source: String,
    pub input_version: String,
    pub target_version: String,
    #[serde(default)]
    pub options: StageOptions,
}

/// What a collaborator reports back. An `AgentResult` minus the stage tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub success: bool,
    /// Empty means "the requested target version"
    #[serde(default)]
    pub version_created: String,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub processing_time_secs: f64,
    #[serde(default)]
    pub issues_found: Vec<String>,
    #[serde(default)]
    pub optimizations_applied: Vec<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl StageOutcome {
    /// Successful outcome for `version` with a score.
    pub fn succeeded(version: &str, quality_score: Option<f64>) -> Self {
        Self {
            success: true,
            version_created: version.to_string(),
            quality_score,
            processing_time_secs: 0.0,
            issues_found: Vec::new(),
            optimizations_applied: Vec::new(),
            error_message: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn into_result(self, stage: StageKind) -> AgentResult {
        AgentResult {
            stage,
            success: self.success,
            version_created: self.version_created,
            quality_score: self.quality_score,
            processing_time_secs: self.processing_time_secs,
            issues_found: self.issues_found,
            optimizations_applied: self.optimizations_applied,
            error_message: self.error_message,
            metadata: self.metadata,
        }
    }
}

/// Error type for collaborator invocations
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("{program} exited with {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Malformed collaborator response: {0}")]
    Protocol(String),

    #[error("No collaborator configured for {0}")]
    NotConfigured(StageKind),

    #[error("{0}")]
    Failed(String),
}

/// Result type for collaborator invocations
pub type StageResult<T> = Result<T, StageError>;

/// Transport to an external stage implementation.
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn invoke(&self, stage: StageKind, request: &StageRequest) -> StageResult<StageOutcome>;
}

/// One pipeline stage.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Options for the next invocation, derived from upstream notes.
    fn options(&self, _context: &AgentContext) -> StageOptions {
        StageOptions::default()
    }

    async fn invoke(&self, request: &StageRequest) -> StageResult<StageOutcome>;

    /// Re-verify a stored version that is reused instead of invoking.
    async fn recheck(&self, outcome: StageOutcome) -> StageOutcome {
        outcome
    }

    /// Notes for downstream stages after a successful invocation.
    fn notes(&self, _outcome: &StageOutcome) -> Option<ContextNote> {
        None
    }
}

/// Read a string list from a metadata object, skipping non-strings.
pub(crate) fn metadata_strings(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
