//! Format optimization stage and the post-stage render check

use std::sync::Arc;

use async_trait::async_trait;
use coordination::quality::assessment::{
    FORMAT_ANALYSIS_KEY, STRUCTURE_SCORE_KEY, TYPOGRAPHY_SCORE_KEY,
};
use coordination::quality::{StageKind, RENDER_FAILURE_MARKER};
use coordination::versioning::SharedVersionStore;
use serde_json::json;
use tracing::{info, warn};

use super::command::{run_with_timeout, truncate_str, CommandSpec};
use super::{
    metadata_strings, Collaborator, OptimizationLevel, Stage, StageOptions, StageOutcome,
    StageRequest, StageResult,
};
use crate::state::{AgentContext, ContextNote, FormatNotes};

/// Metadata key recording the render check result.
pub const RENDER_METADATA_KEY: &str = "render";

/// Characters of a render error kept in the issue list.
const RENDER_ISSUE_CHARS: usize = 300;
/// Bytes of a render error kept in the notes.
const RENDER_NOTE_BYTES: usize = 500;

/// Verifies that a version's typeset output actually renders.
#[async_trait]
pub trait RenderCheck: Send + Sync {
    /// `Err` carries the renderer's error output.
    async fn check(&self, version: &str) -> Result<(), String>;
}

/// Runs a render command with the version's directory as last argument.
pub struct CommandRenderCheck {
    spec: CommandSpec,
    store: SharedVersionStore,
}

impl CommandRenderCheck {
    pub fn new(spec: CommandSpec, store: SharedVersionStore) -> Self {
        Self { spec, store }
    }
}

#[async_trait]
impl RenderCheck for CommandRenderCheck {
    async fn check(&self, version: &str) -> Result<(), String> {
        let dir = self.store.version_dir(version);
        let mut cmd = self.spec.command();
        cmd.arg(&dir).env("QA_VERSION", version);

        let output = run_with_timeout(cmd, &self.spec, None)
            .await
            .map_err(|e| e.to_string())?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).into_owned()
        } else {
            stderr.into_owned()
        };
        Err(message.trim().to_string())
    }
}

/// Second stage: typesetting source generation and optimization.
pub struct FormatOptimizationStage {
    collaborator: Arc<dyn Collaborator>,
    render_check: Option<Arc<dyn RenderCheck>>,
}

impl FormatOptimizationStage {
    pub fn new(collaborator: Arc<dyn Collaborator>) -> Self {
        Self {
            collaborator,
            render_check: None,
        }
    }

    pub fn with_render_check(mut self, check: Arc<dyn RenderCheck>) -> Self {
        self.render_check = Some(check);
        self
    }

    /// Run the render check, replacing any earlier render result.
    async fn render(&self, mut outcome: StageOutcome, version: &str) -> StageOutcome {
        let check = match &self.render_check {
            Some(check) => check,
            None => return outcome,
        };
        outcome
            .issues_found
            .retain(|issue| !issue.starts_with(RENDER_FAILURE_MARKER));

        let render = match check.check(version).await {
            Ok(()) => json!({"succeeded": true}),
            Err(message) => {
                warn!(version = %version, "Render check failed");
                let excerpt: String = message.chars().take(RENDER_ISSUE_CHARS).collect();
                outcome
                    .issues_found
                    .push(format!("{} {}", RENDER_FAILURE_MARKER, excerpt));
                json!({
                    "succeeded": false,
                    "error": truncate_str(&message, RENDER_NOTE_BYTES),
                })
            }
        };

        if !outcome.metadata.is_object() {
            outcome.metadata = json!({});
        }
        if let Some(map) = outcome.metadata.as_object_mut() {
            map.insert(RENDER_METADATA_KEY.to_string(), render);
        }
        outcome
    }
}

#[async_trait]
impl Stage for FormatOptimizationStage {
    fn kind(&self) -> StageKind {
        StageKind::FormatOptimization
    }

    fn options(&self, context: &AgentContext) -> StageOptions {
        let level = if context.has_complex_tables() {
            info!("Upstream flagged complex tables, using conservative optimization");
            OptimizationLevel::Conservative
        } else {
            OptimizationLevel::Moderate
        };
        StageOptions {
            optimization_level: Some(level),
            ..Default::default()
        }
    }

    async fn invoke(&self, request: &StageRequest) -> StageResult<StageOutcome> {
        let outcome = self.collaborator.invoke(self.kind(), request).await?;
        if !outcome.success {
            return Ok(outcome);
        }
        let version = if outcome.version_created.is_empty() {
            request.target_version.clone()
        } else {
            outcome.version_created.clone()
        };
        Ok(self.render(outcome, &version).await)
    }

    async fn recheck(&self, outcome: StageOutcome) -> StageOutcome {
        let version = outcome.version_created.clone();
        self.render(outcome, &version).await
    }

    fn notes(&self, outcome: &StageOutcome) -> Option<ContextNote> {
        let analysis = outcome.metadata.get(FORMAT_ANALYSIS_KEY);
        let score = |key: &str| analysis.and_then(|a| a.get(key)).and_then(|v| v.as_f64());
        let render = outcome.metadata.get(RENDER_METADATA_KEY);

        Some(ContextNote::Format(FormatNotes {
            quality_score: outcome.quality_score,
            structure_score: score(STRUCTURE_SCORE_KEY),
            typography_score: score(TYPOGRAPHY_SCORE_KEY),
            typography_issues: metadata_strings(analysis.and_then(|a| a.get("typography_issues"))),
            packages_used: metadata_strings(analysis.and_then(|a| a.get("packages_used"))),
            render_succeeded: render
                .and_then(|r| r.get("succeeded"))
                .and_then(serde_json::Value::as_bool),
            render_error: render
                .and_then(|r| r.get("error"))
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
        }))
    }
}
