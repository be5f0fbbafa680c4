//! Visual inspection stage

use std::sync::Arc;

use async_trait::async_trait;
use coordination::quality::StageKind;

use super::{Collaborator, Stage, StageOptions, StageOutcome, StageRequest, StageResult};
use crate::state::AgentContext;

/// Typography score below which the visual stage gets an extra pass.
const WEAK_TYPOGRAPHY_SCORE: f64 = 20.0;

/// Third stage: rendered-page inspection and layout polish.
pub struct VisualInspectionStage {
    collaborator: Arc<dyn Collaborator>,
}

impl VisualInspectionStage {
    pub fn new(collaborator: Arc<dyn Collaborator>) -> Self {
        Self { collaborator }
    }
}

#[async_trait]
impl Stage for VisualInspectionStage {
    fn kind(&self) -> StageKind {
        StageKind::VisualInspection
    }

    fn options(&self, context: &AgentContext) -> StageOptions {
        let weak = context
            .typography_score()
            .is_some_and(|score| score < WEAK_TYPOGRAPHY_SCORE);
        StageOptions {
            max_passes: Some(if weak { 3 } else { 2 }),
            ..Default::default()
        }
    }

    async fn invoke(&self, request: &StageRequest) -> StageResult<StageOutcome> {
        self.collaborator.invoke(self.kind(), request).await
    }
}
