//! Content review stage

use std::sync::Arc;

use async_trait::async_trait;
use coordination::quality::StageKind;

use super::{metadata_strings, Collaborator, Stage, StageOutcome, StageRequest, StageResult};
use crate::state::{ContentNotes, ContextNote};

/// First stage: grammar, readability, and structure fixes.
pub struct ContentReviewStage {
    collaborator: Arc<dyn Collaborator>,
}

impl ContentReviewStage {
    pub fn new(collaborator: Arc<dyn Collaborator>) -> Self {
        Self { collaborator }
    }
}

#[async_trait]
impl Stage for ContentReviewStage {
    fn kind(&self) -> StageKind {
        StageKind::ContentReview
    }

    async fn invoke(&self, request: &StageRequest) -> StageResult<StageOutcome> {
        self.collaborator.invoke(self.kind(), request).await
    }

    fn notes(&self, outcome: &StageOutcome) -> Option<ContextNote> {
        let metadata = &outcome.metadata;
        Some(ContextNote::Content(ContentNotes {
            quality_score: outcome.quality_score,
            issues_found: outcome.issues_found.clone(),
            has_complex_tables: metadata
                .get("has_complex_tables")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            readability_concerns: metadata_strings(metadata.get("readability_concerns")),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageError;
    use serde_json::json;

    struct Unused;

    #[async_trait]
    impl Collaborator for Unused {
        async fn invoke(&self, stage: StageKind, _request: &StageRequest) -> StageResult<StageOutcome> {
            Err(StageError::NotConfigured(stage))
        }
    }

    #[test]
    fn test_notes_from_metadata() {
        let stage = ContentReviewStage::new(Arc::new(Unused));
        let mut outcome = StageOutcome::succeeded("v1_content_edited", Some(86.0));
        outcome.metadata = json!({
            "has_complex_tables": true,
            "readability_concerns": ["long sentences in section 2"]
        });
        match stage.notes(&outcome) {
            Some(ContextNote::Content(notes)) => {
                assert!(notes.has_complex_tables);
                assert_eq!(notes.readability_concerns, vec!["long sentences in section 2"]);
                assert_eq!(notes.quality_score, Some(86.0));
            }
            other => panic!("unexpected notes {other:?}"),
        }
    }

    #[test]
    fn test_notes_without_metadata() {
        let stage = ContentReviewStage::new(Arc::new(Unused));
        let outcome = StageOutcome::succeeded("v1", None);
        match stage.notes(&outcome) {
            Some(ContextNote::Content(notes)) => {
                assert!(!notes.has_complex_tables);
                assert!(notes.readability_concerns.is_empty());
            }
            other => panic!("unexpected notes {other:?}"),
        }
    }
}
