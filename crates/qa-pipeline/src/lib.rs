//! Quality-gated document pipeline
//!
//! Drives a document through content review, format optimization, and visual
//! inspection. After each gated stage the `coordination` quality engine
//! decides whether to advance, loop back for another iteration, or escalate
//! to a human. Stage work itself is done by external collaborators; this
//! crate sequences them, records their results, and reports on the run.
//!
//! # Usage
//!
//! ```rust,ignore
//! let orchestrator = Orchestrator::new(store, QualityGateEngine::new(), stages);
//! let state = orchestrator.run("wf-1", "annual-report", "original", &cancel).await?;
//! assert!(state.human_handoff || state.escalated);
//! ```

pub mod config;
pub mod orchestrator;
pub mod report;
pub mod routing;
pub mod stages;
pub mod state;
pub mod state_machine;
pub mod telemetry;

pub use config::PipelineConfig;
pub use orchestrator::{version_name, Orchestrator, OrchestratorError, PipelineStages};
pub use report::PipelineReport;
pub use state::{AgentResult, PipelineState};
pub use state_machine::{PipelineNode, StateMachine};
