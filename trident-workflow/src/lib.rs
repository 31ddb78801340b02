#![deny(missing_docs)]
//! Workflow layer for trident.
//!
//! The extractor turns free text into a [`keel::WorkflowSpec`]; the
//! engine compiles patterns into node graphs and executes or streams
//! them with checkpointing; the pattern runners drive the iterative
//! strategies (ReAct loop, ReWOO plan-work-solve, ADaPT recursive
//! decomposition). Tools are reached only through `keel::ToolGateway`.

mod adapt;
mod compile;
mod engine;
mod extract;
mod react;
mod rewoo;

pub use adapt::{AdaptTask, LogicalOperator, TaskComplexity, TaskStatus};
pub use compile::{build_pattern_spec, customize, nodes, Customization};
pub use engine::{EngineConfig, ExecutableWorkflow, WorkflowChunk, WorkflowEngine, WorkflowResult};
pub use extract::{ExtractionMethod, ExtractionResult, ExtractorConfig, ModeSpec, WorkflowExtractor};
pub use react::ReactStep;
pub use rewoo::{Evidence, PlanStep};
