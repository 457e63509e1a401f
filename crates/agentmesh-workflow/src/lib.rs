//! agentmesh workflow — parse, validate, and execute step DAGs

pub mod engine;
pub mod parse;

pub use engine::{
    resolve_prompt, ExecutionResult, StepOutput, StepRunner, WorkflowEngine, WorkflowFailure,
    WorkflowResume,
};
pub use parse::{Trigger, WorkflowDefinition, WorkflowStep};
