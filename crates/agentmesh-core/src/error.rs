//! Error types for agentmesh

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("invalid front matter in {path}: {reason}")]
    InvalidFrontMatter { path: String, reason: String },

    #[error("depth limit reached (depth {depth}, max {max})")]
    DepthExceeded { depth: u32, max: u32 },

    #[error("fanout limit reached (max {max})")]
    FanoutExceeded { max: usize },

    #[error("token budget exceeded ({used} of {budget})")]
    TokenBudgetExceeded { used: usize, budget: usize },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("aborted")]
    Aborted,

    #[error("workflow cycle involving step '{0}'")]
    WorkflowCycle(String),

    #[error("workflow deadlock: no step is ready")]
    WorkflowDeadlock,

    #[error("unknown dependency '{dependency}' in step '{step}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("workflow step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("checkpoint rejected: {0}")]
    CheckpointRejected(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol(reason.into())
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }
}
