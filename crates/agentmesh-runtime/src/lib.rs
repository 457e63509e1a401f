//! agentmesh runtime — autonomous runner, mission state, and the run
//! controller

pub mod autonomous;
pub mod config;
pub mod controller;
pub mod mission;
pub mod summarizer;

pub use autonomous::{AutonomousRunner, MissionReport};
pub use config::RuntimeConfig;
pub use controller::{RunController, WorkflowOutcome};
pub use mission::{mission_state_path, prepare_mission_state, save_mission_state, MissionState};
pub use summarizer::{ExtractiveSummarizer, Summarizer};
