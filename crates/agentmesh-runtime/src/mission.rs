//! Mission state — per-agent persistence for autonomous runs
//!
//! Stored in the VFS under `state/missions/<agent-slug>.json` so later runs
//! of the same mission can resume cycle and token totals.

use agentmesh_store::{Vfs, WriteMeta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MissionState {
    pub agent_path: String,
    pub mission_prompt: String,
    pub total_cycles: u32,
    pub total_tokens: usize,
    pub last_run_at: DateTime<Utc>,
}

impl MissionState {
    pub fn fresh(agent_path: &str, prompt: &str) -> Self {
        Self {
            agent_path: agent_path.to_string(),
            mission_prompt: prompt.to_string(),
            total_cycles: 0,
            total_tokens: 0,
            last_run_at: Utc::now(),
        }
    }
}

pub fn mission_state_path(agent_path: &str) -> String {
    let slug: String = agent_path
        .trim_start_matches("agents/")
        .trim_end_matches(".md")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    format!("state/missions/{}.json", slug)
}

fn normalize_prompt(prompt: &str) -> String {
    prompt.trim().to_lowercase()
}

/// Load or initialize the mission state for an agent. A stored state is
/// resumed only when `resume` is set and its normalized prompt matches;
/// corrupt JSON on disk yields a fresh state.
pub fn prepare_mission_state(
    vfs: &Vfs,
    agent_path: &str,
    prompt: &str,
    resume: bool,
) -> MissionState {
    if !resume {
        return MissionState::fresh(agent_path, prompt);
    }
    let path = mission_state_path(agent_path);
    let Some(content) = vfs.read(&path) else {
        return MissionState::fresh(agent_path, prompt);
    };
    match serde_json::from_str::<MissionState>(&content) {
        Ok(stored) if normalize_prompt(&stored.mission_prompt) == normalize_prompt(prompt) => {
            debug!(agent = %agent_path, cycles = stored.total_cycles, "resuming mission state");
            stored
        }
        Ok(_) => MissionState::fresh(agent_path, prompt),
        Err(e) => {
            debug!(agent = %agent_path, "mission state corrupt ({}), starting fresh", e);
            MissionState::fresh(agent_path, prompt)
        }
    }
}

pub fn save_mission_state(vfs: &Vfs, state: &MissionState) {
    let path = mission_state_path(&state.agent_path);
    if let Ok(serialized) = serde_json::to_string_pretty(state) {
        vfs.write(&path, serialized, WriteMeta::author("mission"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_path_is_slugged() {
        assert_eq!(
            mission_state_path("agents/Deep Research.md"),
            "state/missions/deep-research.json"
        );
    }

    #[test]
    fn resume_requires_matching_prompt() {
        let vfs = Vfs::new();
        let mut state = MissionState::fresh("agents/a.md", "Map the codebase");
        state.total_cycles = 3;
        save_mission_state(&vfs, &state);

        // Matching (case/whitespace-insensitive) prompt resumes
        let resumed = prepare_mission_state(&vfs, "agents/a.md", "  map THE codebase ", true);
        assert_eq!(resumed.total_cycles, 3);

        // Different prompt starts fresh
        let fresh = prepare_mission_state(&vfs, "agents/a.md", "different mission", true);
        assert_eq!(fresh.total_cycles, 0);

        // resume=false always starts fresh
        let fresh2 = prepare_mission_state(&vfs, "agents/a.md", "Map the codebase", false);
        assert_eq!(fresh2.total_cycles, 0);
    }

    #[test]
    fn corrupt_state_yields_fresh() {
        let vfs = Vfs::new();
        vfs.write(
            &mission_state_path("agents/a.md"),
            "{not json",
            WriteMeta::default(),
        );
        let state = prepare_mission_state(&vfs, "agents/a.md", "p", true);
        assert_eq!(state.total_cycles, 0);
    }
}
