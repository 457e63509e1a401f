//! Autonomous runner — cycle-bounded kernel runs under a single mission
//!
//! Each cycle is one full kernel drain. Between cycles the runner snapshots
//! working memory, updates persistent mission state, checks the wrap-up
//! heuristic, and seeds the next cycle's input from the task queue or from
//! a condensed mission prompt.

use crate::config::AutonomousRunConfig;
use crate::mission::{prepare_mission_state, save_mission_state};
use crate::summarizer::{ExtractiveSummarizer, Summarizer};
use agentmesh_core::{Activation, Error, Result, SessionStatus};
use agentmesh_kernel::{Kernel, KernelConfig, KernelEnv};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const SUMMARY_BUDGET_CHARS: usize = 600;

/// Phrases a session's final text tends to carry when the mission is done.
const WRAP_UP_INDICATORS: &[&str] = &[
    "mission complete",
    "mission accomplished",
    "all tasks complete",
    "all tasks are complete",
    "work is complete",
    "nothing left to do",
    "no further work",
    "wrapping up",
];

#[derive(Clone, Debug, Default)]
pub struct MissionReport {
    pub cycles_run: u32,
    pub total_tokens: usize,
    pub stopped_early: bool,
    pub summaries: Vec<String>,
}

pub struct AutonomousRunner {
    env: KernelEnv,
    kernel_config: KernelConfig,
    auto: AutonomousRunConfig,
    summarizer: Arc<dyn Summarizer>,
    current: Mutex<Option<Kernel>>,
    stopped: AtomicBool,
    paused: AtomicBool,
}

impl AutonomousRunner {
    pub fn new(env: KernelEnv, kernel_config: KernelConfig, auto: AutonomousRunConfig) -> Self {
        Self {
            env,
            kernel_config,
            auto,
            summarizer: Arc::new(ExtractiveSummarizer),
            current: Mutex::new(None),
            stopped: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Gate dispatch in the current cycle's kernel.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        if let Some(kernel) = self.current.lock().unwrap().as_ref() {
            kernel.pause();
        }
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        if let Some(kernel) = self.current.lock().unwrap().as_ref() {
            kernel.resume();
        }
    }

    /// End the mission: kills the current cycle and prevents further ones.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(kernel) = self.current.lock().unwrap().as_ref() {
            kernel.kill_all();
        }
    }

    pub async fn run(&self, agent_path: &str, mission_prompt: &str) -> Result<MissionReport> {
        let profile = self
            .env
            .registry
            .get(agent_path)
            .ok_or_else(|| Error::UnknownAgent(agent_path.to_string()))?;
        let agent_auto = profile.autonomous.clone().unwrap_or_default();

        let max_cycles = agent_auto.max_cycles.unwrap_or(self.auto.max_cycles).max(1);
        let mut mission = prepare_mission_state(
            &self.env.vfs,
            agent_path,
            mission_prompt,
            agent_auto.resume_mission,
        );

        let mut report = MissionReport::default();
        let mut input = mission_prompt.to_string();

        for cycle in 1..=max_cycles {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            info!(agent = %agent_path, cycle, max_cycles, "autonomous cycle start");
            let kernel = Kernel::new(self.env.clone(), self.kernel_config.clone());
            if self.paused.load(Ordering::SeqCst) {
                kernel.pause();
            }
            *self.current.lock().unwrap() = Some(kernel.clone());

            kernel.enqueue(Activation::new(agent_path, input.clone()))?;
            kernel.run_until_empty().await;

            let cycle_tokens = kernel.total_tokens();
            kernel.set_memory_snapshot(self.env.memory.render_snapshot());

            let mut finals = Vec::new();
            for session in kernel.completed_sessions() {
                if session.status() == SessionStatus::Completed {
                    let text = session.final_text().await;
                    if !text.is_empty() {
                        finals.push(text);
                    }
                }
            }

            let summary = self
                .summarizer
                .summarize(&finals.join("\n\n"), SUMMARY_BUDGET_CHARS)
                .await;
            if !summary.is_empty() {
                report.summaries.push(summary);
            }

            report.cycles_run = cycle;
            report.total_tokens += cycle_tokens;
            mission.total_cycles += 1;
            mission.total_tokens += cycle_tokens;
            mission.last_run_at = Utc::now();
            save_mission_state(&self.env.vfs, &mission);

            if agent_auto.stop_when_complete {
                let fraction = wrap_up_fraction(&finals);
                if fraction >= self.auto.wrap_up_threshold {
                    info!(agent = %agent_path, cycle, fraction, "wrap-up heuristic triggered");
                    report.stopped_early = true;
                    break;
                }
            }

            if self.stopped.load(Ordering::SeqCst) {
                warn!(agent = %agent_path, cycle, "mission stopped");
                break;
            }

            input = self.next_cycle_input(mission_prompt, &report.summaries, &agent_auto);
        }

        *self.current.lock().unwrap() = None;
        Ok(report)
    }

    /// Seed the next cycle: the oldest pending task when idle-seeding is on,
    /// otherwise a condensed mission prompt built from accumulated summaries.
    fn next_cycle_input(
        &self,
        mission_prompt: &str,
        summaries: &[String],
        agent_auto: &agentmesh_core::AutonomousConfig,
    ) -> String {
        if agent_auto.seed_task_when_idle {
            if let Some(task) = self.env.task_queue.next_pending() {
                return format!(
                    "Continue the mission. Next queued task ({}):\n{}",
                    task.id, task.description
                );
            }
        }

        let mut input = format!("MISSION:\n{}", mission_prompt);
        if !summaries.is_empty() {
            input.push_str("\n\nPROGRESS SO FAR:\n");
            for (i, summary) in summaries.iter().enumerate() {
                input.push_str(&format!("cycle {}: {}\n", i + 1, summary));
            }
        }
        input.push_str("\nContinue where the previous cycle left off.");
        input
    }
}

/// Fraction of final texts carrying a wrap-up indicator.
fn wrap_up_fraction(finals: &[String]) -> f64 {
    if finals.is_empty() {
        return 0.0;
    }
    let hits = finals
        .iter()
        .filter(|text| {
            let lower = text.to_lowercase();
            WRAP_UP_INDICATORS.iter().any(|i| lower.contains(i))
        })
        .count();
    hits as f64 / finals.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_up_fraction_counts_indicators() {
        assert_eq!(wrap_up_fraction(&[]), 0.0);
        let finals = vec![
            "Mission complete. All done.".to_string(),
            "Still researching the third item.".to_string(),
        ];
        assert!((wrap_up_fraction(&finals) - 0.5).abs() < f64::EPSILON);
    }
}
