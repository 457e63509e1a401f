//! Workflow execution — dependency-driven batches with abort, failure, and
//! resume semantics
//!
//! The engine owns step state and templating; actually running a step is
//! injected through [`StepRunner`], so the same engine drives real kernels
//! and test doubles alike.

use crate::parse::WorkflowDefinition;
use agentmesh_core::{Error, EventKind};
use agentmesh_store::EventLog;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// What a completed step hands back: its output record (key -> value,
/// referenced as `{stepId.key}` downstream) and the tokens it consumed.
#[derive(Clone, Debug, Default)]
pub struct StepOutput {
    pub record: Value,
    pub tokens: usize,
}

/// Runs one resolved step. The engine guarantees each step is invoked at
/// most once, only after its dependencies completed.
#[async_trait::async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(
        &self,
        step_id: &str,
        prompt: &str,
        agent_path: &str,
    ) -> std::result::Result<StepOutput, String>;
}

/// Resume ticket carried by a failed workflow's `workflow_complete` event.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResume {
    pub variables: HashMap<String, Value>,
    pub completed_outputs: HashMap<String, Value>,
    pub per_step_tokens: HashMap<String, usize>,
    pub completed_steps: Vec<String>,
}

/// Successful execution result.
#[derive(Clone, Debug, Default)]
pub struct ExecutionResult {
    pub outputs: HashMap<String, Value>,
    pub per_step_tokens: HashMap<String, usize>,
}

/// A failed execution, preserving everything needed to resume.
#[derive(Debug, thiserror::Error)]
#[error("workflow step '{failed_step}' failed: {reason}")]
pub struct WorkflowFailure {
    pub failed_step: String,
    pub reason: String,
    pub resume: WorkflowResume,
}

pub struct WorkflowEngine {
    max_parallel_steps: usize,
    event_log: Option<Arc<EventLog>>,
}

impl WorkflowEngine {
    pub fn new(max_parallel_steps: usize) -> Self {
        Self {
            max_parallel_steps: max_parallel_steps.max(1),
            event_log: None,
        }
    }

    pub fn with_event_log(mut self, event_log: Arc<EventLog>) -> Self {
        self.event_log = Some(event_log);
        self
    }

    /// Execute the full workflow from scratch.
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        variables: HashMap<String, Value>,
        runner: &dyn StepRunner,
        abort: CancellationToken,
    ) -> std::result::Result<ExecutionResult, WorkflowFailure> {
        self.run(workflow, variables, HashMap::new(), HashMap::new(), runner, abort)
            .await
    }

    /// Re-enter a previously failed workflow: completed steps are seeded and
    /// never re-run.
    pub async fn resume_from(
        &self,
        workflow: &WorkflowDefinition,
        resume: WorkflowResume,
        runner: &dyn StepRunner,
        abort: CancellationToken,
    ) -> std::result::Result<ExecutionResult, WorkflowFailure> {
        self.run(
            workflow,
            resume.variables,
            resume.completed_outputs,
            resume.per_step_tokens,
            runner,
            abort,
        )
        .await
    }

    async fn run(
        &self,
        workflow: &WorkflowDefinition,
        variables: HashMap<String, Value>,
        seeded_outputs: HashMap<String, Value>,
        seeded_tokens: HashMap<String, usize>,
        runner: &dyn StepRunner,
        abort: CancellationToken,
    ) -> std::result::Result<ExecutionResult, WorkflowFailure> {
        let mut states: HashMap<String, StepState> = workflow
            .steps
            .iter()
            .map(|s| {
                let state = if seeded_outputs.contains_key(&s.id) {
                    StepState::Completed
                } else {
                    StepState::Pending
                };
                (s.id.clone(), state)
            })
            .collect();
        let mut outputs = seeded_outputs;
        let mut per_step_tokens = seeded_tokens;

        let fail = |failed_step: String,
                    reason: String,
                    outputs: &HashMap<String, Value>,
                    per_step_tokens: &HashMap<String, usize>,
                    variables: &HashMap<String, Value>| {
            WorkflowFailure {
                failed_step,
                reason,
                resume: WorkflowResume {
                    variables: variables.clone(),
                    completed_outputs: outputs.clone(),
                    per_step_tokens: per_step_tokens.clone(),
                    completed_steps: outputs.keys().cloned().collect(),
                },
            }
        };

        loop {
            if states.values().all(|s| *s == StepState::Completed) {
                info!(workflow = %workflow.name, steps = states.len(), "workflow complete");
                return Ok(ExecutionResult {
                    outputs,
                    per_step_tokens,
                });
            }

            if abort.is_cancelled() {
                warn!(workflow = %workflow.name, "workflow aborted between batches");
                return Err(fail(
                    String::new(),
                    "Workflow aborted".to_string(),
                    &outputs,
                    &per_step_tokens,
                    &variables,
                ));
            }

            // All pending steps whose dependencies completed, in
            // execution_order position, bounded by the parallelism limit.
            let mut ready: Vec<&crate::parse::WorkflowStep> = workflow
                .steps
                .iter()
                .filter(|s| states[&s.id] == StepState::Pending)
                .filter(|s| {
                    s.depends_on
                        .iter()
                        .all(|d| states.get(d) == Some(&StepState::Completed))
                })
                .collect();
            ready.sort_by_key(|s| workflow.order_index(&s.id));
            ready.truncate(self.max_parallel_steps);

            if ready.is_empty() {
                warn!(workflow = %workflow.name, "no step is ready; deadlock");
                return Err(fail(
                    String::new(),
                    Error::WorkflowDeadlock.to_string(),
                    &outputs,
                    &per_step_tokens,
                    &variables,
                ));
            }

            let batch: Vec<(String, String, String)> = ready
                .iter()
                .map(|step| {
                    let prompt = resolve_prompt(&step.prompt, &outputs, &variables);
                    (step.id.clone(), step.agent.clone(), prompt)
                })
                .collect();

            for (id, agent, _) in &batch {
                states.insert(id.clone(), StepState::Running);
                self.emit_step(id, agent, "running", None, None);
            }

            let results = futures::future::join_all(batch.into_iter().map(
                |(id, agent, prompt)| async move {
                    debug!(step = %id, agent = %agent, "running step");
                    let outcome = runner.run_step(&id, &prompt, &agent).await;
                    (id, agent, outcome)
                },
            ))
            .await;

            // Every peer has settled; commit successes first so a failure
            // preserves its siblings' outputs in the resume payload.
            let mut failure: Option<(String, String)> = None;
            for (id, agent, outcome) in results {
                match outcome {
                    Ok(output) => {
                        states.insert(id.clone(), StepState::Completed);
                        self.emit_step(&id, &agent, "completed", Some(output.tokens), None);
                        outputs.insert(id.clone(), output.record);
                        per_step_tokens.insert(id, output.tokens);
                    }
                    Err(reason) => {
                        states.insert(id.clone(), StepState::Failed);
                        self.emit_step(&id, &agent, "failed", None, Some(&reason));
                        if failure.is_none() {
                            failure = Some((id, reason));
                        }
                    }
                }
            }

            if let Some((failed_step, reason)) = failure {
                return Err(fail(
                    failed_step,
                    reason,
                    &outputs,
                    &per_step_tokens,
                    &variables,
                ));
            }
        }
    }

    fn emit_step(
        &self,
        step_id: &str,
        agent_path: &str,
        status: &str,
        tokens: Option<usize>,
        error: Option<&str>,
    ) {
        if let Some(log) = &self.event_log {
            let mut data = json!({
                "stepId": step_id,
                "agentPath": agent_path,
                "status": status,
            });
            if let Some(tokens) = tokens {
                data["tokens"] = json!(tokens);
            }
            if let Some(error) = error {
                data["error"] = json!(error);
            }
            log.append(EventKind::WorkflowStep, Some(agent_path), None, data);
        }
    }
}

/// Two-pass prompt templating: step-output references first, then scalar
/// variables. Unknown or non-scalar tokens stay literal.
pub fn resolve_prompt(
    prompt: &str,
    outputs: &HashMap<String, Value>,
    variables: &HashMap<String, Value>,
) -> String {
    let mut resolved = prompt.to_string();

    for (step_id, record) in outputs {
        if let Some(map) = record.as_object() {
            for (key, value) in map {
                let token = format!("{{{}.{}}}", step_id, key);
                if resolved.contains(&token) {
                    resolved = resolved.replace(&token, &scalar_string(value));
                }
            }
        }
    }

    for (name, value) in variables {
        if value.is_object() || value.is_array() {
            continue;
        }
        let token = format!("{{{}}}", name);
        if resolved.contains(&token) {
            resolved = resolved.replace(&token, &scalar_string(value));
        }
    }

    resolved
}

fn scalar_string(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templating_two_passes() {
        let mut outputs = HashMap::new();
        outputs.insert("a".to_string(), json!({"result": "A", "count": 3}));
        let mut variables = HashMap::new();
        variables.insert("name".to_string(), json!("demo"));
        variables.insert("nested".to_string(), json!({"x": 1}));

        let resolved = resolve_prompt(
            "use {a.result} ({a.count}) for {name}; keep {a.missing} and {nested} and {unknown}",
            &outputs,
            &variables,
        );
        assert_eq!(
            resolved,
            "use A (3) for demo; keep {a.missing} and {nested} and {unknown}"
        );
    }
}
