//! Run controller — top-level façade over the kernel, runner, and workflow
//! engine
//!
//! Chooses the mode, constructs per-run collaboration surfaces, wires the
//! kernel, and turns workflow results into report files and
//! workflow_complete events.

use crate::autonomous::{AutonomousRunner, MissionReport};
use crate::config::RuntimeConfig;
use agentmesh_core::{Activation, Error, EventKind, Result};
use agentmesh_kernel::{Kernel, KernelConfig, KernelEnv, KernelStats};
use agentmesh_llm::AiProvider;
use agentmesh_store::{
    AgentRegistry, Blackboard, EventLog, PubSub, TaskQueueStore, Vfs, WorkingMemory, WriteMeta,
};
use agentmesh_tools::{create_default_registry, McpClientManager};
use agentmesh_workflow::{
    StepOutput, StepRunner, WorkflowDefinition, WorkflowEngine, WorkflowResume,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone, Debug)]
pub enum WorkflowOutcome {
    Completed {
        output_path: String,
        outputs: HashMap<String, Value>,
        per_step_tokens: HashMap<String, usize>,
    },
    Failed {
        failed_step: String,
        reason: String,
        resume: WorkflowResume,
    },
}

pub struct RunController {
    provider: Arc<dyn AiProvider>,
    config: RuntimeConfig,
    vfs: Arc<Vfs>,
    registry: Arc<AgentRegistry>,
    event_log: Arc<EventLog>,
    mcp: Arc<McpClientManager>,

    current_kernel: Mutex<Option<Kernel>>,
    current_runner: Mutex<Option<Arc<AutonomousRunner>>>,
    workflow_abort: Mutex<CancellationToken>,
    last_stats: Arc<Mutex<KernelStats>>,
}

impl RunController {
    pub fn new(provider: Arc<dyn AiProvider>, config: RuntimeConfig) -> Self {
        let vfs = Arc::new(Vfs::new());
        let registry = AgentRegistry::attached(&vfs);
        let event_log = Arc::new(EventLog::new(vfs.clone()));

        Self {
            provider,
            config,
            vfs,
            registry,
            event_log,
            mcp: Arc::new(McpClientManager::new()),
            current_kernel: Mutex::new(None),
            current_runner: Mutex::new(None),
            workflow_abort: Mutex::new(CancellationToken::new()),
            last_stats: Arc::new(Mutex::new(KernelStats::default())),
        }
    }

    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.event_log
    }

    pub fn stats(&self) -> KernelStats {
        *self.last_stats.lock().unwrap()
    }

    /// Fresh per-run surfaces wired into a kernel environment.
    fn fresh_env(&self) -> KernelEnv {
        KernelEnv {
            provider: self.provider.clone(),
            tools: create_default_registry(),
            vfs: self.vfs.clone(),
            registry: self.registry.clone(),
            event_log: self.event_log.clone(),
            memory: Arc::new(WorkingMemory::new()),
            task_queue: Arc::new(TaskQueueStore::new()),
            blackboard: Arc::new(Blackboard::new()),
            pubsub: Arc::new(PubSub::new()),
            vector_store: None,
            mcp: self.mcp.clone(),
        }
    }

    fn kernel_config(&self) -> KernelConfig {
        KernelConfig {
            limits: self.config.kernel_limits(),
            default_model: self.config.default_model.clone(),
            api_key: self.config.api_key.clone(),
            search_api_key: self.config.search_api_key.clone(),
        }
    }

    fn track(&self, kernel: &Kernel) {
        let stats = self.last_stats.clone();
        kernel.set_on_session_update(move |s| {
            *stats.lock().unwrap() = s;
        });
        *self.current_kernel.lock().unwrap() = Some(kernel.clone());
    }

    /// Single-shot mode: enqueue one activation and drain the queue.
    pub async fn run(&self, agent_path: &str, input: &str) -> Result<KernelStats> {
        let env = self.fresh_env();
        let memory = env.memory.clone();
        let kernel = Kernel::new(env, self.kernel_config());
        self.track(&kernel);

        kernel.enqueue(Activation::new(agent_path, input))?;
        kernel.run_until_empty().await;
        kernel.set_memory_snapshot(memory.render_snapshot());

        *self.current_kernel.lock().unwrap() = None;
        Ok(kernel.stats())
    }

    /// Autonomous mode: cycle-bounded mission run.
    pub async fn run_autonomous(&self, agent_path: &str, mission: &str) -> Result<MissionReport> {
        let runner = Arc::new(AutonomousRunner::new(
            self.fresh_env(),
            self.kernel_config(),
            self.config.autonomous.clone(),
        ));
        *self.current_runner.lock().unwrap() = Some(runner.clone());
        let report = runner.run(agent_path, mission).await;
        *self.current_runner.lock().unwrap() = None;
        report
    }

    /// Workflow mode from scratch.
    pub async fn run_workflow(
        &self,
        workflow_path: &str,
        variables: HashMap<String, Value>,
    ) -> Result<WorkflowOutcome> {
        let workflow = self.load_workflow(workflow_path)?;
        self.emit_workflow_start(&workflow, None);
        self.execute_workflow(workflow, variables, HashMap::new(), HashMap::new(), None)
            .await
    }

    /// Re-enter a failed workflow with its resume ticket.
    pub async fn resume_workflow(
        &self,
        workflow_path: &str,
        resume: WorkflowResume,
    ) -> Result<WorkflowOutcome> {
        let workflow = self.load_workflow(workflow_path)?;
        self.emit_workflow_start(&workflow, Some(&resume.completed_steps));
        let resumed_from = resume.completed_steps.clone();
        self.execute_workflow(
            workflow,
            resume.variables,
            resume.completed_outputs,
            resume.per_step_tokens,
            Some(resumed_from),
        )
        .await
    }

    /// Abort the in-flight workflow between batches.
    pub fn abort_workflow(&self) {
        self.workflow_abort.lock().unwrap().cancel();
    }

    /// Gate new sessions in whatever is currently running.
    pub fn pause(&self) {
        if let Some(kernel) = self.current_kernel.lock().unwrap().as_ref() {
            kernel.pause();
        }
        if let Some(runner) = self.current_runner.lock().unwrap().as_ref() {
            runner.pause();
        }
    }

    pub fn resume(&self) {
        if let Some(kernel) = self.current_kernel.lock().unwrap().as_ref() {
            kernel.resume();
        }
        if let Some(runner) = self.current_runner.lock().unwrap().as_ref() {
            runner.resume();
        }
    }

    pub fn kill_all(&self) {
        if let Some(kernel) = self.current_kernel.lock().unwrap().as_ref() {
            kernel.kill_all();
        }
        if let Some(runner) = self.current_runner.lock().unwrap().as_ref() {
            runner.stop();
        }
    }

    fn load_workflow(&self, path: &str) -> Result<WorkflowDefinition> {
        let content = self
            .vfs
            .read(path)
            .ok_or_else(|| Error::config(format!("no workflow file at {}", path)))?;
        WorkflowDefinition::parse(path, &content)
    }

    fn emit_workflow_start(&self, workflow: &WorkflowDefinition, resumed_from: Option<&[String]>) {
        self.event_log.append(
            EventKind::WorkflowStart,
            None,
            None,
            json!({
                "workflowPath": workflow.path,
                "name": workflow.name,
                "stepCount": workflow.steps.len(),
                "resumed": resumed_from.is_some(),
                "resumedFrom": resumed_from,
            }),
        );
    }

    async fn execute_workflow(
        &self,
        workflow: WorkflowDefinition,
        variables: HashMap<String, Value>,
        seeded_outputs: HashMap<String, Value>,
        seeded_tokens: HashMap<String, usize>,
        resumed_from: Option<Vec<String>>,
    ) -> Result<WorkflowOutcome> {
        let abort = {
            let mut guard = self.workflow_abort.lock().unwrap();
            *guard = CancellationToken::new();
            guard.clone()
        };

        let engine = WorkflowEngine::new(self.config.workflow.max_parallel_steps)
            .with_event_log(self.event_log.clone());
        let runner = KernelStepRunner {
            env: self.fresh_env(),
            config: self.kernel_config(),
        };

        let resume = WorkflowResume {
            variables,
            completed_outputs: seeded_outputs,
            per_step_tokens: seeded_tokens,
            completed_steps: Vec::new(),
        };

        match engine
            .resume_from(&workflow, resume, &runner, abort)
            .await
        {
            Ok(result) => {
                let output_path =
                    self.write_workflow_report(&workflow, &result.outputs, &result.per_step_tokens, resumed_from.as_deref());
                self.event_log.append(
                    EventKind::WorkflowComplete,
                    None,
                    None,
                    json!({
                        "status": "completed",
                        "resumed": resumed_from.is_some(),
                        "perStepTokens": result.per_step_tokens,
                        "outputPath": output_path,
                    }),
                );
                info!(workflow = %workflow.name, output = %output_path, "workflow finished");
                Ok(WorkflowOutcome::Completed {
                    output_path,
                    outputs: result.outputs,
                    per_step_tokens: result.per_step_tokens,
                })
            }
            Err(failure) => {
                self.event_log.append(
                    EventKind::WorkflowComplete,
                    None,
                    None,
                    json!({
                        "status": "failed",
                        "perStepTokens": failure.resume.per_step_tokens,
                        "failedStepId": failure.failed_step,
                        "workflowResume": serde_json::to_value(&failure.resume).unwrap_or(Value::Null),
                    }),
                );
                Ok(WorkflowOutcome::Failed {
                    failed_step: failure.failed_step,
                    reason: failure.reason,
                    resume: failure.resume,
                })
            }
        }
    }

    /// Write `outputs/<slug>-<timestamp>.md` with a summary header and every
    /// step's output record.
    fn write_workflow_report(
        &self,
        workflow: &WorkflowDefinition,
        outputs: &HashMap<String, Value>,
        per_step_tokens: &HashMap<String, usize>,
        resumed_from: Option<&[String]>,
    ) -> String {
        let slug: String = workflow
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        let path = format!(
            "outputs/{}-{}.md",
            slug,
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        );

        let total_tokens: usize = per_step_tokens.values().sum();
        let mut report = format!(
            "# {}\n\n- workflow: {}\n- steps: {}\n- tokens: {}\n",
            workflow.name,
            workflow.path,
            workflow.steps.len(),
            total_tokens
        );
        if let Some(resumed) = resumed_from {
            if !resumed.is_empty() {
                report.push_str(&format!("- resumed from: {}\n", resumed.join(", ")));
            }
        }
        report.push('\n');

        for step_id in &workflow.execution_order {
            if let Some(record) = outputs.get(step_id) {
                report.push_str(&format!(
                    "## {}\n\n```json\n{}\n```\n\n",
                    step_id,
                    serde_json::to_string_pretty(record).unwrap_or_default()
                ));
            }
        }

        self.vfs
            .write(&path, report, WriteMeta::author("workflow"));
        path
    }
}

/// Spins up a fresh kernel per workflow step and returns the final model
/// text as the step's output record.
struct KernelStepRunner {
    env: KernelEnv,
    config: KernelConfig,
}

#[async_trait::async_trait]
impl StepRunner for KernelStepRunner {
    async fn run_step(
        &self,
        step_id: &str,
        prompt: &str,
        agent_path: &str,
    ) -> std::result::Result<StepOutput, String> {
        let kernel = Kernel::new(self.env.clone(), self.config.clone());
        let result = kernel
            .run_session_and_return(Activation::new(agent_path, prompt))
            .await
            .map_err(|e| e.to_string())?;

        info!(step = %step_id, tokens = kernel.total_tokens(), "workflow step done");
        Ok(StepOutput {
            record: json!({ "result": result }),
            tokens: kernel.total_tokens(),
        })
    }
}
