//! The kernel — activation scheduler and per-session model/tool loop
//!
//! Owns the priority queue of activations, runs up to `max_concurrency`
//! sessions in parallel, and drives each session to a terminal state while
//! enforcing depth, fanout, turn, and token budgets.

use crate::session::Session;
use agentmesh_core::{
    Activation, ActivationId, Error, EventKind, Limits, Message, Result, SessionStatus,
};
use agentmesh_llm::{AiProvider, ChatConfig, StreamChunk};
use agentmesh_store::{
    AgentRegistry, Blackboard, EventLog, PubSub, TaskQueueStore, VectorStore, Vfs, WorkingMemory,
};
use agentmesh_tools::{
    registry_for_profile, ActivationSink, McpClientManager, SyncRunner, ToolContext, ToolRegistry,
};
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::json;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MAX_TOOL_RESULT_CHARS: usize = 50_000;

/// External collaborators handed to the kernel per run. Surfaces are
/// ownership-inverted services, constructed and cleared by the controller.
#[derive(Clone)]
pub struct KernelEnv {
    pub provider: Arc<dyn AiProvider>,
    pub tools: ToolRegistry,
    pub vfs: Arc<Vfs>,
    pub registry: Arc<AgentRegistry>,
    pub event_log: Arc<EventLog>,
    pub memory: Arc<WorkingMemory>,
    pub task_queue: Arc<TaskQueueStore>,
    pub blackboard: Arc<Blackboard>,
    pub pubsub: Arc<PubSub>,
    pub vector_store: Option<Arc<dyn VectorStore>>,
    pub mcp: Arc<McpClientManager>,
}

#[derive(Clone, Debug)]
pub struct KernelConfig {
    pub limits: Limits,
    pub default_model: String,
    pub api_key: Option<String>,
    pub search_api_key: Option<String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            default_model: "claude-sonnet-4-20250514".to_string(),
            api_key: None,
            search_api_key: None,
        }
    }
}

/// Counters surfaced to the run controller on every session update.
#[derive(Clone, Copy, Debug, Default)]
pub struct KernelStats {
    pub active_sessions: usize,
    pub queue_length: usize,
    pub total_tokens: usize,
    pub completed_sessions: usize,
}

/// Streaming session events for UIs.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Text {
        activation: ActivationId,
        text: String,
    },
    ToolStarted {
        activation: ActivationId,
        call_id: String,
        name: String,
    },
    ToolFinished {
        activation: ActivationId,
        call_id: String,
        name: String,
        is_error: bool,
    },
    StatusChanged {
        activation: ActivationId,
        status: SessionStatus,
    },
}

/// Queue entry ordered min-first on (priority, seq); seq realizes FIFO on
/// priority ties.
struct Queued(Activation);

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.seq == other.0.seq
    }
}
impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so that BinaryHeap::pop yields the smallest pair
        other
            .0
            .priority
            .cmp(&self.0.priority)
            .then(other.0.seq.cmp(&self.0.seq))
    }
}

type UpdateCallback = Box<dyn Fn(KernelStats) + Send + Sync>;

pub(crate) struct KernelInner {
    /// Self-handle so tool contexts can carry the kernel as a trait object.
    weak_self: std::sync::Weak<KernelInner>,
    env: KernelEnv,
    config: KernelConfig,

    queue: Mutex<BinaryHeap<Queued>>,
    seq: AtomicU64,
    paused: AtomicBool,
    killed: AtomicBool,
    active: AtomicUsize,
    total_tokens: AtomicUsize,

    sessions: DashMap<String, Arc<Session>>,
    completed: Mutex<Vec<Arc<Session>>>,
    /// activation id -> agent path, for parent resolution
    agent_of: DashMap<String, String>,
    /// activation id -> number of children enqueued under it
    children_of: DashMap<String, usize>,

    root_cancel: CancellationToken,
    notify: Notify,
    output_tx: broadcast::Sender<SessionEvent>,
    on_update: Mutex<Option<UpdateCallback>>,
    memory_snapshot: Mutex<Option<String>>,
}

#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    pub fn new(env: KernelEnv, config: KernelConfig) -> Self {
        let (output_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new_cyclic(|weak_self| KernelInner {
                weak_self: weak_self.clone(),
                env,
                config,
                queue: Mutex::new(BinaryHeap::new()),
                seq: AtomicU64::new(0),
                paused: AtomicBool::new(false),
                killed: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                total_tokens: AtomicUsize::new(0),
                sessions: DashMap::new(),
                completed: Mutex::new(Vec::new()),
                agent_of: DashMap::new(),
                children_of: DashMap::new(),
                root_cancel: CancellationToken::new(),
                notify: Notify::new(),
                output_tx,
                on_update: Mutex::new(None),
                memory_snapshot: Mutex::new(None),
            }),
        }
    }

    /// Place an activation on the queue. Returns immediately; rejections are
    /// surfaced as error events and an Err.
    pub fn enqueue(&self, activation: Activation) -> Result<ActivationId> {
        self.inner.enqueue(activation)
    }

    /// Drain the queue: resolves when no sessions run and nothing is queued.
    pub async fn run_until_empty(&self) {
        loop {
            self.inner.dispatch();
            if self.inner.is_idle() {
                break;
            }
            let notified = self.inner.notify.notified();
            // Re-check between arming the waiter and awaiting, so a wakeup
            // that landed in the gap is not lost.
            self.inner.dispatch();
            if self.inner.is_idle() {
                break;
            }
            notified.await;
        }
        info!(
            tokens = self.inner.total_tokens.load(Ordering::SeqCst),
            completed = self.inner.completed.lock().unwrap().len(),
            "kernel idle"
        );
    }

    /// Gate dispatch of new sessions. In-flight sessions continue.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Cancel every running session and clear the queue.
    pub fn kill_all(&self) {
        self.inner.killed.store(true, Ordering::SeqCst);
        self.inner.queue.lock().unwrap().clear();
        self.inner.root_cancel.cancel();
        self.inner.notify.notify_waiters();
        info!("kill_all issued");
    }

    /// Run a single activation inline and return the final assistant text.
    /// Used by the workflow engine and synchronous custom tools.
    pub async fn run_session_and_return(&self, activation: Activation) -> Result<String> {
        self.inner.clone().run_and_return(activation).await
    }

    pub fn stats(&self) -> KernelStats {
        self.inner.stats()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    pub fn total_tokens(&self) -> usize {
        self.inner.total_tokens.load(Ordering::SeqCst)
    }

    pub fn session(&self, id: &ActivationId) -> Option<Arc<Session>> {
        self.inner.sessions.get(id.as_str()).map(|s| s.clone())
    }

    pub fn completed_sessions(&self) -> Vec<Arc<Session>> {
        self.inner.completed.lock().unwrap().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.output_tx.subscribe()
    }

    pub fn set_on_session_update(&self, callback: impl Fn(KernelStats) + Send + Sync + 'static) {
        *self.inner.on_update.lock().unwrap() = Some(Box::new(callback));
    }

    /// Set by the run controller when a run ends.
    pub fn set_memory_snapshot(&self, snapshot: String) {
        *self.inner.memory_snapshot.lock().unwrap() = Some(snapshot);
    }

    pub fn memory_snapshot(&self) -> Option<String> {
        self.inner.memory_snapshot.lock().unwrap().clone()
    }
}

impl KernelInner {
    fn arc(&self) -> Arc<KernelInner> {
        self.weak_self
            .upgrade()
            .expect("kernel inner outlives its sessions")
    }

    fn stats(&self) -> KernelStats {
        KernelStats {
            active_sessions: self.active.load(Ordering::SeqCst),
            queue_length: self.queue.lock().unwrap().len(),
            total_tokens: self.total_tokens.load(Ordering::SeqCst),
            completed_sessions: self.completed.lock().unwrap().len(),
        }
    }

    fn is_idle(&self) -> bool {
        self.active.load(Ordering::SeqCst) == 0 && self.queue.lock().unwrap().is_empty()
    }

    fn fire_update(&self) {
        if let Some(callback) = self.on_update.lock().unwrap().as_ref() {
            callback(self.stats());
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.output_tx.send(event);
    }

    fn enqueue(&self, mut activation: Activation) -> Result<ActivationId> {
        let limits = &self.config.limits;

        if activation.spawn_depth > limits.max_depth {
            let err = Error::DepthExceeded {
                depth: activation.spawn_depth,
                max: limits.max_depth,
            };
            self.env.event_log.append(
                EventKind::Error,
                Some(&activation.agent_path),
                Some(activation.id.as_str()),
                json!({ "message": err.to_string() }),
            );
            return Err(err);
        }

        if self.env.registry.get(&activation.agent_path).is_none() {
            let err = Error::UnknownAgent(activation.agent_path.clone());
            self.env.event_log.append(
                EventKind::Error,
                Some(&activation.agent_path),
                Some(activation.id.as_str()),
                json!({ "message": err.to_string() }),
            );
            return Err(err);
        }

        let used = self.total_tokens.load(Ordering::SeqCst);
        if used > limits.token_budget {
            let err = Error::TokenBudgetExceeded {
                used,
                budget: limits.token_budget,
            };
            self.env.event_log.append(
                EventKind::Error,
                Some(&activation.agent_path),
                Some(activation.id.as_str()),
                json!({ "message": err.to_string() }),
            );
            return Err(err);
        }

        activation.seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let id = activation.id.clone();

        self.agent_of
            .insert(id.as_str().to_string(), activation.agent_path.clone());
        if let Some(parent) = &activation.parent_id {
            *self
                .children_of
                .entry(parent.as_str().to_string())
                .or_insert(0) += 1;
        }

        self.env.event_log.append(
            EventKind::Activation,
            Some(&activation.agent_path),
            Some(id.as_str()),
            json!({ "input": activation.input }),
        );
        debug!(agent = %activation.agent_path, id = %id, priority = activation.priority, "enqueued");

        self.queue.lock().unwrap().push(Queued(activation));
        self.notify.notify_waiters();
        Ok(id)
    }

    /// Start sessions while capacity allows.
    fn dispatch(&self) {
        loop {
            if self.paused.load(Ordering::SeqCst) || self.killed.load(Ordering::SeqCst) {
                return;
            }
            if self.active.load(Ordering::SeqCst) >= self.config.limits.max_concurrency {
                return;
            }
            let next = self.queue.lock().unwrap().pop();
            let Some(Queued(activation)) = next else {
                return;
            };

            self.active.fetch_add(1, Ordering::SeqCst);
            let inner = self.arc();
            tokio::spawn(async move {
                inner.clone().run_session(activation).await;
                inner.active.fetch_sub(1, Ordering::SeqCst);
                inner.notify.notify_waiters();
                inner.fire_update();
            });
        }
    }

    async fn run_and_return(self: Arc<Self>, activation: Activation) -> Result<String> {
        if self.env.registry.get(&activation.agent_path).is_none() {
            return Err(Error::UnknownAgent(activation.agent_path));
        }
        if activation.spawn_depth > self.config.limits.max_depth {
            return Err(Error::DepthExceeded {
                depth: activation.spawn_depth,
                max: self.config.limits.max_depth,
            });
        }

        self.agent_of
            .insert(activation.id.as_str().to_string(), activation.agent_path.clone());
        self.env.event_log.append(
            EventKind::Activation,
            Some(&activation.agent_path),
            Some(activation.id.as_str()),
            json!({ "input": activation.input }),
        );

        self.active.fetch_add(1, Ordering::SeqCst);
        let session = self.clone().run_session(activation).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.fire_update();

        match session.status() {
            SessionStatus::Completed => Ok(session.final_text().await),
            SessionStatus::Aborted => Err(Error::Aborted),
            other => Err(Error::Internal(format!(
                "session ended with status {:?}",
                other
            ))),
        }
    }

    /// Drive one session to a terminal state.
    async fn run_session(self: Arc<Self>, activation: Activation) -> Arc<Session> {
        let activation_id = activation.id.clone();
        let agent_path = activation.agent_path.clone();

        let initial_child_count = self
            .children_of
            .get(activation_id.as_str())
            .map(|c| *c)
            .unwrap_or(0);
        let session = Arc::new(Session::new(
            activation.clone(),
            initial_child_count,
            self.root_cancel.child_token(),
        ));
        self.sessions
            .insert(activation_id.as_str().to_string(), session.clone());

        let Some(profile) = self.env.registry.get(&agent_path) else {
            self.fail_session(&session, format!("unknown agent: {}", agent_path))
                .await;
            return session;
        };

        // Per-session tool registry: allow-list + custom tools + MCP bridges.
        let mut session_tools = registry_for_profile(&self.env.tools, &profile);
        for server in &profile.mcp_servers {
            match self.env.mcp.connect(server, &self.env.event_log).await {
                Ok(_) => {
                    session_tools =
                        session_tools.clone_with_extras(self.env.mcp.plugins_for(&server.name));
                }
                Err(e) => warn!(server = %server.name, "MCP connect failed: {}", e),
            }
        }

        let system_prompt = build_system_prompt(&profile.system_prompt, &session_tools);
        let model = profile
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());

        session
            .push_message(Message::user(activation.input.clone()))
            .await;

        let cancel = session.cancel_token().clone();
        let specs = session_tools.specs();
        let mut turns = 0usize;

        loop {
            if cancel.is_cancelled() {
                self.abort_session(&session).await;
                return session;
            }

            turns += 1;
            if turns > self.config.limits.max_turns {
                self.fail_session(&session, "max follow-up turns exceeded".to_string())
                    .await;
                return session;
            }

            let chat_config = ChatConfig {
                session_id: activation_id.as_str().to_string(),
                model: model.clone(),
                api_key: self.config.api_key.clone().unwrap_or_default(),
                system: Some(system_prompt.clone()),
                max_tokens: 8192,
                temperature: None,
            };

            let history = session.history().await;
            let stream = match self
                .env
                .provider
                .chat(chat_config, &history, &specs)
                .await
            {
                Ok(s) => s,
                Err(e) => {
                    self.fail_session(&session, e.to_string()).await;
                    return session;
                }
            };

            let mut text = String::new();
            let mut tool_calls = Vec::new();
            let mut turn_tokens = 0usize;
            let mut fatal: Option<String> = None;
            let mut aborted = false;

            tokio::pin!(stream);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        aborted = true;
                        break;
                    }
                    chunk = stream.next() => {
                        match chunk {
                            Some(Ok(StreamChunk::Text { text: t })) => {
                                text.push_str(&t);
                                self.emit(SessionEvent::Text {
                                    activation: activation_id.clone(),
                                    text: t,
                                });
                            }
                            Some(Ok(StreamChunk::ToolCall(tc))) => {
                                tool_calls.push(tc);
                            }
                            Some(Ok(StreamChunk::Done { token_count })) => {
                                turn_tokens = token_count;
                                break;
                            }
                            Some(Ok(StreamChunk::Error { message })) => {
                                fatal = Some(message);
                                break;
                            }
                            Some(Err(agentmesh_llm::LlmError::Aborted)) => {
                                aborted = true;
                                break;
                            }
                            Some(Err(e)) => {
                                fatal = Some(e.to_string());
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            if aborted {
                self.abort_session(&session).await;
                return session;
            }
            if let Some(message) = fatal {
                self.fail_session(&session, message).await;
                return session;
            }

            session.add_tokens(turn_tokens);
            self.total_tokens.fetch_add(turn_tokens, Ordering::SeqCst);
            session.push_message(Message::model(text.clone())).await;

            if tool_calls.is_empty() {
                session.set_status(SessionStatus::Completed);
                self.env.provider.end_session(activation_id.as_str());
                self.env.event_log.append(
                    EventKind::Complete,
                    Some(&agent_path),
                    Some(activation_id.as_str()),
                    json!({ "tokens": session.token_count() }),
                );
                self.emit(SessionEvent::StatusChanged {
                    activation: activation_id.clone(),
                    status: SessionStatus::Completed,
                });
                self.completed.lock().unwrap().push(session.clone());
                info!(agent = %agent_path, id = %activation_id, tokens = session.token_count(), "session complete");
                return session;
            }

            // Tool calls execute serially in the order the stream emitted
            // them; this keeps VFS side effects deterministic.
            for tc in tool_calls {
                if cancel.is_cancelled() {
                    self.abort_session(&session).await;
                    return session;
                }

                self.env.event_log.append(
                    EventKind::ToolCall,
                    Some(&agent_path),
                    Some(activation_id.as_str()),
                    json!({ "toolName": tc.name, "args": tc.args }),
                );
                self.emit(SessionEvent::ToolStarted {
                    activation: activation_id.clone(),
                    call_id: tc.id.clone(),
                    name: tc.name.clone(),
                });

                let ctx = self.tool_context(&session);
                let result = session_tools
                    .execute_cancellable(&tc.name, tc.args.clone(), &ctx, cancel.clone())
                    .await;
                let is_error = result.is_error();
                let result_str = truncate_result(result.to_content_string());

                session
                    .record_tool_call(&tc.id, &tc.name, tc.args.clone(), &result_str)
                    .await;
                session
                    .push_message(Message::tool_result(tc.id.clone(), result_str.clone()))
                    .await;

                self.env.event_log.append(
                    EventKind::ToolResult,
                    Some(&agent_path),
                    Some(activation_id.as_str()),
                    json!({ "toolName": tc.name, "result": result_str }),
                );
                self.emit(SessionEvent::ToolFinished {
                    activation: activation_id.clone(),
                    call_id: tc.id,
                    name: tc.name,
                    is_error,
                });
            }

            self.fire_update();
            // Follow-up turn with the tool results appended.
        }
    }

    fn tool_context(&self, session: &Arc<Session>) -> ToolContext {
        let arc = self.arc();
        let activation = &session.activation;
        let parent_agent = activation
            .parent_id
            .as_ref()
            .and_then(|p| self.agent_of.get(p.as_str()).map(|a| a.clone()));

        ToolContext {
            vfs: self.env.vfs.clone(),
            registry: self.env.registry.clone(),
            event_log: self.env.event_log.clone(),
            current_agent: activation.agent_path.clone(),
            current_activation: activation.id.clone(),
            parent_agent,
            spawn_depth: activation.spawn_depth,
            max_depth: self.config.limits.max_depth,
            max_fanout: self.config.limits.max_fanout,
            child_count: session.initial_child_count,
            spawn_count: session.spawn_counter(),
            spawner: arc.clone() as Arc<dyn ActivationSink>,
            sync_runner: Some(arc as Arc<dyn SyncRunner>),
            api_key: self.config.api_key.clone(),
            preferred_model: None,
            search_api_key: self.config.search_api_key.clone(),
            memory: Some(self.env.memory.clone()),
            task_queue: Some(self.env.task_queue.clone()),
            blackboard: Some(self.env.blackboard.clone()),
            pubsub: Some(self.env.pubsub.clone()),
            vector_store: self.env.vector_store.clone(),
        }
    }

    async fn abort_session(&self, session: &Arc<Session>) {
        let activation_id = session.activation.id.clone();
        self.env.provider.abort(activation_id.as_str());
        self.env.provider.end_session(activation_id.as_str());
        session.set_status(SessionStatus::Aborted);
        self.env.event_log.append(
            EventKind::Abort,
            Some(&session.activation.agent_path),
            Some(activation_id.as_str()),
            json!({}),
        );
        self.emit(SessionEvent::StatusChanged {
            activation: activation_id.clone(),
            status: SessionStatus::Aborted,
        });
        self.completed.lock().unwrap().push(session.clone());
        info!(id = %activation_id, "session aborted");
    }

    async fn fail_session(&self, session: &Arc<Session>, message: String) {
        let activation_id = session.activation.id.clone();
        self.env.provider.end_session(activation_id.as_str());
        session.set_status(SessionStatus::Error);
        self.env.event_log.append(
            EventKind::Error,
            Some(&session.activation.agent_path),
            Some(activation_id.as_str()),
            json!({ "message": message }),
        );
        self.emit(SessionEvent::StatusChanged {
            activation: activation_id.clone(),
            status: SessionStatus::Error,
        });
        self.completed.lock().unwrap().push(session.clone());
        warn!(id = %activation_id, "session error: {}", message);
    }
}

impl ActivationSink for KernelInner {
    fn spawn_activation(&self, activation: Activation) {
        // Budgets were checked by the tool; enqueue re-validates and logs.
        let _ = self.enqueue(activation);
    }
}

#[async_trait::async_trait]
impl SyncRunner for KernelInner {
    async fn run_session_and_return(
        &self,
        activation: Activation,
    ) -> std::result::Result<String, String> {
        // The calling session is suspended while this runs, so its slot is
        // effectively free; no extra concurrency permit is taken.
        self.arc()
            .run_and_return(activation)
            .await
            .map_err(|e| e.to_string())
    }
}

fn truncate_result(result: String) -> String {
    if result.len() <= MAX_TOOL_RESULT_CHARS {
        return result;
    }
    let mut cut = MAX_TOOL_RESULT_CHARS;
    while !result.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}...\n[truncated, {} total chars]",
        &result[..cut],
        result.len()
    )
}

/// System prompt: profile body, the tool directory, then collaboration
/// hints.
fn build_system_prompt(body: &str, tools: &ToolRegistry) -> String {
    let mut prompt = body.trim().to_string();

    if !tools.is_empty() {
        prompt.push_str("\n\n## Available tools\n");
        prompt.push_str(&tools.directory());
    }

    prompt.push_str(
        "\n\n## Collaboration\n\
         Shared surfaces connect you to other agents in this run: the \
         blackboard for small signals, working memory for tagged notes, and \
         the task queue for durable follow-ups. Prefer recording important \
         findings in working memory so later sessions can pick them up.",
    );
    prompt
}
