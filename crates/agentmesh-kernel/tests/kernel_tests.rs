//! Kernel tests: scheduling, the session loop, budgets, and cancellation

use agentmesh_core::{Activation, EventKind, Limits, Role, SessionStatus};
use agentmesh_kernel::{Kernel, KernelConfig, KernelEnv};
use agentmesh_llm::{AiProvider, ScriptedProvider, ScriptedStep};
use agentmesh_store::{
    AgentRegistry, Blackboard, EventLog, PubSub, TaskQueueStore, Vfs, WorkingMemory, WriteMeta,
};
use agentmesh_tools::{create_default_registry, McpClientManager};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ===========================================================================
// Harness
// ===========================================================================

struct Fixture {
    env: KernelEnv,
    vfs: Arc<Vfs>,
    event_log: Arc<EventLog>,
}

fn fixture(provider: Arc<dyn AiProvider>) -> Fixture {
    let vfs = Arc::new(Vfs::new());
    let registry = AgentRegistry::attached(&vfs);
    let event_log = Arc::new(EventLog::new(vfs.clone()));
    let env = KernelEnv {
        provider,
        tools: create_default_registry(),
        vfs: vfs.clone(),
        registry,
        event_log: event_log.clone(),
        memory: Arc::new(WorkingMemory::new()),
        task_queue: Arc::new(TaskQueueStore::new()),
        blackboard: Arc::new(Blackboard::new()),
        pubsub: Arc::new(PubSub::new()),
        vector_store: None,
        mcp: Arc::new(McpClientManager::new()),
    };
    Fixture {
        env,
        vfs,
        event_log,
    }
}

fn write_agent(vfs: &Vfs, path: &str, name: &str, body: &str) {
    vfs.write(
        path,
        format!("---\nname: {}\n---\n{}", name, body),
        WriteMeta::default(),
    );
}

fn config_with(limits: Limits) -> KernelConfig {
    KernelConfig {
        limits,
        ..KernelConfig::default()
    }
}

fn serial_limits() -> Limits {
    Limits {
        max_concurrency: 1,
        ..Limits::default()
    }
}

// ===========================================================================
// Single-shot text (S1)
// ===========================================================================

#[tokio::test]
async fn single_shot_text_session() {
    let provider = Arc::new(ScriptedProvider::sequence(vec![ScriptedStep::text(
        "hello", 5,
    )]));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/a.md", "A", "Echo the user.");

    let kernel = Kernel::new(fx.env.clone(), config_with(Limits::default()));
    kernel
        .enqueue(Activation::new("agents/a.md", "hello"))
        .unwrap();
    kernel.run_until_empty().await;

    assert!(kernel.is_idle());
    assert_eq!(kernel.total_tokens(), 5);

    let sessions = kernel.completed_sessions();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.status(), SessionStatus::Completed);
    assert_eq!(session.token_count(), 5);

    let history = session.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "hello");
    assert_eq!(history[1].role, Role::Model);
    assert_eq!(history[1].content, "hello");

    let completes: Vec<_> = fx
        .event_log
        .entries()
        .into_iter()
        .filter(|e| e.kind == EventKind::Complete)
        .collect();
    assert_eq!(completes.len(), 1);
    assert_eq!(completes[0].data["tokens"], json!(5));
}

// ===========================================================================
// Spawn with depth/fanout limits (S2)
// ===========================================================================

#[tokio::test]
async fn spawn_respects_fanout_limit() {
    let worker_md = "---\nname: W\n---\nHi";
    let provider = Arc::new(ScriptedProvider::sequence(vec![
        ScriptedStep::tool_call(
            "spawn_agent",
            json!({ "filename": "w.md", "content": worker_md, "task": "t" }),
        ),
        ScriptedStep::tool_call(
            "spawn_agent",
            json!({ "filename": "w2.md", "content": worker_md, "task": "t2" }),
        ),
        ScriptedStep::text("done", 1),
        // The spawned worker's own session
        ScriptedStep::text("hi from worker", 1),
    ]));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/lead.md", "Lead", "Coordinate.");

    let limits = Limits {
        max_depth: 1,
        max_fanout: 1,
        max_concurrency: 1,
        ..Limits::default()
    };
    let kernel = Kernel::new(fx.env.clone(), config_with(limits));
    kernel
        .enqueue(Activation::new("agents/lead.md", "go"))
        .unwrap();
    kernel.run_until_empty().await;

    // First spawn created and registered the worker file and its activation
    assert!(fx.vfs.read("agents/w.md").is_some());
    let sessions = kernel.completed_sessions();
    assert_eq!(sessions.len(), 2, "lead + spawned worker");

    let lead = sessions
        .iter()
        .find(|s| s.activation.agent_path == "agents/lead.md")
        .unwrap();
    let worker = sessions
        .iter()
        .find(|s| s.activation.agent_path == "agents/w.md")
        .unwrap();
    assert_eq!(worker.activation.spawn_depth, 1);
    assert_eq!(
        worker.activation.parent_id.as_ref().unwrap().as_str(),
        lead.activation.id.as_str()
    );

    // Second spawn hit the fanout limit; no second worker file
    let calls = lead.tool_calls().await;
    assert_eq!(calls.len(), 2);
    assert!(calls[0].result.contains("spawned agents/w.md"));
    assert_eq!(calls[1].result, "Error: fanout limit reached");
    assert!(fx.vfs.read("agents/w2.md").is_none());

    let spawns: Vec<_> = fx
        .event_log
        .entries()
        .into_iter()
        .filter(|e| e.kind == EventKind::Spawn)
        .collect();
    assert_eq!(spawns.len(), 1);
    assert_eq!(spawns[0].data["spawned"], json!("agents/w.md"));
    assert_eq!(spawns[0].data["depth"], json!(1));
}

#[tokio::test]
async fn spawn_depth_limit_blocks_grandchildren() {
    let worker_md = "---\nname: W\n---\nHi";
    let provider = Arc::new(ScriptedProvider::sequence(vec![
        // lead spawns a child (depth 1 == max, so the child cannot spawn)
        ScriptedStep::tool_call(
            "spawn_agent",
            json!({ "filename": "w.md", "content": worker_md, "task": "t" }),
        ),
        ScriptedStep::text("lead done", 1),
        // worker tries to spawn a grandchild
        ScriptedStep::tool_call(
            "spawn_agent",
            json!({ "filename": "g.md", "content": worker_md, "task": "t" }),
        ),
        ScriptedStep::text("worker done", 1),
    ]));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/lead.md", "Lead", "Coordinate.");

    let limits = Limits {
        max_depth: 1,
        max_fanout: 5,
        max_concurrency: 1,
        ..Limits::default()
    };
    let kernel = Kernel::new(fx.env.clone(), config_with(limits));
    kernel
        .enqueue(Activation::new("agents/lead.md", "go"))
        .unwrap();
    kernel.run_until_empty().await;

    let sessions = kernel.completed_sessions();
    let worker = sessions
        .iter()
        .find(|s| s.activation.agent_path == "agents/w.md")
        .unwrap();
    let calls = worker.tool_calls().await;
    assert_eq!(calls[0].result, "Error: depth limit reached");
    assert!(fx.vfs.read("agents/g.md").is_none());
}

// ===========================================================================
// Enqueue-time rejections
// ===========================================================================

#[tokio::test]
async fn enqueue_rejects_unknown_agent() {
    let provider = Arc::new(ScriptedProvider::constant(ScriptedStep::text("x", 1)));
    let fx = fixture(provider);

    let kernel = Kernel::new(fx.env.clone(), config_with(Limits::default()));
    let err = kernel.enqueue(Activation::new("agents/ghost.md", "hi"));
    assert!(err.is_err());

    let errors: Vec<_> = fx
        .event_log
        .entries()
        .into_iter()
        .filter(|e| e.kind == EventKind::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].data["message"]
        .as_str()
        .unwrap()
        .contains("unknown agent"));
}

#[tokio::test]
async fn enqueue_rejects_over_depth() {
    let provider = Arc::new(ScriptedProvider::constant(ScriptedStep::text("x", 1)));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/a.md", "A", "B");

    let kernel = Kernel::new(fx.env.clone(), config_with(Limits::default()));
    let mut activation = Activation::new("agents/a.md", "hi");
    activation.spawn_depth = Limits::default().max_depth + 1;
    assert!(kernel.enqueue(activation).is_err());
}

#[tokio::test]
async fn enqueue_rejects_once_token_budget_spent() {
    let provider = Arc::new(ScriptedProvider::constant(ScriptedStep::text("x", 10)));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/a.md", "A", "B");

    let limits = Limits {
        token_budget: 8,
        max_concurrency: 1,
        ..Limits::default()
    };
    let kernel = Kernel::new(fx.env.clone(), config_with(limits));

    kernel
        .enqueue(Activation::new("agents/a.md", "one"))
        .unwrap();
    kernel.run_until_empty().await;
    assert_eq!(kernel.total_tokens(), 10);

    // 10 tokens spent >= budget of 8: next enqueue is rejected
    assert!(kernel.enqueue(Activation::new("agents/a.md", "two")).is_err());
}

// ===========================================================================
// Priority ordering (S6)
// ===========================================================================

#[tokio::test]
async fn priority_ordering_min_first() {
    let provider = Arc::new(ScriptedProvider::constant(ScriptedStep::text("ok", 1)));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/a.md", "A", "B");

    let kernel = Kernel::new(fx.env.clone(), config_with(serial_limits()));
    for priority in [2, 0, 1] {
        kernel
            .enqueue(Activation::new("agents/a.md", "x").with_priority(priority))
            .unwrap();
    }
    kernel.run_until_empty().await;

    let order: Vec<i32> = kernel
        .completed_sessions()
        .iter()
        .map(|s| s.activation.priority)
        .collect();
    assert_eq!(order, vec![0, 1, 2]);
}

#[tokio::test]
async fn equal_priorities_run_fifo() {
    let provider = Arc::new(ScriptedProvider::constant(ScriptedStep::text("ok", 1)));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/a.md", "A", "B");

    let kernel = Kernel::new(fx.env.clone(), config_with(serial_limits()));
    for input in ["first", "second", "third"] {
        kernel.enqueue(Activation::new("agents/a.md", input)).unwrap();
    }
    kernel.run_until_empty().await;

    let order: Vec<String> = kernel
        .completed_sessions()
        .iter()
        .map(|s| s.activation.input.clone())
        .collect();
    assert_eq!(order, vec!["first", "second", "third"]);
}

// ===========================================================================
// Cancellation (S5)
// ===========================================================================

#[tokio::test]
async fn kill_all_aborts_streaming_sessions() {
    let provider = Arc::new(ScriptedProvider::constant(ScriptedStep::StreamForever {
        chunk: "tick".into(),
        interval_ms: 10,
    }));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/a.md", "A", "B");

    let kernel = Kernel::new(fx.env.clone(), config_with(serial_limits()));
    kernel
        .enqueue(Activation::new("agents/a.md", "stream forever"))
        .unwrap();

    let runner = {
        let kernel = kernel.clone();
        tokio::spawn(async move { kernel.run_until_empty().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    kernel.kill_all();

    tokio::time::timeout(Duration::from_millis(250), runner)
        .await
        .expect("run_until_empty resolves after kill_all")
        .unwrap();

    assert!(kernel.is_idle());
    let stats = kernel.stats();
    assert_eq!(stats.active_sessions, 0);
    assert_eq!(stats.queue_length, 0);

    let sessions = kernel.completed_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status(), SessionStatus::Aborted);

    assert!(fx
        .event_log
        .entries()
        .iter()
        .any(|e| e.kind == EventKind::Abort));
}

#[tokio::test]
async fn kill_all_clears_queued_activations() {
    let provider = Arc::new(ScriptedProvider::constant(ScriptedStep::StreamForever {
        chunk: "tick".into(),
        interval_ms: 10,
    }));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/a.md", "A", "B");

    let kernel = Kernel::new(fx.env.clone(), config_with(serial_limits()));
    for _ in 0..3 {
        kernel.enqueue(Activation::new("agents/a.md", "x")).unwrap();
    }
    let runner = {
        let kernel = kernel.clone();
        tokio::spawn(async move { kernel.run_until_empty().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    kernel.kill_all();
    tokio::time::timeout(Duration::from_millis(250), runner)
        .await
        .unwrap()
        .unwrap();

    // One session started and was aborted; the two queued ones never ran
    assert_eq!(kernel.stats().queue_length, 0);
    assert_eq!(kernel.completed_sessions().len(), 1);
}

// ===========================================================================
// Pause / resume
// ===========================================================================

#[tokio::test]
async fn pause_gates_dispatch_until_resume() {
    let provider = Arc::new(ScriptedProvider::constant(ScriptedStep::text("ok", 1)));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/a.md", "A", "B");

    let kernel = Kernel::new(fx.env.clone(), config_with(serial_limits()));
    kernel.pause();
    kernel.enqueue(Activation::new("agents/a.md", "x")).unwrap();

    let runner = {
        let kernel = kernel.clone();
        tokio::spawn(async move { kernel.run_until_empty().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!runner.is_finished(), "paused kernel must not drain");
    assert_eq!(kernel.stats().queue_length, 1);

    kernel.resume();
    tokio::time::timeout(Duration::from_millis(500), runner)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kernel.completed_sessions().len(), 1);
}

// ===========================================================================
// Session history shape and tool-call ordering
// ===========================================================================

#[tokio::test]
async fn tool_round_history_shape() {
    let provider = Arc::new(ScriptedProvider::sequence(vec![
        ScriptedStep::ToolCalls {
            calls: vec![
                ("vfs_write".into(), json!({ "path": "notes/a.md", "content": "one" })),
                ("vfs_read".into(), json!({ "path": "notes/a.md" })),
            ],
            tokens: 2,
        },
        ScriptedStep::text("all done", 3),
    ]));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/a.md", "A", "B");

    let kernel = Kernel::new(fx.env.clone(), config_with(serial_limits()));
    kernel.enqueue(Activation::new("agents/a.md", "go")).unwrap();
    kernel.run_until_empty().await;

    let sessions = kernel.completed_sessions();
    let session = &sessions[0];
    let history = session.history().await;

    // user, model(turn1), tool, tool, model(turn2)
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Model, Role::Tool, Role::Tool, Role::Model]
    );
    assert_eq!(history.last().unwrap().role, Role::Model);
    assert_eq!(history.last().unwrap().content, "all done");

    // Tool results correspond to the emitted calls, in order
    let records = session.tool_calls().await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "vfs_write");
    assert_eq!(records[1].name, "vfs_read");
    assert_eq!(history[2].tool_call_id.as_deref(), Some(records[0].id.as_str()));
    assert_eq!(history[3].tool_call_id.as_deref(), Some(records[1].id.as_str()));

    // Side effects happened in emitted order: the read saw the write
    assert_eq!(records[1].result, "one");
    assert_eq!(session.token_count(), 5);
}

// ===========================================================================
// Provider failures
// ===========================================================================

#[tokio::test]
async fn stream_error_is_session_fatal() {
    let provider = Arc::new(ScriptedProvider::constant(ScriptedStep::Fail {
        message: "stream dropped".into(),
    }));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/a.md", "A", "B");

    let kernel = Kernel::new(fx.env.clone(), config_with(serial_limits()));
    kernel.enqueue(Activation::new("agents/a.md", "x")).unwrap();
    kernel.run_until_empty().await;

    let sessions = kernel.completed_sessions();
    assert_eq!(sessions[0].status(), SessionStatus::Error);
    assert!(fx
        .event_log
        .entries()
        .iter()
        .any(|e| e.kind == EventKind::Error
            && e.data["message"].as_str().unwrap_or_default().contains("stream dropped")));
}

#[tokio::test]
async fn tool_failure_is_not_fatal() {
    let provider = Arc::new(ScriptedProvider::sequence(vec![
        ScriptedStep::tool_call("vfs_delete", json!({ "path": "missing.md" })),
        ScriptedStep::text("recovered", 1),
    ]));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/a.md", "A", "B");

    let kernel = Kernel::new(fx.env.clone(), config_with(serial_limits()));
    kernel.enqueue(Activation::new("agents/a.md", "x")).unwrap();
    kernel.run_until_empty().await;

    let sessions = kernel.completed_sessions();
    assert_eq!(sessions[0].status(), SessionStatus::Completed);
    let calls = sessions[0].tool_calls().await;
    assert!(calls[0].result.starts_with("Error:"));
    assert_eq!(sessions[0].final_text().await, "recovered");
}

// ===========================================================================
// run_session_and_return
// ===========================================================================

#[tokio::test]
async fn run_session_and_return_yields_final_text() {
    let provider = Arc::new(ScriptedProvider::sequence(vec![ScriptedStep::text(
        "the answer", 4,
    )]));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/a.md", "A", "B");

    let kernel = Kernel::new(fx.env.clone(), config_with(Limits::default()));
    let text = kernel
        .run_session_and_return(Activation::new("agents/a.md", "q"))
        .await
        .unwrap();
    assert_eq!(text, "the answer");
    assert_eq!(kernel.total_tokens(), 4);
}

#[tokio::test]
async fn run_session_and_return_unknown_agent_errors() {
    let provider = Arc::new(ScriptedProvider::constant(ScriptedStep::text("x", 1)));
    let fx = fixture(provider);
    let kernel = Kernel::new(fx.env.clone(), config_with(Limits::default()));
    assert!(kernel
        .run_session_and_return(Activation::new("agents/none.md", "q"))
        .await
        .is_err());
}

// ===========================================================================
// Delegation and signalling through the queue
// ===========================================================================

#[tokio::test]
async fn delegate_enqueues_with_handoff_memory() {
    let provider = Arc::new(ScriptedProvider::sequence(vec![
        // lead: record a note, then delegate
        ScriptedStep::tool_call(
            "memory_write",
            json!({ "key": "finding", "value": "the cache is stale" }),
        ),
        ScriptedStep::tool_call(
            "delegate",
            json!({ "agent": "agents/helper.md", "task": "fix the cache" }),
        ),
        ScriptedStep::text("delegated", 1),
        // helper
        ScriptedStep::text("on it", 1),
    ]));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/lead.md", "Lead", "Coordinate.");
    write_agent(&fx.vfs, "agents/helper.md", "Helper", "Help.");

    let kernel = Kernel::new(fx.env.clone(), config_with(serial_limits()));
    kernel
        .enqueue(Activation::new("agents/lead.md", "go"))
        .unwrap();
    kernel.run_until_empty().await;

    let sessions = kernel.completed_sessions();
    let helper = sessions
        .iter()
        .find(|s| s.activation.agent_path == "agents/helper.md")
        .expect("helper ran");
    assert!(helper.activation.input.contains("fix the cache"));
    assert!(
        helper.activation.input.contains("the cache is stale"),
        "handoff packet embeds recent working memory: {}",
        helper.activation.input
    );
    assert_eq!(helper.activation.spawn_depth, 1);
}

#[tokio::test]
async fn signal_parent_reaches_parent_agent() {
    let worker_md = "---\nname: W\n---\nHi";
    let provider = Arc::new(ScriptedProvider::sequence(vec![
        // lead spawns worker
        ScriptedStep::tool_call(
            "spawn_agent",
            json!({ "filename": "w.md", "content": worker_md, "task": "t" }),
        ),
        ScriptedStep::text("lead done", 1),
        // worker signals upward
        ScriptedStep::tool_call("signal_parent", json!({ "message": "finished t" })),
        ScriptedStep::text("worker done", 1),
        // lead's signal-triggered activation
        ScriptedStep::text("ack", 1),
    ]));
    let fx = fixture(provider);
    write_agent(&fx.vfs, "agents/lead.md", "Lead", "Coordinate.");

    let limits = Limits {
        max_depth: 1,
        max_fanout: 2,
        max_concurrency: 1,
        ..Limits::default()
    };
    let kernel = Kernel::new(fx.env.clone(), config_with(limits));
    kernel
        .enqueue(Activation::new("agents/lead.md", "go"))
        .unwrap();
    kernel.run_until_empty().await;

    let sessions = kernel.completed_sessions();
    assert_eq!(sessions.len(), 3, "lead, worker, signal activation");
    let signalled = &sessions[2];
    assert_eq!(signalled.activation.agent_path, "agents/lead.md");
    assert!(signalled.activation.input.contains("finished t"));
    assert_eq!(signalled.activation.priority, 0);

    assert!(fx
        .event_log
        .entries()
        .iter()
        .any(|e| e.kind == EventKind::Signal));
}
