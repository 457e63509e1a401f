//! Sessions — the live execution of one activation

use agentmesh_core::{Activation, Message, Role, SessionStatus, ToolCallRecord};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Exactly one live session exists per activation. The cancellation handle
/// lives as long as the session is running; terminal statuses are sticky.
pub struct Session {
    pub activation: Activation,
    status: Mutex<SessionStatus>,
    history: RwLock<Vec<Message>>,
    tool_calls: RwLock<Vec<ToolCallRecord>>,
    token_count: AtomicUsize,
    /// Children this activation already had when the session started.
    pub initial_child_count: usize,
    /// Spawns performed by this session's own tool calls.
    spawn_count: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(activation: Activation, initial_child_count: usize, cancel: CancellationToken) -> Self {
        Self {
            activation,
            status: Mutex::new(SessionStatus::Running),
            history: RwLock::new(Vec::new()),
            tool_calls: RwLock::new(Vec::new()),
            token_count: AtomicUsize::new(0),
            initial_child_count,
            spawn_count: Arc::new(AtomicUsize::new(0)),
            cancel,
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock().unwrap()
    }

    /// Transition status. Terminal statuses stick; later transitions are
    /// ignored.
    pub fn set_status(&self, status: SessionStatus) {
        let mut current = self.status.lock().unwrap();
        if !current.is_terminal() {
            *current = status;
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn spawn_counter(&self) -> Arc<AtomicUsize> {
        self.spawn_count.clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawn_count.load(Ordering::SeqCst)
    }

    pub async fn push_message(&self, message: Message) {
        self.history.write().await.push(message);
    }

    pub async fn history(&self) -> Vec<Message> {
        self.history.read().await.clone()
    }

    pub async fn message_count(&self) -> usize {
        self.history.read().await.len()
    }

    /// Final assistant text: the content of the last model message.
    pub async fn final_text(&self) -> String {
        self.history
            .read()
            .await
            .iter()
            .rev()
            .find(|m| m.role == Role::Model)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    pub async fn record_tool_call(&self, id: &str, name: &str, args: serde_json::Value, result: &str) {
        self.tool_calls.write().await.push(ToolCallRecord {
            id: id.to_string(),
            name: name.to_string(),
            args,
            result: result.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub async fn tool_calls(&self) -> Vec<ToolCallRecord> {
        self.tool_calls.read().await.clone()
    }

    pub fn add_tokens(&self, tokens: usize) {
        self.token_count.fetch_add(tokens, Ordering::SeqCst);
    }

    pub fn token_count(&self) -> usize {
        self.token_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            Activation::new("agents/a.md", "hi"),
            0,
            CancellationToken::new(),
        )
    }

    #[test]
    fn terminal_status_is_sticky() {
        let s = session();
        assert_eq!(s.status(), SessionStatus::Running);
        s.set_status(SessionStatus::Completed);
        s.set_status(SessionStatus::Error);
        assert_eq!(s.status(), SessionStatus::Completed);
    }

    #[tokio::test]
    async fn final_text_is_last_model_message() {
        let s = session();
        s.push_message(Message::user("hi")).await;
        s.push_message(Message::model("first")).await;
        s.push_message(Message::tool_result("t1", "res")).await;
        s.push_message(Message::model("second")).await;
        assert_eq!(s.final_text().await, "second");
    }

    #[test]
    fn token_accumulation() {
        let s = session();
        s.add_tokens(5);
        s.add_tokens(7);
        assert_eq!(s.token_count(), 12);
    }
}
