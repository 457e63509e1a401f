//! Semantic vector store interface
//!
//! The runtime treats semantic memory as an external collaborator: sessions
//! receive an optional handle and call through this trait only.

use async_trait::async_trait;

#[derive(Clone, Debug)]
pub struct VectorHit {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, id: &str, text: &str, metadata: serde_json::Value) -> Result<(), String>;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<VectorHit>, String>;

    async fn delete(&self, id: &str) -> Result<(), String>;
}
