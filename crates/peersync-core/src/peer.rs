//! Collaborators the engine talks to but does not own.
//!
//! Implementations are injected as `Arc<dyn Trait>` through
//! [`SyncContext`](crate::engine::SyncContext), so every trait is object safe
//! and `Send + Sync`.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::protocol::SyncMessage;

/// Type-specific record storage (knowledge items, members, projects, ...)
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Current record data, `None` when the record does not exist
    async fn get(&self, org_id: &str, resource_type: &str, resource_id: &str)
        -> Result<Option<Value>>;

    /// Create a record
    async fn insert(
        &self,
        org_id: &str,
        resource_type: &str,
        resource_id: &str,
        data: &Value,
    ) -> Result<()>;

    /// Replace an existing record; returns `false` when it does not exist
    async fn update(
        &self,
        org_id: &str,
        resource_type: &str,
        resource_id: &str,
        data: &Value,
    ) -> Result<bool>;

    /// Remove a record; removing a missing record is not an error
    async fn delete(&self, org_id: &str, resource_type: &str, resource_id: &str) -> Result<()>;
}

/// Signing identity of this peer
#[async_trait]
pub trait Identity: Send + Sync {
    /// Identity string used as this peer's vector clock key and `author_did`
    fn peer_id(&self) -> &str;

    /// Sign `data`, returning an encoded signature
    async fn sign(&self, data: &[u8]) -> Result<String>;

    /// Check that `signature` over `data` was produced by `identity`
    async fn verify(&self, signature: &str, data: &[u8], identity: &str) -> Result<bool>;
}

/// Peer message delivery.
///
/// `Ok(false)` and `Err(_)` both count as a failed delivery.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver to every reachable peer of the org
    async fn broadcast_to_org(&self, org_id: &str, message: &SyncMessage) -> Result<bool>;

    /// Deliver to one peer
    async fn send_to_peer(&self, org_id: &str, peer_id: &str, message: &SyncMessage)
        -> Result<bool>;
}
