//! In-memory collaborators for tests

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::db::Database;
use crate::engine::SyncContext;
use crate::error::{Error, Result};
use crate::peer::{Identity, RecordStore, Transport};
use crate::protocol::{SyncChange, SyncMessage};

type RecordKey = (String, String, String);

fn key(org_id: &str, resource_type: &str, resource_id: &str) -> RecordKey {
    (
        org_id.to_string(),
        resource_type.to_string(),
        resource_id.to_string(),
    )
}

/// Record store backed by a map
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<RecordKey, Value>>,
}

impl MemoryRecordStore {
    pub fn put(&self, org_id: &str, resource_type: &str, resource_id: &str, data: Value) {
        self.records
            .lock()
            .unwrap()
            .insert(key(org_id, resource_type, resource_id), data);
    }

    pub fn read(&self, org_id: &str, resource_type: &str, resource_id: &str) -> Option<Value> {
        self.records
            .lock()
            .unwrap()
            .get(&key(org_id, resource_type, resource_id))
            .cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(
        &self,
        org_id: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Option<Value>> {
        Ok(self.read(org_id, resource_type, resource_id))
    }

    async fn insert(
        &self,
        org_id: &str,
        resource_type: &str,
        resource_id: &str,
        data: &Value,
    ) -> Result<()> {
        self.put(org_id, resource_type, resource_id, data.clone());
        Ok(())
    }

    async fn update(
        &self,
        org_id: &str,
        resource_type: &str,
        resource_id: &str,
        data: &Value,
    ) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&key(org_id, resource_type, resource_id)) {
            Some(existing) => {
                *existing = data.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, org_id: &str, resource_type: &str, resource_id: &str) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .remove(&key(org_id, resource_type, resource_id));
        Ok(())
    }
}

/// Identity whose signatures are a keyed hash of the payload
pub struct FakeIdentity {
    peer_id: String,
}

impl FakeIdentity {
    pub fn new(peer_id: &str) -> Self {
        Self {
            peer_id: peer_id.to_string(),
        }
    }

    fn signature_for(identity: &str, data: &[u8]) -> String {
        let mut hasher = DefaultHasher::new();
        identity.hash(&mut hasher);
        data.hash(&mut hasher);
        format!("{identity}:{:016x}", hasher.finish())
    }
}

#[async_trait]
impl Identity for FakeIdentity {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    async fn sign(&self, data: &[u8]) -> Result<String> {
        Ok(Self::signature_for(&self.peer_id, data))
    }

    async fn verify(&self, signature: &str, data: &[u8], identity: &str) -> Result<bool> {
        Ok(signature == Self::signature_for(identity, data))
    }
}

/// One message handed to the transport
#[derive(Debug, Clone)]
pub struct Sent {
    pub org_id: String,
    /// `None` for broadcasts
    pub peer_id: Option<String>,
    pub message: SyncMessage,
}

/// Transport that records every message; can be switched into failure mode
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    /// Make every subsequent send report failure
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// Every `sync:change` delivered so far, oldest first
    pub fn changes(&self) -> Vec<SyncChange> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent.message {
                SyncMessage::Change(change) => Some(change),
                _ => None,
            })
            .collect()
    }

    pub fn count_for(&self, org_id: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|sent| sent.org_id == org_id)
            .count()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    fn record(&self, org_id: &str, peer_id: Option<&str>, message: &SyncMessage) -> Result<bool> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Delivery("peer unreachable".to_string()));
        }
        self.sent.lock().unwrap().push(Sent {
            org_id: org_id.to_string(),
            peer_id: peer_id.map(str::to_string),
            message: message.clone(),
        });
        Ok(true)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn broadcast_to_org(&self, org_id: &str, message: &SyncMessage) -> Result<bool> {
        self.record(org_id, None, message)
    }

    async fn send_to_peer(
        &self,
        org_id: &str,
        peer_id: &str,
        message: &SyncMessage,
    ) -> Result<bool> {
        self.record(org_id, Some(peer_id), message)
    }
}

/// A peer wired to in-memory collaborators
pub struct TestPeer {
    pub context: SyncContext,
    pub records: Arc<MemoryRecordStore>,
    pub transport: Arc<RecordingTransport>,
}

impl TestPeer {
    pub fn new(peer_id: &str) -> Self {
        let records = Arc::new(MemoryRecordStore::default());
        let transport = Arc::new(RecordingTransport::default());
        let context = SyncContext::new(
            Database::open_in_memory().unwrap(),
            records.clone(),
            Arc::new(FakeIdentity::new(peer_id)),
            transport.clone(),
        );
        Self {
            context,
            records,
            transport,
        }
    }
}
