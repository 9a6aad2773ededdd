//! Shared key-value store: the only coordination substrate between instances
//!
//! Every instance talks to the others exclusively through slots in this store.
//! The contract is deliberately weak: atomic whole-slot reads and writes, an
//! atomic read-modify-write on a single slot, and push subscriptions with
//! latest-value semantics. Nothing spans more than one slot.

pub mod firebase;
pub mod memory;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::voting::VoteDirection;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

/// Read-modify-write function applied by [`SharedStore::transact`].
/// May be invoked more than once when the backend retries on contention.
pub type Update = Box<dyn Fn(Option<Value>) -> Value + Send + Sync>;

/// The shared store contract
pub trait SharedStore: Send + Sync + 'static {
    /// Atomically read a slot. Absent, `null` and empty objects read as `None`.
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>>;

    /// Atomically replace a slot. `None` removes it.
    fn write<'a>(
        &'a self,
        path: &'a str,
        value: Option<Value>,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Atomic read-modify-write on a single slot. Returns the committed value.
    fn transact<'a>(&'a self, path: &'a str, update: Update)
        -> BoxFuture<'a, Result<Value, StoreError>>;

    /// Subscribe to a slot. The receiver starts with the current value.
    fn subscribe<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<watch::Receiver<Option<Value>>, StoreError>>;
}

/// Slots of one game session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    State,
    Obstacle,
    Votes,
    Vote(VoteDirection),
    GameMaster,
}

impl Slot {
    fn key(&self) -> String {
        match self {
            Slot::State => "state".to_string(),
            Slot::Obstacle => "obstacle".to_string(),
            Slot::Votes => "votes".to_string(),
            Slot::Vote(direction) => format!("votes/{}", direction.as_str()),
            Slot::GameMaster => "gameMaster".to_string(),
        }
    }
}

/// Typed access to the slots under one session root
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<dyn SharedStore>,
    root: String,
}

impl SessionStore {
    pub fn new(inner: Arc<dyn SharedStore>, root: &str) -> Self {
        Self {
            inner,
            root: root.trim_matches('/').to_string(),
        }
    }

    /// Full store path of a slot
    pub fn path(&self, slot: Slot) -> String {
        if self.root.is_empty() {
            slot.key()
        } else {
            format!("{}/{}", self.root, slot.key())
        }
    }

    pub async fn read<T: DeserializeOwned>(&self, slot: Slot) -> Result<Option<T>, StoreError> {
        let path = self.path(slot);
        match self.inner.read(&path).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn write<T: Serialize>(&self, slot: Slot, value: &T) -> Result<(), StoreError> {
        let path = self.path(slot);
        let value = serde_json::to_value(value)?;
        self.inner.write(&path, Some(value)).await
    }

    /// Remove a slot (the absence marker)
    pub async fn clear(&self, slot: Slot) -> Result<(), StoreError> {
        let path = self.path(slot);
        self.inner.write(&path, None).await
    }

    /// Transactionally add one to a numeric slot, returning the new count
    pub async fn increment(&self, slot: Slot) -> Result<u64, StoreError> {
        let path = self.path(slot);
        let update: Update = Box::new(|current| {
            let count = current.as_ref().and_then(Value::as_u64).unwrap_or(0);
            Value::from(count + 1)
        });
        let committed = self.inner.transact(&path, update).await?;
        Ok(committed.as_u64().unwrap_or(0))
    }

    pub async fn subscribe(&self, slot: Slot) -> Result<watch::Receiver<Option<Value>>, StoreError> {
        let path = self.path(slot);
        self.inner.subscribe(&path).await
    }
}

/// Decode a raw slot value, treating undecodable data as absent
pub fn decode<T: DeserializeOwned>(slot: Slot, value: Option<Value>) -> Option<T> {
    let value = value?;
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::warn!(slot = ?slot, error = %e, "Ignoring malformed slot value");
            None
        }
    }
}

/// Shared store errors. All of them are transient from the core's point of view.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to encode or decode slot value: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Transaction on {path} gave up after {attempts} contended attempts")]
    Contention { path: String, attempts: u32 },

    #[error("Subscription closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_paths_live_under_the_session_root() {
        let store = SessionStore::new(Arc::new(MemoryStore::new()), "/game/current/");
        assert_eq!(store.path(Slot::State), "game/current/state");
        assert_eq!(store.path(Slot::GameMaster), "game/current/gameMaster");
        assert_eq!(
            store.path(Slot::Vote(VoteDirection::Stay)),
            "game/current/votes/stay"
        );
    }

    #[test]
    fn empty_root_uses_bare_keys() {
        let store = SessionStore::new(Arc::new(MemoryStore::new()), "");
        assert_eq!(store.path(Slot::Obstacle), "obstacle");
    }

    #[tokio::test]
    async fn increment_starts_from_absent() {
        let store = SessionStore::new(Arc::new(MemoryStore::new()), "s");
        let slot = Slot::Vote(VoteDirection::Left);
        assert_eq!(store.increment(slot).await.unwrap(), 1);
        assert_eq!(store.increment(slot).await.unwrap(), 2);
        assert_eq!(store.read::<u64>(slot).await.unwrap(), Some(2));
    }

    #[test]
    fn decode_drops_malformed_values() {
        let value = Some(serde_json::json!({"not": "a number"}));
        assert_eq!(decode::<u64>(Slot::Votes, value), None);
        assert_eq!(decode::<u64>(Slot::Votes, Some(Value::from(7))), Some(7));
    }
}
