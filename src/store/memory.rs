//! In-process tree store
//!
//! Backs single-instance deployments and every test. All operations take the
//! tree lock, so reads, writes and transactions are atomic, and subscriber
//! notification happens before the lock is released so observers never see
//! writes out of order.

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::watch;

use super::{SharedStore, StoreError, Update};

/// Shared store held entirely in memory
pub struct MemoryStore {
    root: Mutex<Value>,
    /// Subscribers keyed by watched path
    watchers: DashMap<String, Vec<watch::Sender<Option<Value>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Value::Object(Map::new())),
            watchers: DashMap::new(),
        }
    }

    fn apply(&self, path: &str, value: Option<Value>) {
        let mut root = self.root.lock();
        set_path(&mut root, &segments(path), value);
        self.notify(&root, path);
    }

    /// Push fresh values to every subscriber whose path overlaps `changed`
    fn notify(&self, root: &Value, changed: &str) {
        let changed = segments(changed);
        for mut entry in self.watchers.iter_mut() {
            let watched = segments(entry.key());
            let related = watched.starts_with(&changed) || changed.starts_with(&watched);
            if !related {
                continue;
            }

            let current = get_path(root, &watched);
            let senders = entry.value_mut();
            senders.retain(|tx| !tx.is_closed());
            for tx in senders.iter() {
                tx.send_if_modified(|seen| {
                    if *seen == current {
                        false
                    } else {
                        *seen = current.clone();
                        true
                    }
                });
            }
        }
        self.watchers.retain(|_, senders| !senders.is_empty());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStore for MemoryStore {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        let value = get_path(&self.root.lock(), &segments(path));
        futures::future::ready(Ok(value)).boxed()
    }

    fn write<'a>(
        &'a self,
        path: &'a str,
        value: Option<Value>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        self.apply(path, value);
        futures::future::ready(Ok(())).boxed()
    }

    fn transact<'a>(
        &'a self,
        path: &'a str,
        update: Update,
    ) -> BoxFuture<'a, Result<Value, StoreError>> {
        let mut root = self.root.lock();
        let segs = segments(path);
        let next = update(get_path(&root, &segs));
        set_path(&mut root, &segs, Some(next.clone()));
        self.notify(&root, path);
        drop(root);
        futures::future::ready(Ok(next)).boxed()
    }

    fn subscribe<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<watch::Receiver<Option<Value>>, StoreError>> {
        // Hold the tree lock so no write slips between snapshot and registration
        let root = self.root.lock();
        let (tx, rx) = watch::channel(get_path(&root, &segments(path)));
        self.watchers
            .entry(segments(path).join("/"))
            .or_default()
            .push(tx);
        drop(root);
        futures::future::ready(Ok(rx)).boxed()
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn get_path(root: &Value, segs: &[&str]) -> Option<Value> {
    let mut node = root;
    for seg in segs {
        node = node.as_object()?.get(*seg)?;
    }
    if is_absent(node) {
        None
    } else {
        Some(node.clone())
    }
}

fn set_path(root: &mut Value, segs: &[&str], value: Option<Value>) {
    let Some((last, parents)) = segs.split_last() else {
        *root = value.unwrap_or_else(|| Value::Object(Map::new()));
        return;
    };

    let mut node = root;
    for seg in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node.as_object_mut() {
            Some(map) => map
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            None => return,
        };
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Some(map) = node.as_object_mut() {
        match value.filter(|v| !is_absent(v)) {
            Some(v) => {
                map.insert(last.to_string(), v);
            }
            None => {
                map.remove(*last);
            }
        }
    }
}
