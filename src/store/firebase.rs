//! Firebase Realtime Database REST client
//!
//! Reads and writes are plain `GET`/`PUT`/`DELETE` on `{base}/{path}.json`.
//! Transactions use ETag-conditional writes and retry on `412 Precondition
//! Failed`. Subscriptions hold a `text/event-stream` connection open and
//! apply each `put`/`patch` payload to a local copy of the slot.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{SharedStore, StoreError, Update};

/// Firebase gives up on transactions after this many contended attempts
const MAX_TRANSACTION_ATTEMPTS: u32 = 25;

/// Delay before re-opening a dropped event stream
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Shared store backed by a Firebase Realtime Database
#[derive(Clone)]
pub struct FirebaseStore {
    client: Client,
    base_url: String,
    auth: Option<String>,
}

impl FirebaseStore {
    pub fn new(base_url: &str, auth: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    /// Get the REST URL for a slot
    fn slot_url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(token) => request.query(&[("auth", token)]),
            None => request,
        }
    }

    async fn fetch(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let response = self
            .authorize(self.client.get(self.slot_url(path)))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let value: Value = response.json().await?;
        Ok(present(value))
    }

    /// Read a slot together with its ETag
    async fn fetch_tagged(&self, path: &str) -> Result<(Option<Value>, String), StoreError> {
        let response = self
            .authorize(self.client.get(self.slot_url(path)))
            .header("X-Firebase-ETag", "true")
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let value: Value = response.json().await?;
        Ok((present(value), etag))
    }

    async fn put(&self, path: &str, value: Option<Value>) -> Result<(), StoreError> {
        let url = self.slot_url(path);
        let request = match value {
            Some(value) => self.client.put(url).json(&value),
            None => self.client.delete(url),
        };
        let response = self.authorize(request).send().await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn run_transaction(&self, path: &str, update: Update) -> Result<Value, StoreError> {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let (current, etag) = self.fetch_tagged(path).await?;
            let next = update(current);

            let response = self
                .authorize(self.client.put(self.slot_url(path)))
                .header(header::IF_MATCH, etag)
                .json(&next)
                .send()
                .await?;

            if response.status() == StatusCode::PRECONDITION_FAILED {
                debug!(path, attempt, "Transaction contended, retrying");
                continue;
            }

            ensure_success(response).await?;
            return Ok(next);
        }

        Err(StoreError::Contention {
            path: path.to_string(),
            attempts: MAX_TRANSACTION_ATTEMPTS,
        })
    }

    /// Keep one event stream open for `path`, pushing fresh values into `tx`
    /// until every receiver is gone.
    async fn stream_slot(self, path: String, tx: watch::Sender<Option<Value>>) {
        while !tx.is_closed() {
            if let Err(e) = self.follow_events(&path, &tx).await {
                warn!(path = %path, error = %e, "Event stream dropped, reconnecting");
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
        debug!(path = %path, "Subscription ended");
    }

    async fn follow_events(
        &self,
        path: &str,
        tx: &watch::Sender<Option<Value>>,
    ) -> Result<(), StoreError> {
        let response = self
            .authorize(self.client.get(self.slot_url(path)))
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let mut stream = response.bytes_stream();
        let mut buffer = BytesMut::new();
        let mut cache = tx.borrow().clone().unwrap_or(Value::Null);

        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);

            // Apply every complete frame, then publish once
            let mut dirty = false;
            while let Some(end) = find_event_end(&buffer) {
                let raw = buffer.split_to(end);
                buffer.advance(2);

                match parse_event(&raw) {
                    Some(StreamEvent::Change { kind, path: at, data }) => {
                        apply_change(&mut cache, kind, &at, data);
                        dirty = true;
                    }
                    Some(StreamEvent::KeepAlive) => {}
                    Some(StreamEvent::Cancelled) => return Err(StoreError::Closed),
                    None => debug!(path, "Ignoring stream event"),
                }
            }

            if dirty {
                let value = present(cache.clone());
                tx.send_if_modified(|seen| {
                    if *seen == value {
                        false
                    } else {
                        *seen = value;
                        true
                    }
                });
            }
            if tx.is_closed() {
                return Ok(());
            }
        }

        Err(StoreError::Closed)
    }
}

impl SharedStore for FirebaseStore {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        self.fetch(path).boxed()
    }

    fn write<'a>(
        &'a self,
        path: &'a str,
        value: Option<Value>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        self.put(path, value).boxed()
    }

    fn transact<'a>(
        &'a self,
        path: &'a str,
        update: Update,
    ) -> BoxFuture<'a, Result<Value, StoreError>> {
        self.run_transaction(path, update).boxed()
    }

    fn subscribe<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<watch::Receiver<Option<Value>>, StoreError>> {
        async move {
            let initial = self.fetch(path).await?;
            let (tx, rx) = watch::channel(initial);
            tokio::spawn(self.clone().stream_slot(path.to_string(), tx));
            Ok(rx)
        }
        .boxed()
    }
}

async fn ensure_success(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Api { status, body })
}

/// `null` and `{}` both mean "no value here"
fn present(value: Value) -> Option<Value> {
    match &value {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        _ => Some(value),
    }
}

fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeKind {
    Put,
    Patch,
}

#[derive(Debug, PartialEq)]
enum StreamEvent {
    Change {
        kind: ChangeKind,
        path: String,
        data: Value,
    },
    KeepAlive,
    Cancelled,
}

#[derive(Deserialize)]
struct ChangePayload {
    path: String,
    #[serde(default)]
    data: Value,
}

fn parse_event(raw: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(raw);

    let kind = match field(&text, "event:")? {
        "put" => ChangeKind::Put,
        "patch" => ChangeKind::Patch,
        "keep-alive" => return Some(StreamEvent::KeepAlive),
        "cancel" | "auth_revoked" => return Some(StreamEvent::Cancelled),
        _ => return None,
    };
    let payload: ChangePayload = serde_json::from_str(field(&text, "data:")?).ok()?;
    Some(StreamEvent::Change {
        kind,
        path: payload.path,
        data: payload.data,
    })
}

fn field<'a>(frame: &'a str, name: &str) -> Option<&'a str> {
    frame
        .lines()
        .find_map(|line| line.strip_prefix(name))
        .map(str::trim)
}

/// Apply one change to the local copy of a slot. `put` replaces the value at
/// `path`, `patch` replaces each listed child. `null` deletes.
fn apply_change(cache: &mut Value, kind: ChangeKind, path: &str, data: Value) {
    let at: Vec<&str> = segments(path).collect();
    match (kind, data) {
        (ChangeKind::Patch, Value::Object(children)) => {
            for (key, value) in children {
                let mut child = at.clone();
                child.extend(segments(&key));
                set_at(cache, &child, value);
            }
        }
        (_, data) => set_at(cache, &at, data),
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn set_at(node: &mut Value, path: &[&str], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *node = value;
        return;
    };
    if value.is_null() && !node.is_object() {
        return;
    }
    if !node.is_object() {
        *node = Value::Object(Default::default());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.to_string()).or_insert(Value::Null);
        set_at(child, rest, value);
        if present(child.clone()).is_none() {
            map.remove(*head);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slot_urls_end_in_json() {
        let store = FirebaseStore::new("https://example.firebaseio.com/", None);
        assert_eq!(
            store.slot_url("/game/current/votes/left"),
            "https://example.firebaseio.com/game/current/votes/left.json"
        );
    }

    #[test]
    fn empty_payloads_are_absent() {
        assert_eq!(present(Value::Null), None);
        assert_eq!(present(json!({})), None);
        assert_eq!(present(json!(0)), Some(json!(0)));
    }

    #[test]
    fn event_frames_are_split_on_blank_lines() {
        let frame = b"event: put\ndata: {\"path\":\"/\",\"data\":1}\n\nevent: keep-alive\ndata: null\n\n";
        let end = find_event_end(frame).unwrap();
        assert_eq!(
            parse_event(&frame[..end]),
            Some(StreamEvent::Change {
                kind: ChangeKind::Put,
                path: "/".to_string(),
                data: json!(1),
            })
        );

        let rest = &frame[end + 2..];
        let end = find_event_end(rest).unwrap();
        assert_eq!(parse_event(&rest[..end]), Some(StreamEvent::KeepAlive));
    }

    #[test]
    fn incomplete_frames_wait_for_more_bytes() {
        assert_eq!(find_event_end(b"event: put\ndata: {"), None);
    }

    #[test]
    fn revoked_streams_are_cancelled() {
        assert_eq!(parse_event(b"event: auth_revoked\ndata: null"), Some(StreamEvent::Cancelled));
        assert_eq!(parse_event(b"event: rules_debug\ndata: \"x\""), None);
    }

    #[test]
    fn root_put_replaces_the_slot() {
        let mut cache = json!({"score": 10, "lives": 2});
        apply_change(&mut cache, ChangeKind::Put, "/", json!({"score": 0}));
        assert_eq!(cache, json!({"score": 0}));
    }

    #[test]
    fn child_put_replaces_one_field() {
        let mut cache = json!({"left": 1, "right": 4});
        apply_change(&mut cache, ChangeKind::Put, "/left", json!(2));
        assert_eq!(cache, json!({"left": 2, "right": 4}));

        let mut empty = Value::Null;
        apply_change(&mut empty, ChangeKind::Put, "/votes/stay", json!(1));
        assert_eq!(empty, json!({"votes": {"stay": 1}}));
    }

    #[test]
    fn patch_merges_listed_children() {
        let mut cache = json!({"score": 10, "lives": 2, "round": 3});
        apply_change(
            &mut cache,
            ChangeKind::Patch,
            "/",
            json!({"score": 40, "combo": 1, "round": null}),
        );
        assert_eq!(cache, json!({"score": 40, "lives": 2, "combo": 1}));
    }

    #[test]
    fn null_put_deletes_and_prunes() {
        let mut cache = json!({"holder": {"id": 7}});
        apply_change(&mut cache, ChangeKind::Put, "/holder/id", Value::Null);
        assert_eq!(present(cache.clone()), None);

        let mut cache = json!({"y": 12.5});
        apply_change(&mut cache, ChangeKind::Put, "/", Value::Null);
        assert_eq!(present(cache), None);
    }

    #[test]
    fn a_burst_of_frames_applies_in_order() {
        let burst = b"event: put\ndata: {\"path\":\"/\",\"data\":{\"left\":1}}\n\n\
event: put\ndata: {\"path\":\"/left\",\"data\":2}\n\n\
event: patch\ndata: {\"path\":\"/\",\"data\":{\"right\":5}}\n\n";
        let mut buffer = BytesMut::from(&burst[..]);
        let mut cache = Value::Null;
        let mut applied = 0;

        while let Some(end) = find_event_end(&buffer) {
            let raw = buffer.split_to(end);
            buffer.advance(2);
            if let Some(StreamEvent::Change { kind, path, data }) = parse_event(&raw) {
                apply_change(&mut cache, kind, &path, data);
                applied += 1;
            }
        }

        assert_eq!(applied, 3);
        assert!(buffer.is_empty());
        assert_eq!(cache, json!({"left": 2, "right": 5}));
    }
}
