//! Document Store Seam
//!
//! The billing core only needs three primitives from the tenant document
//! store: create a document, watch one document for changes, and the
//! server-timestamp write sentinel. [`InMemoryDocumentStore`] implements them
//! for tests, the CLI sandbox and the demo server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Store-level failures, modelled on the store's status codes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store error [{code}]: {message}")]
    Other { code: String, message: String },
}

impl StoreError {
    /// Build from a store status code such as `permission-denied`
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "permission-denied" | "unauthenticated" => Self::PermissionDenied(message),
            "not-found" => Self::NotFound(message),
            "unavailable" | "deadline-exceeded" => Self::Unavailable(message),
            other => Self::Other { code: other.to_string(), message },
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::PermissionDenied(_) => "permission-denied",
            Self::NotFound(_) => "not-found",
            Self::Unavailable(_) => "unavailable",
            Self::Other { code, .. } => code,
        }
    }
}

/// Reference to a single stored document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    pub id: String,
    pub path: String,
}

impl DocumentRef {
    pub fn new(collection: &str, id: impl Into<String>) -> Self {
        let id = id.into();
        let path = format!("{}/{}", collection.trim_end_matches('/'), id);
        Self { id, path }
    }

    /// Path of the collection holding this document
    pub fn collection(&self) -> &str {
        self.path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
    }
}

/// A change observed on a watched document
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    /// Current document data (`None` if the document does not exist)
    Snapshot(Option<Value>),
    /// The listener failed; no further events follow
    Error(StoreError),
}

/// Live subscription to one document. Dropping it unsubscribes.
pub struct DocumentWatch {
    document: DocumentRef,
    events: mpsc::UnboundedReceiver<DocumentEvent>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl DocumentWatch {
    pub fn new(
        document: DocumentRef,
        events: mpsc::UnboundedReceiver<DocumentEvent>,
        unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            document,
            events,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn document(&self) -> &DocumentRef {
        &self.document
    }

    /// Next event, or `None` once the store closed the subscription
    pub async fn next(&mut self) -> Option<DocumentEvent> {
        self.events.recv().await
    }

    /// Tear the subscription down now
    pub fn unsubscribe(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
            self.events.close();
            debug!(path = %self.document.path, "Document watch closed");
        }
    }
}

impl Drop for DocumentWatch {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for DocumentWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentWatch")
            .field("document", &self.document)
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Minimal document store client
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document with a generated id under `collection`
    async fn create(&self, collection: &str, data: Value) -> Result<DocumentRef, StoreError>;

    /// Watch a document. The current state is delivered first.
    async fn subscribe(&self, document: &DocumentRef) -> Result<DocumentWatch, StoreError>;

    /// Sentinel asking the server to stamp its own clock on write
    fn server_timestamp(&self) -> Value {
        json!({ "_methodName": "serverTimestamp" })
    }
}

type Listener = mpsc::UnboundedSender<DocumentEvent>;

#[derive(Default)]
struct StoreInner {
    documents: HashMap<String, Value>,
    listeners: HashMap<String, HashMap<u64, Listener>>,
    creation_feeds: Vec<mpsc::UnboundedSender<(DocumentRef, Value)>>,
    next_listener_id: u64,
    writes_denied: bool,
}

impl StoreInner {
    fn notify(&mut self, path: &str, event: DocumentEvent) {
        if let Some(listeners) = self.listeners.get_mut(path) {
            listeners.retain(|_, tx| tx.send(event.clone()).is_ok());
        }
    }
}

/// In-process document store
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject every subsequent create as the security rules would
    pub fn deny_writes(&self, denied: bool) {
        self.lock().writes_denied = denied;
    }

    pub fn get(&self, document: &DocumentRef) -> Option<Value> {
        self.lock().documents.get(&document.path).cloned()
    }

    /// Documents directly under `collection`
    pub fn documents_in(&self, collection: &str) -> Vec<(DocumentRef, Value)> {
        let collection = collection.trim_end_matches('/');
        self.lock()
            .documents
            .iter()
            .filter_map(|(path, data)| {
                let (parent, id) = path.rsplit_once('/')?;
                (parent == collection).then(|| (DocumentRef::new(parent, id), data.clone()))
            })
            .collect()
    }

    pub fn document_count(&self) -> usize {
        self.lock().documents.len()
    }

    /// Number of open watches on a document
    pub fn listener_count(&self, document: &DocumentRef) -> usize {
        self.lock().listeners.get(&document.path).map_or(0, HashMap::len)
    }

    /// Feed of every document created from now on
    pub fn subscribe_creations(&self) -> mpsc::UnboundedReceiver<(DocumentRef, Value)> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().creation_feeds.push(tx);
        rx
    }

    /// Merge top-level fields into an existing document and notify watchers
    pub fn merge(&self, document: &DocumentRef, patch: Value) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let data = inner
            .documents
            .get_mut(&document.path)
            .ok_or_else(|| StoreError::NotFound(document.path.clone()))?;

        if let (Value::Object(target), Value::Object(fields)) = (&mut *data, patch) {
            for (key, value) in fields {
                target.insert(key, value);
            }
        }
        let updated = data.clone();
        inner.notify(&document.path, DocumentEvent::Snapshot(Some(updated)));
        Ok(())
    }

    /// Fail every watch on a document, as a revoked listener would
    pub fn fail_listeners(&self, document: &DocumentRef, error: StoreError) {
        let mut inner = self.lock();
        inner.notify(&document.path, DocumentEvent::Error(error));
        inner.listeners.remove(&document.path);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(&self, collection: &str, mut data: Value) -> Result<DocumentRef, StoreError> {
        let mut inner = self.lock();
        if inner.writes_denied {
            return Err(StoreError::PermissionDenied("Missing or insufficient permissions.".to_string()));
        }

        stamp_server_timestamps(&mut data);
        let document = DocumentRef::new(collection, Uuid::new_v4().simple().to_string());
        inner.documents.insert(document.path.clone(), data.clone());
        inner
            .creation_feeds
            .retain(|tx| tx.send((document.clone(), data.clone())).is_ok());

        debug!(path = %document.path, "Document created");
        Ok(document)
    }

    async fn subscribe(&self, document: &DocumentRef) -> Result<DocumentWatch, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();

        let current = inner.documents.get(&document.path).cloned();
        // Receiver is alive, the initial send cannot fail
        let _ = tx.send(DocumentEvent::Snapshot(current));

        let listener_id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner
            .listeners
            .entry(document.path.clone())
            .or_default()
            .insert(listener_id, tx);

        let weak: Weak<Mutex<StoreInner>> = Arc::downgrade(&self.inner);
        let path = document.path.clone();
        Ok(DocumentWatch::new(document.clone(), rx, move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(listeners) = inner.listeners.get_mut(&path) {
                    listeners.remove(&listener_id);
                    if listeners.is_empty() {
                        inner.listeners.remove(&path);
                    }
                }
            }
        }))
    }
}

/// Replace server-timestamp sentinels with the commit time, as the server does
fn stamp_server_timestamps(value: &mut Value) {
    if matches!(value, Value::Object(map) if is_server_timestamp_sentinel(map)) {
        let now = Utc::now();
        *value = json!({
            "seconds": now.timestamp(),
            "nanoseconds": now.timestamp_subsec_nanos(),
        });
        return;
    }

    match value {
        Value::Object(map) => map.values_mut().for_each(stamp_server_timestamps),
        Value::Array(items) => items.iter_mut().for_each(stamp_server_timestamps),
        _ => {}
    }
}

fn is_server_timestamp_sentinel(map: &Map<String, Value>) -> bool {
    map.len() == 1 && map.get("_methodName").and_then(Value::as_str) == Some("serverTimestamp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::timestamp::RawTimestamp;

    #[tokio::test]
    async fn test_create_and_watch() {
        let store = InMemoryDocumentStore::new();
        let doc = store.create("customers/u1/checkout_sessions", json!({"price": "p"})).await.unwrap();
        assert_eq!(doc.collection(), "customers/u1/checkout_sessions");

        let mut watch = store.subscribe(&doc).await.unwrap();
        assert_eq!(store.listener_count(&doc), 1);
        assert_eq!(watch.next().await, Some(DocumentEvent::Snapshot(Some(json!({"price": "p"})))));

        store.merge(&doc, json!({"url": "https://pay.test/s"})).unwrap();
        match watch.next().await {
            Some(DocumentEvent::Snapshot(Some(data))) => assert_eq!(data["url"], "https://pay.test/s"),
            other => panic!("unexpected event: {:?}", other),
        }

        drop(watch);
        assert_eq!(store.listener_count(&doc), 0);
    }

    #[tokio::test]
    async fn test_denied_writes() {
        let store = InMemoryDocumentStore::new();
        store.deny_writes(true);
        let err = store.create("c", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "permission-denied");
        assert_eq!(store.document_count(), 0);
    }

    #[tokio::test]
    async fn test_server_timestamp_is_stamped_on_create() {
        let store = InMemoryDocumentStore::new();
        let sentinel = store.server_timestamp();
        let doc = store.create("c", json!({"created": sentinel})).await.unwrap();

        let created = RawTimestamp::from_value(&store.get(&doc).unwrap()["created"]);
        assert!(created.normalize().is_resolved());
    }

    #[tokio::test]
    async fn test_fail_listeners_drops_watchers() {
        let store = InMemoryDocumentStore::new();
        let doc = store.create("c", json!({})).await.unwrap();
        let mut watch = store.subscribe(&doc).await.unwrap();
        let _ = watch.next().await;

        store.fail_listeners(&doc, StoreError::from_code("permission-denied", "revoked"));
        assert_eq!(
            watch.next().await,
            Some(DocumentEvent::Error(StoreError::PermissionDenied("revoked".into())))
        );
        assert_eq!(watch.next().await, None);
    }

    #[tokio::test]
    async fn test_documents_in_collection() {
        let store = InMemoryDocumentStore::new();
        store.create("customers/a/checkout_sessions", json!({"n": 1})).await.unwrap();
        store.create("customers/a/checkout_sessions", json!({"n": 2})).await.unwrap();
        store.create("customers/b/checkout_sessions", json!({"n": 3})).await.unwrap();

        assert_eq!(store.documents_in("customers/a/checkout_sessions").len(), 2);
        assert_eq!(store.documents_in("customers/b/checkout_sessions/").len(), 1);
        assert_eq!(store.document_count(), 3);
    }

    #[test]
    fn test_store_error_codes() {
        assert_eq!(StoreError::from_code("unauthenticated", "x").code(), "permission-denied");
        assert_eq!(StoreError::from_code("deadline-exceeded", "x").code(), "unavailable");
        assert_eq!(StoreError::from_code("aborted", "x").code(), "aborted");
    }
}
