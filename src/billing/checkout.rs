//! Checkout Session Coordinator
//!
//! Starts a hosted checkout by writing an intent document that the payment
//! integration picks up, then waits for that integration to write back a
//! redirect `url` or an `error` on the same document.
//!
//! The wait is a race between the document watch and a wall-clock timeout.
//! Whichever finishes first wins; the other is dropped, and the watch is
//! always torn down before `start` returns. Each call owns a fresh intent, so
//! concurrent or repeated attempts never observe each other's results.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use super::classify::{CheckoutError, RawFailure};
use super::clock::Clock;
use super::store::{DocumentEvent, DocumentStore, DocumentWatch};

/// Checkout policy constants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckoutPolicy {
    /// Maximum wait for the provider's answer (seconds)
    pub timeout_secs: u64,
    /// Root collection of per-user billing documents
    pub customers_collection: String,
    /// Sub-collection holding checkout intents
    pub sessions_collection: String,
    pub success_url: String,
    pub cancel_url: String,
    pub allow_promotion_codes: bool,
    pub trial_from_plan: bool,
    /// Substrings marking a price id that was never configured
    pub placeholder_markers: Vec<String>,
    /// Tag recorded in intent metadata
    pub source: String,
}

impl Default for CheckoutPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            customers_collection: "customers".to_string(),
            sessions_collection: "checkout_sessions".to_string(),
            success_url: "http://localhost:3000/#/admin?session=success".to_string(),
            cancel_url: "http://localhost:3000/#/admin/settings?tab=billing&session=cancel".to_string(),
            allow_promotion_codes: true,
            trial_from_plan: true,
            placeholder_markers: vec!["placeholder".to_string(), "exemplo".to_string(), "example".to_string()],
            source: "tenant_gate".to_string(),
        }
    }
}

impl CheckoutPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Collection holding a user's checkout intents
    pub fn sessions_path(&self, user_id: &str) -> String {
        format!("{}/{}/{}", self.customers_collection, user_id, self.sessions_collection)
    }

    /// True for empty price ids and ones still carrying a placeholder marker
    pub fn is_placeholder_price(&self, price_id: &str) -> bool {
        let price_id = price_id.trim().to_lowercase();
        price_id.is_empty()
            || self
                .placeholder_markers
                .iter()
                .filter(|marker| !marker.is_empty())
                .any(|marker| price_id.contains(&marker.to_lowercase()))
    }
}

/// Caller's checkout request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub user_id: String,
    pub price_id: String,
    /// Overrides the policy's success redirect
    pub success_url: Option<String>,
    /// Overrides the policy's cancel redirect
    pub cancel_url: Option<String>,
}

impl CheckoutRequest {
    pub fn new(user_id: impl Into<String>, price_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            price_id: price_id.into(),
            success_url: None,
            cancel_url: None,
        }
    }

    pub fn with_redirects(mut self, success_url: impl Into<String>, cancel_url: impl Into<String>) -> Self {
        self.success_url = Some(success_url.into());
        self.cancel_url = Some(cancel_url.into());
        self
    }
}

/// Metadata attached to every intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentMetadata {
    pub user_id: String,
    pub source: String,
    /// Client clock at request time (RFC 3339)
    pub requested_at: String,
}

/// Checkout intent document as stored for the payment integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutIntent {
    /// Assigned by the store on creation
    #[serde(skip)]
    pub id: String,
    #[serde(rename = "price")]
    pub requested_price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    pub allow_promotion_codes: bool,
    pub trial_from_plan: bool,
    pub metadata: IntentMetadata,
    /// Written by the provider on success
    #[serde(rename = "url", default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    /// Written by the provider on rejection
    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub result_error: Option<Value>,
}

impl CheckoutIntent {
    /// Document body, stamped with the store's server-timestamp sentinel
    pub fn to_document(&self, created: Value) -> Result<Value, CheckoutError> {
        let mut document = serde_json::to_value(self)
            .map_err(|e| CheckoutError::from_failure(RawFailure::Other(e.to_string())))?;
        if let Value::Object(fields) = &mut document {
            fields.insert("created".to_string(), created);
        }
        Ok(document)
    }
}

/// State of an intent as seen in one snapshot
#[derive(Debug, Clone, PartialEq)]
enum IntentOutcome {
    Pending,
    Fulfilled(String),
    Rejected(RawFailure),
}

impl IntentOutcome {
    /// An error wins over a URL written in the same snapshot
    fn of(data: &Value) -> Self {
        if let Some(error) = data.get("error").filter(|e| !e.is_null()) {
            return Self::Rejected(RawFailure::from_provider_value(error));
        }
        match data.get("url").and_then(Value::as_str) {
            Some(url) if !url.trim().is_empty() => Self::Fulfilled(url.to_string()),
            _ => Self::Pending,
        }
    }
}

/// A user id must name exactly one document under the customers collection
fn is_document_id(id: &str) -> bool {
    !id.trim().is_empty() && !id.contains('/') && id != "." && id != ".."
}

/// Drives checkout intents through the document store
pub struct CheckoutSessionCoordinator {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    policy: CheckoutPolicy,
}

impl CheckoutSessionCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, policy: CheckoutPolicy) -> Self {
        Self { store, clock, policy }
    }

    pub fn policy(&self) -> &CheckoutPolicy {
        &self.policy
    }

    /// Validate a request and build its intent. No I/O.
    pub fn prepare(&self, request: &CheckoutRequest) -> Result<CheckoutIntent, CheckoutError> {
        if !is_document_id(&request.user_id) {
            warn!(user_id = %request.user_id, "Checkout rejected: user id is not a valid document id");
            return Err(CheckoutError::from_failure(RawFailure::Unauthenticated));
        }

        if self.policy.is_placeholder_price(&request.price_id) {
            let detail = format!(
                "Price id '{}' is a placeholder; configure the real provider price ids",
                request.price_id
            );
            error!(user_id = %request.user_id, price_id = %request.price_id, "Checkout misconfigured");
            return Err(CheckoutError::from_failure(RawFailure::Misconfigured(detail)));
        }

        Ok(CheckoutIntent {
            id: String::new(),
            requested_price_id: request.price_id.clone(),
            success_url: request.success_url.clone().unwrap_or_else(|| self.policy.success_url.clone()),
            cancel_url: request.cancel_url.clone().unwrap_or_else(|| self.policy.cancel_url.clone()),
            allow_promotion_codes: self.policy.allow_promotion_codes,
            trial_from_plan: self.policy.trial_from_plan,
            metadata: IntentMetadata {
                user_id: request.user_id.clone(),
                source: self.policy.source.clone(),
                requested_at: self.clock.now().to_rfc3339(),
            },
            result_url: None,
            result_error: None,
        })
    }

    /// Start a checkout with the policy's redirect targets
    pub async fn start(&self, user_id: &str, price_id: &str) -> Result<String, CheckoutError> {
        self.start_request(CheckoutRequest::new(user_id, price_id)).await
    }

    /// Create a fresh intent and wait for the provider's redirect URL
    pub async fn start_request(&self, request: CheckoutRequest) -> Result<String, CheckoutError> {
        let mut intent = self.prepare(&request)?;

        let collection = self.policy.sessions_path(&request.user_id);
        let body = intent.to_document(self.store.server_timestamp())?;
        let document = self.store.create(&collection, body).await.map_err(|e| {
            warn!(user_id = %request.user_id, error = %e, "Failed to create checkout intent");
            CheckoutError::from_failure(e.into())
        })?;
        intent.id = document.id.clone();

        info!(
            intent_id = %intent.id,
            user_id = %request.user_id,
            price_id = %intent.requested_price_id,
            "Checkout intent created, awaiting provider"
        );

        let mut watch = self.store.subscribe(&document).await.map_err(|e| {
            warn!(intent_id = %intent.id, error = %e, "Failed to watch checkout intent");
            CheckoutError::from_failure(e.into())
        })?;

        let timeout = self.policy.timeout();
        let outcome = match tokio::time::timeout(timeout, Self::await_resolution(&mut watch)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RawFailure::Timeout(timeout)),
        };
        watch.unsubscribe();

        match outcome {
            Ok(url) => {
                info!(intent_id = %intent.id, "Checkout session ready");
                Ok(url)
            }
            Err(raw) => {
                let err = CheckoutError::from_failure(raw);
                warn!(intent_id = %intent.id, kind = %err.kind, message = %err.message, "Checkout failed");
                Err(err)
            }
        }
    }

    async fn await_resolution(watch: &mut DocumentWatch) -> Result<String, RawFailure> {
        while let Some(event) = watch.next().await {
            match event {
                DocumentEvent::Snapshot(Some(data)) => match IntentOutcome::of(&data) {
                    IntentOutcome::Pending => continue,
                    IntentOutcome::Fulfilled(url) => return Ok(url),
                    IntentOutcome::Rejected(raw) => return Err(raw),
                },
                DocumentEvent::Snapshot(None) => continue,
                DocumentEvent::Error(e) => return Err(RawFailure::Store(e)),
            }
        }
        Err(RawFailure::SubscriptionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::classify::CheckoutErrorKind;
    use crate::billing::clock::FixedClock;
    use crate::billing::store::InMemoryDocumentStore;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn coordinator(store: &InMemoryDocumentStore) -> CheckoutSessionCoordinator {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
        CheckoutSessionCoordinator::new(Arc::new(store.clone()), Arc::new(clock), CheckoutPolicy::default())
    }

    #[test]
    fn test_placeholder_markers() {
        let policy = CheckoutPolicy::default();
        assert!(policy.is_placeholder_price(""));
        assert!(policy.is_placeholder_price("  "));
        assert!(policy.is_placeholder_price("price_starter_placeholder"));
        assert!(policy.is_placeholder_price("price_EXEMPLO_1"));
        assert!(!policy.is_placeholder_price("price_1SobVF9YE7qSVg1quKIHx0qM"));
    }

    #[test]
    fn test_prepare_builds_intent() {
        let store = InMemoryDocumentStore::new();
        let intent = coordinator(&store)
            .prepare(&CheckoutRequest::new("u1", "price_1Abc").with_redirects("https://a.test/ok", "https://a.test/no"))
            .unwrap();

        assert_eq!(intent.requested_price_id, "price_1Abc");
        assert_eq!(intent.success_url, "https://a.test/ok");
        assert_eq!(intent.cancel_url, "https://a.test/no");
        assert!(intent.allow_promotion_codes);
        assert!(intent.trial_from_plan);
        assert_eq!(intent.metadata.requested_at, "2025-03-01T12:00:00+00:00");

        let doc = intent.to_document(json!("SENTINEL")).unwrap();
        assert_eq!(doc["price"], "price_1Abc");
        assert_eq!(doc["metadata"]["user_id"], "u1");
        assert_eq!(doc["created"], "SENTINEL");
        assert!(doc.get("url").is_none());
        assert!(doc.get("error").is_none());
    }

    #[test]
    fn test_prepare_rejects_missing_user() {
        let store = InMemoryDocumentStore::new();
        let coordinator = coordinator(&store);
        for user_id in [" ", "a/checkout_sessions/x/y", "u1/", "..", "."] {
            let err = coordinator.prepare(&CheckoutRequest::new(user_id, "price_1Abc")).unwrap_err();
            assert_eq!(err.kind, CheckoutErrorKind::PermissionDenied, "user id {:?}", user_id);
        }
        assert!(coordinator.prepare(&CheckoutRequest::new("uid_42", "price_1Abc")).is_ok());
    }

    #[test]
    fn test_intent_outcome() {
        assert_eq!(IntentOutcome::of(&json!({"price": "p"})), IntentOutcome::Pending);
        assert_eq!(IntentOutcome::of(&json!({"url": ""})), IntentOutcome::Pending);
        assert_eq!(IntentOutcome::of(&json!({"error": null})), IntentOutcome::Pending);
        assert_eq!(
            IntentOutcome::of(&json!({"url": "https://pay.test/c/1"})),
            IntentOutcome::Fulfilled("https://pay.test/c/1".into())
        );
        assert!(matches!(
            IntentOutcome::of(&json!({"url": "https://pay.test/c/1", "error": {"message": "boom"}})),
            IntentOutcome::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn test_start_resolves_with_url() {
        let store = InMemoryDocumentStore::new();
        let mut created = store.subscribe_creations();
        let provider = store.clone();
        tokio::spawn(async move {
            if let Some((doc, _)) = created.recv().await {
                provider.merge(&doc, json!({"url": "https://checkout.test/cs_1"})).unwrap();
            }
        });

        let url = coordinator(&store).start("u1", "price_1Abc").await.unwrap();
        assert_eq!(url, "https://checkout.test/cs_1");

        let (doc, _) = store.documents_in("customers/u1/checkout_sessions").pop().unwrap();
        assert_eq!(store.listener_count(&doc), 0);
    }

    #[tokio::test]
    async fn test_store_permission_rejection() {
        let store = InMemoryDocumentStore::new();
        store.deny_writes(true);
        let err = coordinator(&store).start("u1", "price_1Abc").await.unwrap_err();
        assert_eq!(err.kind, CheckoutErrorKind::PermissionDenied);
    }
}
