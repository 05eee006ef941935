//! Sandbox checkout provider
//!
//! Stands in for the payment integration when running against the in-memory
//! store: it watches for new checkout intents and writes back a redirect URL,
//! a provider error, or nothing at all.

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::store::InMemoryDocumentStore;

/// How the sandbox answers each intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxBehavior {
    /// Write `url` pointing at a fake hosted checkout page
    Fulfil,
    /// Write `error.message`
    Reject(String),
    /// Never answer
    Silent,
}

/// Redirect URL the sandbox writes for an intent
pub fn sandbox_checkout_url(intent_id: &str) -> String {
    format!("https://checkout.sandbox.test/c/{}", intent_id)
}

/// Answer every checkout intent created from now on
pub fn spawn_sandbox_provider(store: InMemoryDocumentStore, behavior: SandboxBehavior) -> JoinHandle<()> {
    let mut created = store.subscribe_creations();
    info!(?behavior, "Sandbox checkout provider started");

    tokio::spawn(async move {
        while let Some((document, data)) = created.recv().await {
            // Only checkout intents carry a price
            if data.get("price").is_none() {
                continue;
            }

            let patch = match &behavior {
                SandboxBehavior::Fulfil => json!({ "url": sandbox_checkout_url(&document.id) }),
                SandboxBehavior::Reject(message) => json!({ "error": { "message": message } }),
                SandboxBehavior::Silent => continue,
            };

            debug!(path = %document.path, "Sandbox provider answering intent");
            if let Err(e) = store.merge(&document, patch) {
                debug!(path = %document.path, error = %e, "Sandbox provider could not answer");
            }
        }
    })
}
