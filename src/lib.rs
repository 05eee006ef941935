//! # tenant-gate
//!
//! Subscription gating and hosted-checkout negotiation for a multi-tenant
//! real-estate CRM.
//!
//! This crate provides:
//! - Timestamp normalization across the representations a document store hands back
//! - Entitlement evaluation (operator override, provisioning grace window, trials, paid states)
//! - Checkout intent creation and a bounded wait for the provider's redirect URL
//! - Classification of checkout failures into user-facing error kinds
//! - An HTTP API and CLI over the above

pub mod billing;
pub mod config;
pub mod error;

pub use billing::{
    AccessEvaluator, AccessPolicy, AccessReason, CheckoutError, CheckoutErrorKind,
    CheckoutPolicy, CheckoutRequest, CheckoutSessionCoordinator, DocumentStore,
    EntitlementDecision, InMemoryDocumentStore, NormalizedTime, OperatorAllowList, RawTimestamp,
    SubscriptionStatus, TenantSnapshot,
};
pub use config::{load_config, GateConfig};
pub use error::{GateError, GateResult};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "TENANT_GATE_CONFIG";

/// Configuration path used when neither a flag nor the environment names one
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tenant-gate/config.toml";
