//! Billing Gate Module
//!
//! Decides whether a tenant's paid functionality is unlocked and negotiates
//! hosted checkout sessions through the tenant document store.
//!
//! This module provides:
//! - Timestamp normalization (ISO strings, epoch millis, store timestamps, pending sentinels)
//! - Entitlement evaluation with operator override and provisioning grace window
//! - Checkout intent creation raced against a bounded timeout
//! - Failure classification into user-facing error kinds

pub mod access;
pub mod api;
pub mod checkout;
pub mod classify;
pub mod clock;
pub mod plans;
pub mod sandbox;
pub mod store;
pub mod tenant;
pub mod timestamp;

// Re-export main types
pub use access::{AccessEvaluator, AccessPolicy, AccessReason, EntitlementDecision, OperatorAllowList};
pub use api::{create_router as create_billing_router, AppState as BillingAppState};
pub use checkout::{CheckoutIntent, CheckoutPolicy, CheckoutRequest, CheckoutSessionCoordinator};
pub use classify::{classify, CheckoutError, CheckoutErrorKind, ProviderErrorPayload, RawFailure};
pub use clock::{Clock, FixedClock, SystemClock};
pub use plans::{Plan, PlanCatalog};
pub use sandbox::{spawn_sandbox_provider, SandboxBehavior};
pub use store::{DocumentEvent, DocumentRef, DocumentStore, DocumentWatch, InMemoryDocumentStore, StoreError};
pub use tenant::{SubscriptionStatus, TenantSnapshot};
pub use timestamp::{normalize, NormalizedTime, RawTimestamp};
