//! Entitlement Evaluation
//!
//! Computes whether a tenant's gated functionality is unlocked from its
//! subscription snapshot. Evaluation is pure and synchronous so views can
//! call it on every render.
//!
//! Rules, first match wins:
//!
//! | # | Condition                                  | access | trial | days            |
//! |---|--------------------------------------------|--------|-------|-----------------|
//! | 1 | acting identity on the operator allow-list | yes    | yes   | 999             |
//! | 2 | tenant created less than the grace window  | yes    | yes   | trial length    |
//! | 3 | no subscription record                     | no     | no    | 0               |
//! | 4 | `active` or `past_due`                     | yes    | no    | 0               |
//! | 5 | `trialing`, trial end in the future        | yes    | yes   | ceil(remaining) |
//! | 5 | `trialing`, trial end passed               | no     | yes   | 0               |
//! | 6 | anything else                              | no     | no    | 0               |

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::tenant::{SubscriptionStatus, TenantSnapshot};
use super::timestamp::NormalizedTime;

/// Days reported to operators, who are never gated
pub const OPERATOR_DAYS_REMAINING: u32 = 999;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Largest grace window configuration accepts (ten years)
pub const MAX_GRACE_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Largest default trial configuration accepts (ten years)
pub const MAX_DEFAULT_TRIAL_DAYS: u32 = 10 * 365;

/// Access policy constants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPolicy {
    /// Unconditional access window after tenant creation (seconds)
    pub grace_window_secs: u64,
    /// Trial length assumed when a trialing tenant has no explicit trial end
    pub default_trial_days: u32,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            grace_window_secs: 60 * 60,
            default_trial_days: 14,
        }
    }
}

impl AccessPolicy {
    pub fn grace_window(&self) -> Duration {
        Duration::from_std(std::time::Duration::from_secs(self.grace_window_secs)).unwrap_or(Duration::MAX)
    }

    pub fn default_trial(&self) -> Duration {
        Duration::days(i64::from(self.default_trial_days))
    }
}

/// Identities (support staff) that are never blocked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorAllowList {
    identities: HashSet<String>,
}

impl OperatorAllowList {
    pub fn new<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            identities: identities
                .into_iter()
                .map(|id| Self::canonical(id.as_ref()))
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, identity: &str) -> bool {
        let identity = Self::canonical(identity);
        !identity.is_empty() && self.identities.contains(&identity)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    fn canonical(identity: &str) -> String {
        identity.trim().to_lowercase()
    }
}

/// Why a decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    OperatorOverride,
    GraceWindow,
    /// Grace window elapsed and no subscription record was ever provisioned
    NoSubscription,
    Paid,
    TrialActive,
    TrialExpired,
    /// Canceled or unrecognised status
    Inactive,
}

/// Computed entitlement for one tenant at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementDecision {
    pub has_access: bool,
    pub is_trial: bool,
    pub days_remaining: u32,
    pub reason: AccessReason,
}

impl EntitlementDecision {
    fn new(has_access: bool, is_trial: bool, days_remaining: u32, reason: AccessReason) -> Self {
        Self { has_access, is_trial, days_remaining, reason }
    }

    fn locked(reason: AccessReason) -> Self {
        Self::new(false, false, 0, reason)
    }
}

/// Entitlement evaluator configured with policy and operator allow-list
#[derive(Debug, Clone, Default)]
pub struct AccessEvaluator {
    policy: AccessPolicy,
    operators: OperatorAllowList,
}

impl AccessEvaluator {
    pub fn new(policy: AccessPolicy, operators: OperatorAllowList) -> Self {
        Self { policy, operators }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn operators(&self) -> &OperatorAllowList {
        &self.operators
    }

    /// Evaluate a tenant's entitlement for the acting user at `now`
    pub fn evaluate(
        &self,
        snapshot: &TenantSnapshot,
        acting_identity: Option<&str>,
        now: DateTime<Utc>,
    ) -> EntitlementDecision {
        let decision = self.decide(snapshot, acting_identity, now);
        debug!(
            tenant_id = %snapshot.tenant_id,
            status = %snapshot.subscription_status,
            reason = ?decision.reason,
            has_access = decision.has_access,
            days_remaining = decision.days_remaining,
            "Entitlement evaluated"
        );
        decision
    }

    fn decide(
        &self,
        snapshot: &TenantSnapshot,
        acting_identity: Option<&str>,
        now: DateTime<Utc>,
    ) -> EntitlementDecision {
        if acting_identity.is_some_and(|id| self.operators.contains(id)) {
            return EntitlementDecision::new(true, true, OPERATOR_DAYS_REMAINING, AccessReason::OperatorOverride);
        }

        let created_at = match snapshot.created_at.normalize() {
            NormalizedTime::Resolved(at) => Some(at),
            // Server stamp not visible yet: the tenant was written moments ago
            NormalizedTime::Unresolved if snapshot.created_at.is_server_pending() => Some(now),
            NormalizedTime::Unresolved => {
                warn!(tenant_id = %snapshot.tenant_id, "Tenant creation time unresolvable, skipping grace window");
                None
            }
        };

        if let Some(created_at) = created_at {
            if now.signed_duration_since(created_at) < self.policy.grace_window() {
                return EntitlementDecision::new(
                    true,
                    true,
                    self.policy.default_trial_days,
                    AccessReason::GraceWindow,
                );
            }
        }

        match &snapshot.subscription_status {
            SubscriptionStatus::None => EntitlementDecision::locked(AccessReason::NoSubscription),
            status if status.is_paid() => EntitlementDecision::new(true, false, 0, AccessReason::Paid),
            SubscriptionStatus::Trialing => self.trial_decision(snapshot, created_at, now),
            _ => EntitlementDecision::locked(AccessReason::Inactive),
        }
    }

    fn trial_decision(
        &self,
        snapshot: &TenantSnapshot,
        created_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> EntitlementDecision {
        let trial_ends_at = snapshot
            .trial_ends_at
            .as_ref()
            .and_then(|raw| raw.normalize().instant())
            .or_else(|| created_at.and_then(|at| at.checked_add_signed(self.policy.default_trial())));

        let expired = EntitlementDecision::new(false, true, 0, AccessReason::TrialExpired);
        let Some(trial_ends_at) = trial_ends_at else {
            return expired;
        };

        let remaining_ms = trial_ends_at.signed_duration_since(now).num_milliseconds();
        if remaining_ms < 0 {
            return expired;
        }

        // Ceiling so "11 hours left" reads as one day, never zero
        let days = remaining_ms / DAY_MS + i64::from(remaining_ms % DAY_MS != 0);
        EntitlementDecision::new(
            true,
            true,
            u32::try_from(days).unwrap_or(u32::MAX),
            AccessReason::TrialActive,
        )
    }
}
