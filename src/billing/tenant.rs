//! Tenant Subscription Snapshot
//!
//! Read-only view of a tenant document as far as entitlement is concerned.

use serde::Deserialize;
use serde_json::Value;

use super::timestamp::RawTimestamp;
use crate::error::GateResult;

/// Subscription lifecycle states as written by the payment integration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// No subscription record exists yet
    None,
    Trialing,
    Active,
    PastDue,
    Canceled,
    /// Any status this crate does not gate on (`unpaid`, `incomplete`, ...)
    Other(String),
}

impl SubscriptionStatus {
    pub fn parse(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "trialing" => Self::Trialing,
            "active" => Self::Active,
            "past_due" => Self::PastDue,
            "canceled" | "cancelled" => Self::Canceled,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Other(s) => s,
        }
    }

    /// Paid states that unlock access without a trial clock
    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Active | Self::PastDue)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a tenant's subscription state
#[derive(Debug, Clone, PartialEq)]
pub struct TenantSnapshot {
    pub tenant_id: String,
    pub created_at: RawTimestamp,
    pub subscription_status: SubscriptionStatus,
    pub trial_ends_at: Option<RawTimestamp>,
    pub plan_id: Option<String>,
}

impl TenantSnapshot {
    /// Snapshot of a tenant with no subscription record yet
    pub fn new(tenant_id: impl Into<String>, created_at: impl Into<RawTimestamp>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            created_at: created_at.into(),
            subscription_status: SubscriptionStatus::None,
            trial_ends_at: None,
            plan_id: None,
        }
    }

    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.subscription_status = status;
        self
    }

    pub fn with_trial_end(mut self, trial_ends_at: impl Into<RawTimestamp>) -> Self {
        self.trial_ends_at = Some(trial_ends_at.into());
        self
    }

    pub fn with_plan(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    /// Decode a raw tenant document (`tenants/{id}`)
    pub fn from_document(document: &Value) -> GateResult<Self> {
        let doc: TenantDocument = serde_json::from_value(document.clone())?;

        let snapshot = match doc.subscription {
            None => Self::new(doc.id, doc.created_at),
            Some(sub) => Self {
                tenant_id: doc.id,
                created_at: doc.created_at,
                subscription_status: sub
                    .status
                    .as_deref()
                    .map(SubscriptionStatus::parse)
                    .unwrap_or_else(|| SubscriptionStatus::Other(String::new())),
                trial_ends_at: sub.trial_ends_at,
                plan_id: sub.plan_id,
            },
        };
        Ok(snapshot)
    }
}

#[derive(Deserialize)]
struct TenantDocument {
    #[serde(default)]
    id: String,
    #[serde(default, alias = "createdAt")]
    created_at: RawTimestamp,
    #[serde(default)]
    subscription: Option<SubscriptionDocument>,
}

#[derive(Deserialize)]
struct SubscriptionDocument {
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "planId")]
    plan_id: Option<String>,
    #[serde(default, alias = "trialEndsAt")]
    trial_ends_at: Option<RawTimestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_status() {
        assert_eq!(SubscriptionStatus::parse("active"), SubscriptionStatus::Active);
        assert_eq!(SubscriptionStatus::parse("PAST_DUE"), SubscriptionStatus::PastDue);
        assert_eq!(SubscriptionStatus::parse("cancelled"), SubscriptionStatus::Canceled);
        assert_eq!(SubscriptionStatus::parse("trialing"), SubscriptionStatus::Trialing);
        assert_eq!(SubscriptionStatus::parse("unpaid"), SubscriptionStatus::Other("unpaid".into()));
        assert!(SubscriptionStatus::PastDue.is_paid());
        assert!(!SubscriptionStatus::Trialing.is_paid());
    }

    #[test]
    fn test_decode_registration_document() {
        let doc = json!({
            "id": "tnt_abc123",
            "nome": "Casa Nova",
            "created_at": "2025-03-01T12:00:00.000Z",
            "subscription": {
                "status": "trialing",
                "plan_id": "starter",
                "trial_ends_at": "2025-03-15T12:00:00.000Z"
            }
        });

        let snapshot = TenantSnapshot::from_document(&doc).unwrap();
        assert_eq!(snapshot.tenant_id, "tnt_abc123");
        assert_eq!(snapshot.subscription_status, SubscriptionStatus::Trialing);
        assert_eq!(snapshot.plan_id.as_deref(), Some("starter"));
        assert!(snapshot.created_at.normalize().is_resolved());
        assert!(snapshot.trial_ends_at.unwrap().normalize().is_resolved());
    }

    #[test]
    fn test_decode_without_subscription() {
        let doc = json!({
            "id": "tnt_new",
            "created_at": {"_methodName": "serverTimestamp"}
        });

        let snapshot = TenantSnapshot::from_document(&doc).unwrap();
        assert_eq!(snapshot.subscription_status, SubscriptionStatus::None);
        assert!(snapshot.created_at.is_server_pending());
        assert!(snapshot.trial_ends_at.is_none());
    }

    #[test]
    fn test_decode_null_subscription_and_missing_status() {
        let doc = json!({"id": "t", "created_at": 0, "subscription": null});
        assert_eq!(
            TenantSnapshot::from_document(&doc).unwrap().subscription_status,
            SubscriptionStatus::None
        );

        let doc = json!({"id": "t", "created_at": 0, "subscription": {"plan_id": "starter"}});
        assert_eq!(
            TenantSnapshot::from_document(&doc).unwrap().subscription_status,
            SubscriptionStatus::Other(String::new())
        );
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(TenantSnapshot::from_document(&json!("tenant")).is_err());
    }
}
