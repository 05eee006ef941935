//! Subscription Plans
//!
//! Named plans and the external price identifiers the checkout provider knows
//! them by. Shipped defaults carry placeholder price ids; a deployment must
//! configure the real ones or checkout fails as misconfigured.

use serde::{Deserialize, Serialize};

/// Subscription plan definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    /// Provider-side price identifier
    pub price_id: String,
    /// Monthly price in whole euros (display only)
    #[serde(default)]
    pub monthly_price_eur: u32,
    #[serde(default)]
    pub features: Vec<String>,
}

/// Ordered set of plans offered on the pricing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(vec![
            Plan {
                id: "starter".to_string(),
                name: "Starter".to_string(),
                price_id: "price_starter_placeholder".to_string(),
                monthly_price_eur: 29,
                features: vec![
                    "Up to 50 listings".to_string(),
                    "Agency website".to_string(),
                    "AI listing descriptions".to_string(),
                ],
            },
            Plan {
                id: "business".to_string(),
                name: "Business".to_string(),
                price_id: "price_business_placeholder".to_string(),
                monthly_price_eur: 49,
                features: vec![
                    "Unlimited listings".to_string(),
                    "Team members".to_string(),
                    "Custom domain".to_string(),
                    "Lead management".to_string(),
                ],
            },
        ])
    }
}

impl PlanCatalog {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self { plans }
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    /// Find a plan by ID
    pub fn find(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    /// Find a plan by provider price ID
    pub fn find_by_price(&self, price_id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.price_id == price_id)
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.plans().len(), 2);
        assert_eq!(catalog.find("starter").unwrap().monthly_price_eur, 29);
        assert_eq!(catalog.find_by_price("price_business_placeholder").unwrap().id, "business");
        assert!(catalog.find("enterprise").is_none());
    }

    #[test]
    fn test_catalog_deserializes_from_list() {
        let catalog: PlanCatalog = serde_json::from_str(
            r#"[{"id": "starter", "name": "Starter", "price_id": "price_1Abc"}]"#,
        )
        .unwrap();
        let plan = catalog.find("starter").unwrap();
        assert_eq!(plan.price_id, "price_1Abc");
        assert!(plan.features.is_empty());
    }
}
