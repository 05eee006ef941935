//! Service configuration
//!
//! Loaded from a TOML file:
//!
//! ```toml
//! [access]
//! grace_window_secs = 3600
//! default_trial_days = 14
//! operators = ["support@imosuite.test"]
//!
//! [checkout]
//! timeout_secs = 30
//! success_url = "https://app.imosuite.test/#/admin?session=success"
//!
//! [[plans]]
//! id = "starter"
//! name = "Starter"
//! price_id = "price_1SobVF9YE7qSVg1quKIHx0qM"
//!
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [logging]
//! filter = "tenant_gate=info"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::billing::access::{MAX_DEFAULT_TRIAL_DAYS, MAX_GRACE_WINDOW_SECS};
use crate::billing::{AccessEvaluator, AccessPolicy, CheckoutPolicy, OperatorAllowList, PlanCatalog};
use crate::error::{GateError, GateResult};
use crate::{CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub access: AccessConfig,
    pub checkout: CheckoutPolicy,
    pub plans: PlanCatalog,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Entitlement policy plus the operator allow-list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    #[serde(flatten)]
    pub policy: AccessPolicy,
    /// Support identities that are never gated
    pub operators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP bind address
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "tenant_gate=info".to_string() }
    }
}

impl GateConfig {
    pub fn from_toml_str(content: &str) -> GateResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GateError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> GateResult<()> {
        let policy = &self.access.policy;
        if policy.grace_window_secs > MAX_GRACE_WINDOW_SECS {
            return Err(GateError::Config(format!(
                "access.grace_window_secs must be at most {}",
                MAX_GRACE_WINDOW_SECS
            )));
        }
        if policy.default_trial_days > MAX_DEFAULT_TRIAL_DAYS {
            return Err(GateError::Config(format!(
                "access.default_trial_days must be at most {}",
                MAX_DEFAULT_TRIAL_DAYS
            )));
        }
        if self.checkout.timeout_secs == 0 {
            return Err(GateError::Config("checkout.timeout_secs must be greater than zero".to_string()));
        }
        if self.checkout.customers_collection.is_empty() || self.checkout.sessions_collection.is_empty() {
            return Err(GateError::Config("checkout collections must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for plan in self.plans.plans() {
            if !seen.insert(plan.id.as_str()) {
                return Err(GateError::Config(format!("Duplicate plan id '{}'", plan.id)));
            }
        }
        Ok(())
    }

    pub fn operator_allow_list(&self) -> OperatorAllowList {
        OperatorAllowList::new(&self.access.operators)
    }

    pub fn access_evaluator(&self) -> AccessEvaluator {
        AccessEvaluator::new(self.access.policy.clone(), self.operator_allow_list())
    }
}

/// Pick the config path: explicit flag, then environment, then default
pub fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    File(PathBuf),
    /// The file was absent; built-in defaults are in use
    Defaults(PathBuf),
}

impl ConfigOrigin {
    /// Report the origin; call once a subscriber is installed
    pub fn log(&self, config: &GateConfig) {
        match self {
            Self::File(path) => {
                info!(path = %path.display(), plans = config.plans.plans().len(), "Configuration loaded")
            }
            Self::Defaults(path) => {
                warn!(path = %path.display(), "Config file not found, using defaults")
            }
        }
    }
}

/// Read configuration without logging, reporting whether defaults were used
pub fn read_config(path: &Path) -> GateResult<(GateConfig, ConfigOrigin)> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok((GateConfig::from_toml_str(&content)?, ConfigOrigin::File(path.to_path_buf()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok((GateConfig::default(), ConfigOrigin::Defaults(path.to_path_buf())))
        }
        Err(e) => Err(e.into()),
    }
}

/// Load configuration from file; a missing file yields defaults
pub fn load_config(path: &Path) -> GateResult<GateConfig> {
    let (config, origin) = read_config(path)?;
    origin.log(&config);
    Ok(config)
}

/// Install the global fmt subscriber; `RUST_LOG` overrides `default_filter`
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // A subscriber may already be installed (tests, embedding)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();
        assert_eq!(config.access.policy.grace_window_secs, 3600);
        assert_eq!(config.access.policy.default_trial_days, 14);
        assert_eq!(config.checkout.timeout_secs, 30);
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file() {
        let config = GateConfig::from_toml_str(
            r#"
            [access]
            grace_window_secs = 600
            operators = ["Support@Imosuite.test"]

            [checkout]
            timeout_secs = 45

            [[plans]]
            id = "starter"
            name = "Starter"
            price_id = "price_1Real"
            monthly_price_eur = 29
            "#,
        )
        .unwrap();

        assert_eq!(config.access.policy.grace_window_secs, 600);
        assert_eq!(config.access.policy.default_trial_days, 14);
        assert_eq!(config.checkout.timeout_secs, 45);
        assert_eq!(config.checkout.sessions_collection, "checkout_sessions");
        assert_eq!(config.plans.find("starter").unwrap().price_id, "price_1Real");
        assert!(config.operator_allow_list().contains("support@imosuite.test"));
    }

    #[test]
    fn test_rejects_zero_timeout_and_duplicate_plans() {
        assert!(GateConfig::from_toml_str("[checkout]\ntimeout_secs = 0\n").is_err());

        let duplicate = r#"
            [[plans]]
            id = "starter"
            name = "A"
            price_id = "price_a"
            [[plans]]
            id = "starter"
            name = "B"
            price_id = "price_b"
        "#;
        assert!(matches!(GateConfig::from_toml_str(duplicate), Err(GateError::Config(_))));
    }

    #[test]
    fn test_negative_trial_length_is_rejected() {
        assert!(GateConfig::from_toml_str("[access]\ndefault_trial_days = -3\n").is_err());
    }

    #[test]
    fn test_policy_durations_are_bounded() {
        let trial = GateConfig::from_toml_str("[access]\ndefault_trial_days = 4000000000\n");
        assert!(matches!(trial, Err(GateError::Config(_))));

        let grace = GateConfig::from_toml_str("[access]\ngrace_window_secs = 400000000\n");
        assert!(matches!(grace, Err(GateError::Config(_))));

        let at_limit = format!(
            "[access]\ngrace_window_secs = {}\ndefault_trial_days = {}\n",
            MAX_GRACE_WINDOW_SECS, MAX_DEFAULT_TRIAL_DAYS
        );
        assert!(GateConfig::from_toml_str(&at_limit).is_ok());
    }

    #[test]
    fn test_read_config_reports_origin() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("absent.toml");
        let (config, origin) = read_config(&absent).unwrap();
        assert_eq!(config, GateConfig::default());
        assert_eq!(origin, ConfigOrigin::Defaults(absent));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[checkout]\ntimeout_secs = 12").unwrap();
        let (config, origin) = read_config(file.path()).unwrap();
        assert_eq!(config.checkout.timeout_secs, 12);
        assert_eq!(origin, ConfigOrigin::File(file.path().to_path_buf()));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind = \"127.0.0.1:9000\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, GateConfig::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[checkout\ntimeout_secs = ").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = resolve_config_path(Some(PathBuf::from("/tmp/gate.toml")));
        assert_eq!(path, PathBuf::from("/tmp/gate.toml"));
    }
}
