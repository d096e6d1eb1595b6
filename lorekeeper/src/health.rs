//! Readiness reporting
//!
//! Internal components report directly. External collaborators (database,
//! cache, model server) plug in through [`HealthProbe`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Status of one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Degraded { reason: String },
    Unhealthy { reason: String },
}

impl ComponentStatus {
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::Degraded {
            reason: reason.into(),
        }
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self::Unhealthy {
            reason: reason.into(),
        }
    }

    /// Degraded still counts as serving.
    pub fn is_serving(&self) -> bool {
        !matches!(self, Self::Unhealthy { .. })
    }
}

/// External dependency check
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> ComponentStatus;
}

pub type SharedHealthProbe = Arc<dyn HealthProbe>;

/// Aggregate readiness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub components: BTreeMap<String, ComponentStatus>,
}

impl HealthReport {
    pub fn from_components(components: BTreeMap<String, ComponentStatus>) -> Self {
        let healthy = components.values().all(ComponentStatus::is_serving);
        Self {
            healthy,
            components,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_is_still_healthy() {
        let report = HealthReport::from_components(BTreeMap::from([
            ("store".to_string(), ComponentStatus::Healthy),
            ("cache".to_string(), ComponentStatus::degraded("slow")),
        ]));
        assert!(report.healthy);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["components"]["cache"]["status"], "degraded");
        assert_eq!(json["components"]["cache"]["reason"], "slow");
    }

    #[test]
    fn test_unhealthy_component_fails_report() {
        let report = HealthReport::from_components(BTreeMap::from([
            ("store".to_string(), ComponentStatus::Healthy),
            ("db".to_string(), ComponentStatus::unhealthy("connection refused")),
        ]));
        assert!(!report.healthy);
    }
}
