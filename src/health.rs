//! Health reporting for the feedback engine
//!
//! Each component reports `{healthy, issues}`; the coordinator rolls
//! the per-component results into one summary.

use serde::{Deserialize, Serialize};

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Health of a single component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub healthy: bool,
    pub issues: Vec<String>,
}

impl ComponentHealth {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            healthy: true,
            issues: Vec::new(),
        }
    }

    pub fn unhealthy(component: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            healthy: false,
            issues: vec![issue.into()],
        }
    }

    pub fn with_issue(mut self, issue: impl Into<String>) -> Self {
        self.issues.push(issue.into());
        self
    }
}

/// Overall health summary across components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: CheckStatus,
    pub components: Vec<ComponentHealth>,
}

impl HealthReport {
    pub fn from_components(components: Vec<ComponentHealth>) -> Self {
        let unhealthy = components.iter().filter(|c| !c.healthy).count();
        let warned = components
            .iter()
            .filter(|c| c.healthy && !c.issues.is_empty())
            .count();
        let status = if unhealthy > 0 {
            CheckStatus::Fail
        } else if warned > 0 {
            CheckStatus::Warn
        } else {
            CheckStatus::Pass
        };
        Self { status, components }
    }

    pub fn healthy(&self) -> bool {
        self.status != CheckStatus::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_rolls_up_failures() {
        let report = HealthReport::from_components(vec![
            ComponentHealth::healthy("evaluator_chain"),
            ComponentHealth::unhealthy("event_bus", "queue saturated"),
        ]);
        assert_eq!(report.status, CheckStatus::Fail);
        assert!(!report.healthy());
    }

    #[test]
    fn test_report_warns_on_issues_without_failure() {
        let report = HealthReport::from_components(vec![
            ComponentHealth::healthy("history").with_issue("nearing retention cap")
        ]);
        assert_eq!(report.status, CheckStatus::Warn);
        assert!(report.healthy());
    }

    #[test]
    fn test_all_pass() {
        let report =
            HealthReport::from_components(vec![ComponentHealth::healthy("optimizer")]);
        assert_eq!(report.status, CheckStatus::Pass);
    }
}
