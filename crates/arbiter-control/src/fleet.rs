//! Fleet target selection.
//!
//! Picks which remote fleet a decision deploys to. Selection is a seam:
//! the shipped selector returns a single configured target for every
//! decision, but richer placement policies slot in behind the same trait.

use crate::config::FleetConfig;
use crate::error::ControlResult;
use crate::types::Decision;

/// A deployment target on the remote platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetTarget {
    /// Fleet name.
    pub name: String,
    /// Namespace to deploy into.
    pub namespace: String,
}

/// Chooses the fleet target for a decision's deployment.
pub trait FleetSelector: Send + Sync {
    /// Select the target fleet for the given decision.
    fn select_target(&self, decision: &Decision) -> ControlResult<FleetTarget>;
}

/// Selector returning one statically configured target for all decisions.
#[derive(Debug, Clone)]
pub struct StaticFleetSelector {
    target: FleetTarget,
}

impl StaticFleetSelector {
    /// Create a selector from fleet configuration.
    #[must_use]
    pub fn new(config: &FleetConfig) -> Self {
        Self {
            target: FleetTarget {
                name: config.name.clone(),
                namespace: config.namespace.clone(),
            },
        }
    }
}

impl FleetSelector for StaticFleetSelector {
    fn select_target(&self, _decision: &Decision) -> ControlResult<FleetTarget> {
        Ok(self.target.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::TenantId;

    #[test]
    fn static_selector_ignores_decision() {
        let config = FleetConfig {
            name: "edge-1".to_owned(),
            namespace: "prod-decisions".to_owned(),
        };
        let selector = StaticFleetSelector::new(&config);

        let a = Decision::new(TenantId::new("acme"), "approval");
        let b = Decision::new(TenantId::new("globex"), "fraud");

        assert_eq!(selector.select_target(&a).unwrap(), selector.select_target(&b).unwrap());
        assert_eq!(selector.select_target(&a).unwrap().namespace, "prod-decisions");
    }
}
