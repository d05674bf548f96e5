//! Instances of a CRD that declares rollout conditions.

use std::time::Duration;

use vigil_core::json;

use crate::{KubernetesResource, ResourceBase, RolloutConditions};

pub const TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
pub struct CustomResource {
    base: ResourceBase,
    conditions: RolloutConditions,
}

impl CustomResource {
    pub fn new(base: ResourceBase, conditions: RolloutConditions) -> Self {
        Self { base, conditions }
    }

    /// Controllers that never publish observedGeneration get the benefit of the doubt.
    fn observed_current_spec(&self) -> bool {
        let Some(inst) = self.base.instance() else { return false };
        match json::observed_generation(inst) {
            Some(_) => json::generation_is_current(inst),
            None => true,
        }
    }
}

impl KubernetesResource for CustomResource {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn deploy_succeeded(&self) -> bool {
        match self.base.instance() {
            Some(inst) => self.observed_current_spec() && self.conditions.succeeded(inst),
            None => false,
        }
    }

    fn deploy_failed(&self) -> bool {
        match self.base.instance() {
            Some(inst) => self.observed_current_spec() && self.conditions.failed(inst),
            None => false,
        }
    }

    fn status(&self) -> String {
        if !self.base.exists() {
            "Not found".to_string()
        } else if self.deploy_succeeded() {
            "Healthy".to_string()
        } else if self.deploy_failed() {
            "Unhealthy".to_string()
        } else {
            "Reconciling".to_string()
        }
    }

    fn failure_message(&self) -> Option<String> {
        if !self.deploy_failed() {
            return None;
        }
        let messages = self.conditions.failure_messages(self.base.instance()?);
        Some(messages.join("\n"))
    }

    fn timeout_message(&self) -> String {
        format!(
            "{}\nRollout conditions for {} were not met in time.",
            crate::STANDARD_TIMEOUT_MESSAGE,
            self.base.type_name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value as Json};

    fn widget(metadata: Json, status: Json) -> CustomResource {
        let obj = json!({"apiVersion": "example.com/v1", "kind": "Widget", "metadata": metadata, "status": status});
        CustomResource::new(ResourceBase::observed("Widget", obj, "ns", "c", TIMEOUT), RolloutConditions::defaults())
    }

    #[test]
    fn stale_generation_hides_both_outcomes() {
        let stale = widget(
            json!({"name": "w", "generation": 3}),
            json!({"observedGeneration": 2, "conditions": [{"type": "Ready", "status": "True"}, {"type": "Failed", "status": "True"}]}),
        );
        assert!(!stale.deploy_succeeded());
        assert!(!stale.deploy_failed());
    }

    #[test]
    fn missing_observed_generation_is_lenient() {
        let w = widget(json!({"name": "w", "generation": 3}), json!({"conditions": [{"type": "Ready", "status": "True"}]}));
        assert!(w.deploy_succeeded());
        assert_eq!(w.status(), "Healthy");
    }

    #[test]
    fn failure_uses_condition_message() {
        let w = widget(
            json!({"name": "w", "generation": 1}),
            json!({"observedGeneration": 1, "conditions": [{"type": "Failed", "status": "True", "message": "bad config"}]}),
        );
        assert!(w.deploy_failed());
        assert_eq!(w.failure_message().unwrap(), "bad config");
    }
}
