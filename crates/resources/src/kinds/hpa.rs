//! HorizontalPodAutoscalers, read through `autoscaling/v2` for their conditions.

use std::time::Duration;

use serde_json::Value as Json;
use vigil_core::json::condition;
use vigil_core::ValidationError;

use crate::{KubernetesResource, ResourceBase};

pub const KIND: &str = "HorizontalPodAutoscaler";
pub const TIMEOUT: Duration = Duration::from_secs(3 * 60);
/// Conditions are only reported by the v2 API.
const TYPE_NAME: &str = "HorizontalPodAutoscaler.v2.autoscaling";

#[derive(Debug)]
pub struct HorizontalPodAutoscaler {
    base: ResourceBase,
}

pub(crate) fn build(base: ResourceBase) -> Result<Box<dyn KubernetesResource>, ValidationError> {
    Ok(Box::new(HorizontalPodAutoscaler { base: base.with_type_name(TYPE_NAME, false) }))
}

impl HorizontalPodAutoscaler {
    fn condition(&self, type_: &str) -> Option<&Json> {
        condition(self.base.instance()?, type_)
    }

    fn field<'a>(c: &'a Json, key: &str) -> &'a str {
        c.get(key).and_then(|v| v.as_str()).unwrap_or_default()
    }

    fn scaling_disabled(&self) -> bool {
        self.condition("ScalingActive")
            .is_some_and(|c| Self::field(c, "status") == "False" && Self::field(c, "reason") == "ScalingDisabled")
    }
}

impl KubernetesResource for HorizontalPodAutoscaler {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn deploy_succeeded(&self) -> bool {
        self.condition("ScalingActive").is_some_and(|c| Self::field(c, "status") == "True") || self.scaling_disabled()
    }

    fn deploy_failed(&self) -> bool {
        self.condition("AbleToScale").is_some_and(|c| Self::field(c, "status") == "False")
    }

    fn status(&self) -> String {
        if !self.base.exists() {
            "Not found".to_string()
        } else if self.scaling_disabled() {
            "ScalingDisabled".to_string()
        } else if self.deploy_succeeded() {
            "Configured".to_string()
        } else {
            self.condition("ScalingActive")
                .map(|c| Self::field(c, "reason").to_string())
                .unwrap_or_else(|| "Unknown".to_string())
        }
    }

    fn failure_message(&self) -> Option<String> {
        let c = self.condition("AbleToScale")?;
        (Self::field(c, "status") == "False").then(|| format!("{}: {}", Self::field(c, "reason"), Self::field(c, "message")))
    }

    fn timeout_message(&self) -> String {
        match self.condition("ScalingActive") {
            Some(c) => format!("{}: {}", Self::field(c, "reason"), Self::field(c, "message")),
            None => crate::STANDARD_TIMEOUT_MESSAGE.to_string(),
        }
    }
}
