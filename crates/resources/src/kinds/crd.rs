//! CustomResourceDefinitions and the per-kind info custom resources are built from.

use std::time::Duration;

use serde_json::Value as Json;
use vigil_core::json::{self, condition, str_at};
use vigil_core::{ValidationError, ROLLOUT_CONDITIONS_ANNOTATION};

use crate::{KubernetesResource, ResourceBase, RolloutConditions};

pub const KIND: &str = "CustomResourceDefinition";
pub const TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// What instances of a custom kind need from their definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrdInfo {
    pub group: String,
    pub kind: String,
    pub cluster_scoped: bool,
    pub rollout_conditions: Option<RolloutConditions>,
}

impl CrdInfo {
    /// Read a CRD manifest or live object. Rollout conditions are compiled here, so a bad
    /// annotation is reported before anything is applied.
    pub fn from_definition(def: &Json) -> Result<Self, ValidationError> {
        let id = format!("{}/{}", KIND, json::name(def).unwrap_or_default());
        let required = |pointer: &str, what: &str| {
            str_at(def, pointer).map(str::to_string).ok_or_else(|| ValidationError::InvalidDefinition {
                id: id.clone(),
                reason: format!("missing {}", what),
            })
        };
        let group = required("/spec/group", "spec.group")?;
        let kind = required("/spec/names/kind", "spec.names.kind")?;
        let rollout_conditions = json::annotation(def, ROLLOUT_CONDITIONS_ANNOTATION)
            .map(RolloutConditions::parse)
            .transpose()
            .map_err(|reason| ValidationError::InvalidRolloutConditions { id: id.clone(), reason })?;
        Ok(Self {
            group,
            kind,
            cluster_scoped: str_at(def, "/spec/scope") == Some("Cluster"),
            rollout_conditions,
        })
    }

    /// kubectl type for instances, e.g. `Widget.example.com`.
    pub fn type_name(&self) -> String {
        format!("{}.{}", self.kind, self.group)
    }
}

#[derive(Debug)]
pub struct CustomResourceDefinition {
    base: ResourceBase,
    info: CrdInfo,
}

pub(crate) fn build(base: ResourceBase) -> Result<Box<dyn KubernetesResource>, ValidationError> {
    let info = CrdInfo::from_definition(base.definition())?;
    Ok(Box::new(CustomResourceDefinition { base, info }))
}

impl CustomResourceDefinition {
    pub fn info(&self) -> &CrdInfo {
        &self.info
    }

    fn condition_field(&self, type_: &str, key: &str) -> Option<&str> {
        condition(self.base.instance()?, type_)?.get(key)?.as_str()
    }
}

impl KubernetesResource for CustomResourceDefinition {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn deploy_succeeded(&self) -> bool {
        self.condition_field("Established", "status") == Some("True")
            && self.condition_field("NamesAccepted", "status") == Some("True")
    }

    fn deploy_failed(&self) -> bool {
        self.condition_field("NamesAccepted", "status") == Some("False")
    }

    fn status(&self) -> String {
        if !self.base.exists() {
            "Not found".to_string()
        } else if self.deploy_succeeded() {
            "Names accepted".to_string()
        } else {
            self.condition_field("NamesAccepted", "reason").unwrap_or("Unknown").to_string()
        }
    }

    fn failure_message(&self) -> Option<String> {
        if !self.deploy_failed() {
            return None;
        }
        Some(format!(
            "Names not accepted: {}",
            self.condition_field("NamesAccepted", "message").unwrap_or_default()
        ))
    }
}
