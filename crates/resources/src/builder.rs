//! Manifest -> resource construction: registry dispatch, CRD awareness, timeout overrides.

use std::time::Duration;

use serde_json::Value as Json;
use tracing::{debug, warn};
use vigil_core::json::str_at;
use vigil_core::ValidationError;
use vigil_store::SyncMediator;

use crate::base::api_group;
use crate::kinds::{self, crd, custom_resource, CustomResource, UnknownResource};
use crate::{KubernetesResource, ResourceBase};

pub use crate::kinds::crd::CrdInfo;

#[derive(Debug, Clone)]
pub struct ResourceBuilder {
    namespace: String,
    context: String,
    timeout_override: Option<Duration>,
    crds: Vec<CrdInfo>,
}

impl ResourceBuilder {
    pub fn new(namespace: impl Into<String>, context: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), context: context.into(), timeout_override: None, crds: Vec::new() }
    }

    /// Replace every resource's timeout, ignoring kind defaults and annotations.
    pub fn with_timeout_override(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_override = timeout;
        self
    }

    /// Later registrations for the same kind win.
    pub fn register_crd(&mut self, info: CrdInfo) {
        self.crds.retain(|c| !(c.group == info.group && c.kind == info.kind));
        self.crds.push(info);
    }

    pub fn crds(&self) -> &[CrdInfo] {
        &self.crds
    }

    fn crd_for(&self, group: &str, kind: &str) -> Option<&CrdInfo> {
        self.crds.iter().find(|c| c.group == group && c.kind == kind)
    }

    /// Learn the CRDs already installed in the cluster. Ones with unusable annotations are skipped.
    pub async fn discover_crds(&mut self, cache: &SyncMediator) -> usize {
        let mut found = 0;
        for def in cache.list_all(crd::KIND, None).await {
            match CrdInfo::from_definition(&def) {
                Ok(info) => {
                    self.register_crd(info);
                    found += 1;
                }
                Err(e) => warn!(error = %e, "ignoring installed CRD"),
            }
        }
        debug!(found, "discovered CRDs");
        found
    }

    pub fn build(&self, definition: Json) -> Result<Box<dyn KubernetesResource>, ValidationError> {
        let kind = str_at(&definition, "/kind").ok_or(ValidationError::MissingField("kind"))?.to_string();
        if let Some(entry) = kinds::lookup(&kind) {
            let base = self.base(definition, entry.timeout)?;
            return (entry.build)(base);
        }

        let group = api_group(str_at(&definition, "/apiVersion").unwrap_or_default());
        if let Some(info) = self.crd_for(&group, &kind) {
            let base = self
                .base(definition, custom_resource::TIMEOUT)?
                .with_type_name(info.type_name(), info.cluster_scoped);
            let resource: Box<dyn KubernetesResource> = match &info.rollout_conditions {
                Some(conditions) => Box::new(CustomResource::new(base, conditions.clone())),
                None => Box::new(UnknownResource::new(base)),
            };
            return Ok(resource);
        }

        let base = self.base(definition, kinds::UNKNOWN_TIMEOUT)?;
        let base = if group.is_empty() {
            base
        } else {
            let cluster_scoped = base.cluster_scoped();
            base.with_type_name(format!("{}.{}", kind, group), cluster_scoped)
        };
        Ok(Box::new(UnknownResource::new(base)))
    }

    /// Build a whole manifest set. CRDs in the set are registered first so custom resources
    /// defined alongside them get their rollout conditions.
    pub fn build_all(&mut self, definitions: Vec<Json>) -> Result<Vec<Box<dyn KubernetesResource>>, ValidationError> {
        for def in definitions.iter().filter(|d| str_at(d, "/kind") == Some(crd::KIND)) {
            self.register_crd(CrdInfo::from_definition(def)?);
        }
        definitions.into_iter().map(|d| self.build(d)).collect()
    }

    fn base(&self, definition: Json, default_timeout: Duration) -> Result<ResourceBase, ValidationError> {
        ResourceBase::from_definition(definition, &self.namespace, &self.context, default_timeout, self.timeout_override)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_core::{ResourceId, REQUIRED_ROLLOUT_ANNOTATION, ROLLOUT_CONDITIONS_ANNOTATION};

    fn widget_crd(conditions: Option<&str>) -> Json {
        let mut def = json!({
            "apiVersion": "apiextensions.k8s.io/v1", "kind": "CustomResourceDefinition",
            "metadata": {"name": "widgets.example.com"},
            "spec": {"group": "example.com", "scope": "Namespaced", "names": {"kind": "Widget"}}
        });
        if let Some(c) = conditions {
            def["metadata"]["annotations"] = json!({ROLLOUT_CONDITIONS_ANNOTATION: c});
        }
        def
    }

    fn widget() -> Json {
        json!({"apiVersion": "example.com/v1", "kind": "Widget", "metadata": {"name": "w"}})
    }

    #[test]
    fn registry_dispatch_uses_kind_timeouts() {
        let b = ResourceBuilder::new("shop", "prod");
        let d = b.build(json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web"}})).unwrap();
        assert_eq!(d.id(), &ResourceId::new("Deployment", "shop", "web"));
        assert_eq!(d.base().timeout(), kinds::deployment::TIMEOUT);
        assert_eq!(d.dependency_kinds(), &["ReplicaSet", "Pod"]);

        let cm = b.build(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "c"}})).unwrap();
        assert_eq!(cm.base().timeout(), Duration::from_secs(30));
    }

    #[test]
    fn override_beats_every_default() {
        let b = ResourceBuilder::new("shop", "prod").with_timeout_override(Some(Duration::from_secs(12)));
        let d = b.build(json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web"}})).unwrap();
        assert_eq!(d.base().timeout(), Duration::from_secs(12));
    }

    #[test]
    fn invalid_annotations_surface_before_any_work() {
        let b = ResourceBuilder::new("shop", "prod");
        let err = b
            .build(json!({"apiVersion": "apps/v1", "kind": "DaemonSet",
                "metadata": {"name": "agent", "annotations": {REQUIRED_ROLLOUT_ANNOTATION: "sometimes"}}}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidRollout { .. }));

        let mut b = ResourceBuilder::new("shop", "prod");
        let err = b.build_all(vec![widget_crd(Some("{not json")), widget()]).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidRolloutConditions { .. }));
    }

    #[test]
    fn manifests_pinned_to_another_namespace_are_rejected() {
        let mut b = ResourceBuilder::new("shop", "prod");
        let err = b
            .build_all(vec![
                json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}}),
                json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web", "namespace": "other"}}),
            ])
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidDefinition { ref id, .. } if id == "Deployment/web"), "{:?}", err);
    }

    #[test]
    fn custom_resources_follow_their_crd() {
        let mut b = ResourceBuilder::new("shop", "prod");
        let built = b.build_all(vec![widget_crd(Some("true")), widget()]).unwrap();
        assert_eq!(built.len(), 2);
        let w = &built[1];
        assert_eq!(w.base().type_name(), "Widget.example.com");
        assert_eq!(w.base().timeout(), custom_resource::TIMEOUT);
        assert_eq!(w.status(), "Not found");
    }

    #[test]
    fn unknown_kinds_fall_back_to_existence() {
        let b = ResourceBuilder::new("shop", "prod");
        let g = b.build(json!({"apiVersion": "gadgets.io/v1", "kind": "Gadget", "metadata": {"name": "g"}})).unwrap();
        assert_eq!(g.base().type_name(), "Gadget.gadgets.io");
        assert_eq!(g.base().timeout(), kinds::UNKNOWN_TIMEOUT);
        assert!(!g.deploy_failed());
    }
}
