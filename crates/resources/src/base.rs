//! State shared by every resource kind: identity, manifest, last observation, timeout.

use std::time::Duration;

use serde_json::Value as Json;
use tracing::debug;
use vigil_core::duration::parse_timeout_override;
use vigil_core::json::{self, str_at};
use vigil_core::{is_cluster_scoped, ResourceId, ValidationError, TIMEOUT_OVERRIDE_ANNOTATION};
use vigil_store::SyncMediator;

#[derive(Debug, Clone)]
pub struct ResourceBase {
    id: ResourceId,
    context: String,
    type_name: String,
    group: String,
    cluster_scoped: bool,
    definition: Json,
    instance: Option<Json>,
    synced: bool,
    timeout: Duration,
}

/// `apps/v1` -> `apps`, `v1` -> `` (core group).
pub fn api_group(api_version: &str) -> String {
    match api_version.rsplit_once('/') {
        Some((group, _)) => group.to_string(),
        None => String::new(),
    }
}

impl ResourceBase {
    /// Build from a manifest. The timeout annotation overrides `default_timeout`; an explicit
    /// `timeout_override` overrides both.
    pub fn from_definition(
        definition: Json,
        namespace: &str,
        context: &str,
        default_timeout: Duration,
        timeout_override: Option<Duration>,
    ) -> Result<Self, ValidationError> {
        let kind = str_at(&definition, "/kind")
            .filter(|k| !k.is_empty())
            .ok_or(ValidationError::MissingField("kind"))?
            .to_string();
        let name = json::name(&definition)
            .filter(|n| !n.is_empty())
            .ok_or(ValidationError::MissingField("metadata.name"))?
            .to_string();
        let cluster_scoped = is_cluster_scoped(&kind);
        // Every query runs against the target namespace, so a manifest pinned elsewhere could
        // never be observed.
        let namespace = match str_at(&definition, "/metadata/namespace") {
            _ if cluster_scoped => String::new(),
            Some(pinned) if !pinned.is_empty() && pinned != namespace => {
                return Err(ValidationError::InvalidDefinition {
                    id: ResourceId::new(kind, pinned, name).to_string(),
                    reason: format!("metadata.namespace `{}` differs from the target namespace `{}`", pinned, namespace),
                });
            }
            _ => namespace.to_string(),
        };
        let group = api_group(str_at(&definition, "/apiVersion").unwrap_or_default());
        let id = ResourceId::new(kind.clone(), namespace, name);

        let timeout = match (timeout_override, json::annotation(&definition, TIMEOUT_OVERRIDE_ANNOTATION)) {
            (Some(t), _) => t,
            (None, Some(raw)) => parse_timeout_override(raw).map_err(|reason| ValidationError::InvalidTimeout {
                id: id.to_string(),
                value: raw.to_string(),
                reason,
            })?,
            (None, None) => default_timeout,
        };

        Ok(Self {
            id,
            context: context.to_string(),
            type_name: kind,
            group,
            cluster_scoped,
            definition,
            instance: None,
            synced: false,
            timeout,
        })
    }

    /// An object already observed in the cluster (e.g. a pod found through its owner).
    pub fn observed(kind: &str, instance: Json, namespace: &str, context: &str, timeout: Duration) -> Self {
        let name = json::name(&instance).unwrap_or_default().to_string();
        let group = api_group(str_at(&instance, "/apiVersion").unwrap_or_default());
        Self {
            id: ResourceId::new(kind, namespace, name),
            context: context.to_string(),
            type_name: kind.to_string(),
            group,
            cluster_scoped: false,
            definition: instance.clone(),
            instance: Some(instance),
            synced: true,
            timeout,
        }
    }

    /// Query by a fully qualified type (e.g. `Widget.example.com`) and optionally cluster-wide.
    pub fn with_type_name(mut self, type_name: impl Into<String>, cluster_scoped: bool) -> Self {
        self.type_name = type_name.into();
        self.cluster_scoped = cluster_scoped;
        if cluster_scoped {
            self.id.namespace.clear();
        }
        self
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.id.kind
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn namespace(&self) -> &str {
        &self.id.namespace
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn cluster_scoped(&self) -> bool {
        self.cluster_scoped
    }

    pub fn definition(&self) -> &Json {
        &self.definition
    }

    pub fn instance(&self) -> Option<&Json> {
        self.instance.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.instance.is_some()
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Annotation read from the manifest, not the live object.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        json::annotation(&self.definition, key)
    }

    /// Live object with `metadata.generation == status.observedGeneration`.
    pub fn generation_is_current(&self) -> bool {
        self.instance.as_ref().is_some_and(json::generation_is_current)
    }

    pub fn str_at(&self, pointer: &str) -> Option<&str> {
        self.instance.as_ref().and_then(|i| str_at(i, pointer))
    }

    pub fn i64_at(&self, pointer: &str) -> Option<i64> {
        self.instance.as_ref().and_then(|i| json::i64_at(i, pointer))
    }

    /// Re-read the live object through the cycle's cache.
    pub async fn refresh(&mut self, cache: &SyncMediator) {
        self.instance = cache.get_instance(&self.type_name, &self.id.name).await;
        self.synced = true;
        debug!(resource = %self.id, exists = self.instance.is_some(), "synced");
    }
}
