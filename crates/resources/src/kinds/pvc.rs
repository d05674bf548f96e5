//! PersistentVolumeClaims: bound, or pending on a `WaitForFirstConsumer` storage class.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as Json;
use vigil_core::json;
use vigil_core::ValidationError;
use vigil_store::SyncMediator;

use crate::{KubernetesResource, ResourceBase};

pub const KIND: &str = "PersistentVolumeClaim";
pub const TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";

#[derive(Debug)]
pub struct PersistentVolumeClaim {
    base: ResourceBase,
    storage_class: Option<Json>,
}

pub(crate) fn build(base: ResourceBase) -> Result<Box<dyn KubernetesResource>, ValidationError> {
    Ok(Box::new(PersistentVolumeClaim { base, storage_class: None }))
}

impl PersistentVolumeClaim {
    fn phase(&self) -> Option<&str> {
        self.base.str_at("/status/phase")
    }

    fn waits_for_first_consumer(&self) -> bool {
        self.storage_class
            .as_ref()
            .and_then(|sc| json::str_at(sc, "/volumeBindingMode"))
            == Some("WaitForFirstConsumer")
    }
}

/// The named class, or the cluster default when the claim names none.
fn pick_class(classes: Vec<Json>, wanted: Option<&str>) -> Option<Json> {
    classes.into_iter().find(|sc| match wanted {
        Some(name) => json::name(sc) == Some(name),
        None => json::annotation(sc, DEFAULT_CLASS_ANNOTATION) == Some("true"),
    })
}

#[async_trait]
impl KubernetesResource for PersistentVolumeClaim {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn dependency_kinds(&self) -> &'static [&'static str] {
        &["StorageClass"]
    }

    async fn sync(&mut self, cache: &SyncMediator) {
        self.base.refresh(cache).await;
        let wanted = self
            .base
            .str_at("/spec/storageClassName")
            .or_else(|| json::str_at(self.base.definition(), "/spec/storageClassName"))
            .map(str::to_string);
        let classes = cache.list_all("StorageClass", None).await;
        self.storage_class = pick_class(classes, wanted.as_deref());
    }

    fn deploy_succeeded(&self) -> bool {
        match self.phase() {
            Some("Bound") => true,
            Some("Pending") => self.waits_for_first_consumer(),
            _ => false,
        }
    }

    fn deploy_failed(&self) -> bool {
        self.phase() == Some("Lost")
    }

    fn status(&self) -> String {
        if !self.base.exists() {
            return "Not found".to_string();
        }
        self.phase().unwrap_or("Unknown").to_string()
    }

    fn failure_message(&self) -> Option<String> {
        self.deploy_failed()
            .then(|| "PVC lost its underlying PersistentVolume; its data may be gone".to_string())
    }

    fn timeout_message(&self) -> String {
        match self.storage_class.as_ref().and_then(json::name) {
            Some(sc) => format!("{}\nStorageClass: {}", crate::STANDARD_TIMEOUT_MESSAGE, sc),
            None => format!("{}\nNo matching StorageClass was found.", crate::STANDARD_TIMEOUT_MESSAGE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pvc(phase: &str, class: Option<Json>) -> PersistentVolumeClaim {
        let obj = json!({"kind": "PersistentVolumeClaim", "metadata": {"name": "data"}, "status": {"phase": phase}});
        PersistentVolumeClaim { base: ResourceBase::observed(KIND, obj, "ns", "c", TIMEOUT), storage_class: class }
    }

    #[test]
    fn pending_is_fine_for_lazy_binding() {
        let lazy = json!({"metadata": {"name": "ssd"}, "volumeBindingMode": "WaitForFirstConsumer"});
        let eager = json!({"metadata": {"name": "hdd"}, "volumeBindingMode": "Immediate"});
        assert!(pvc("Pending", Some(lazy)).deploy_succeeded());
        assert!(!pvc("Pending", Some(eager)).deploy_succeeded());
        assert!(pvc("Bound", None).deploy_succeeded());
        assert!(pvc("Lost", None).deploy_failed());
    }

    #[test]
    fn default_class_is_used_when_unnamed() {
        let classes = vec![
            json!({"metadata": {"name": "a"}}),
            json!({"metadata": {"name": "b", "annotations": {DEFAULT_CLASS_ANNOTATION: "true"}}}),
        ];
        assert_eq!(json::name(&pick_class(classes.clone(), None).unwrap()), Some("b"));
        assert_eq!(json::name(&pick_class(classes, Some("a")).unwrap()), Some("a"));
    }
}
