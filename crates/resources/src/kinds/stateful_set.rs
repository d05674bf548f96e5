//! StatefulSets: ready replicas on the update revision; OnDelete sets only count readiness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;
use vigil_core::json;
use vigil_core::ValidationError;
use vigil_store::SyncMediator;

use super::{first_pod_failure, owned_pods, Pod};
use crate::{KubernetesResource, ResourceBase};

pub const KIND: &str = "StatefulSet";
pub const TIMEOUT: Duration = Duration::from_secs(10 * 60);
const REVISION_LABEL: &str = "controller-revision-hash";

#[derive(Debug)]
pub struct StatefulSet {
    base: ResourceBase,
    pods: Vec<Pod>,
    warned_on_delete: AtomicBool,
}

pub(crate) fn build(base: ResourceBase) -> Result<Box<dyn KubernetesResource>, ValidationError> {
    Ok(Box::new(StatefulSet { base, pods: Vec::new(), warned_on_delete: AtomicBool::new(false) }))
}

impl StatefulSet {
    fn count(&self, field: &str) -> i64 {
        self.base.i64_at(&format!("/status/{}", field)).unwrap_or(0)
    }

    fn on_delete(&self) -> bool {
        self.base.str_at("/spec/updateStrategy/type") == Some("OnDelete")
    }
}

#[async_trait]
impl KubernetesResource for StatefulSet {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn dependency_kinds(&self) -> &'static [&'static str] {
        &["Pod"]
    }

    async fn sync(&mut self, cache: &SyncMediator) {
        self.base.refresh(cache).await;
        let revision = self.base.str_at("/status/updateRevision").map(str::to_string);
        self.pods = owned_pods(cache, &self.base, |p| match &revision {
            Some(rev) => json::label(p, REVISION_LABEL) == Some(rev.as_str()),
            None => true,
        })
        .await;
    }

    fn deploy_succeeded(&self) -> bool {
        if !self.base.generation_is_current() {
            return false;
        }
        let desired = self.base.i64_at("/spec/replicas").unwrap_or(1);
        let ready = self.count("readyReplicas");
        if self.on_delete() {
            if !self.warned_on_delete.swap(true, Ordering::Relaxed) {
                warn!(
                    resource = %self.base.id(),
                    "updateStrategy is OnDelete: pods are only replaced when deleted, so success means ready replicas only"
                );
            }
            return ready == desired;
        }
        ready == desired
            && self.count("currentReplicas") == desired
            && self.base.str_at("/status/currentRevision") == self.base.str_at("/status/updateRevision")
    }

    fn deploy_failed(&self) -> bool {
        self.base.generation_is_current() && self.pods.iter().any(|p| p.deploy_failed())
    }

    fn status(&self) -> String {
        if !self.base.exists() {
            return "Not found".to_string();
        }
        format!(
            "{} replicas, {} currentReplicas, {} readyReplicas",
            self.count("replicas"),
            self.count("currentReplicas"),
            self.count("readyReplicas")
        )
    }

    fn failure_message(&self) -> Option<String> {
        first_pod_failure(&self.pods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value as Json};

    fn sts(spec: Json, status: Json) -> StatefulSet {
        let obj = json!({"kind": "StatefulSet", "metadata": {"name": "db", "generation": 5}, "spec": spec, "status": status});
        StatefulSet {
            base: ResourceBase::observed(KIND, obj, "ns", "c", TIMEOUT),
            pods: Vec::new(),
            warned_on_delete: AtomicBool::new(false),
        }
    }

    #[test]
    fn rolling_update_waits_for_revision_swap() {
        let mid = sts(
            json!({"replicas": 2}),
            json!({"observedGeneration": 5, "readyReplicas": 2, "currentReplicas": 1,
                   "currentRevision": "db-1", "updateRevision": "db-2"}),
        );
        assert!(!mid.deploy_succeeded());
        let done = sts(
            json!({"replicas": 2}),
            json!({"observedGeneration": 5, "readyReplicas": 2, "currentReplicas": 2,
                   "currentRevision": "db-2", "updateRevision": "db-2"}),
        );
        assert!(done.deploy_succeeded());
    }

    #[test]
    fn on_delete_only_counts_ready() {
        let s = sts(
            json!({"replicas": 2, "updateStrategy": {"type": "OnDelete"}}),
            json!({"observedGeneration": 5, "readyReplicas": 2, "currentRevision": "db-1", "updateRevision": "db-2"}),
        );
        assert!(s.deploy_succeeded());
        assert!(s.deploy_succeeded());
        assert!(s.warned_on_delete.load(Ordering::Relaxed));
    }
}
