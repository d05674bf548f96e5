//! Deployments track their newest ReplicaSet (matched by owner uid and revision annotation) and
//! judge the rollout against the `required-rollout` policy.

use std::time::Duration;

use async_trait::async_trait;
use vigil_core::json::{self, condition};
use vigil_core::{LabelSelector, ValidationError};
use vigil_store::SyncMediator;

use super::{replica_set, ReplicaSet};
use crate::{KubernetesResource, ResourceBase, RolloutPolicy};

pub const KIND: &str = "Deployment";
pub const TIMEOUT: Duration = Duration::from_secs(7 * 60);
pub const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

#[derive(Debug)]
pub struct Deployment {
    base: ResourceBase,
    policy: RolloutPolicy,
    latest: Option<ReplicaSet>,
}

pub(crate) fn build(base: ResourceBase) -> Result<Box<dyn KubernetesResource>, ValidationError> {
    Deployment::new(base).map(|d| Box::new(d) as Box<dyn KubernetesResource>)
}

impl Deployment {
    pub fn new(base: ResourceBase) -> Result<Self, ValidationError> {
        let policy = RolloutPolicy::from_base(&base)?;
        let strategy = json::str_at(base.definition(), "/spec/strategy/type").unwrap_or("RollingUpdate");
        if policy == RolloutPolicy::MaxUnavailable && strategy != "RollingUpdate" {
            return Err(ValidationError::InvalidDefinition {
                id: base.id().to_string(),
                reason: format!("rollout policy maxUnavailable requires the RollingUpdate strategy, not {}", strategy),
            });
        }
        Ok(Self { base, policy, latest: None })
    }

    pub fn policy(&self) -> RolloutPolicy {
        self.policy
    }

    pub fn latest_replica_set(&self) -> Option<&ReplicaSet> {
        self.latest.as_ref()
    }

    async fn find_latest(&self, cache: &SyncMediator) -> Option<ReplicaSet> {
        let inst = self.base.instance()?;
        let uid = json::uid(inst)?;
        let revision = json::annotation(inst, REVISION_ANNOTATION)?;
        let selector = LabelSelector::from_match_labels(inst.pointer("/spec/selector/matchLabels"));
        let found = cache
            .list_all(replica_set::KIND, Some(&selector))
            .await
            .into_iter()
            .find(|rs| json::owned_by(rs, uid) && json::annotation(rs, REVISION_ANNOTATION) == Some(revision))?;
        let mut rs = ReplicaSet::observed(found, self.base.namespace(), self.base.context());
        rs.sync_pods(cache).await;
        Some(rs)
    }

    fn desired(&self) -> i64 {
        self.base.i64_at("/spec/replicas").unwrap_or(1)
    }

    fn status_count(&self, field: &str) -> i64 {
        self.base.i64_at(&format!("/status/{}", field)).unwrap_or(0)
    }

    /// Floor of `desired - maxUnavailable`, with the controller's 25% default.
    fn min_available(&self) -> i64 {
        let desired = self.desired();
        let max_unavailable = self
            .base
            .instance()
            .and_then(|i| i.pointer("/spec/strategy/rollingUpdate/maxUnavailable"))
            .and_then(|v| json::scaled_int_or_percent(v, desired, false))
            .unwrap_or(desired / 4);
        (desired - max_unavailable).max(0)
    }

    fn progress_deadline_exceeded(&self) -> bool {
        let Some(inst) = self.base.instance() else { return false };
        if inst.pointer("/spec/progressDeadlineSeconds").is_none() {
            return false;
        }
        condition(inst, "Progressing").is_some_and(|c| {
            c.get("status").and_then(|s| s.as_str()) == Some("False")
                && c.get("reason").and_then(|s| s.as_str()) == Some("ProgressDeadlineExceeded")
        })
    }
}

#[async_trait]
impl KubernetesResource for Deployment {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn dependency_kinds(&self) -> &'static [&'static str] {
        &["ReplicaSet", "Pod"]
    }

    async fn sync(&mut self, cache: &SyncMediator) {
        self.base.refresh(cache).await;
        self.latest = self.find_latest(cache).await;
    }

    fn deploy_succeeded(&self) -> bool {
        if !self.base.generation_is_current() {
            return false;
        }
        let desired = self.desired();
        let updated = self.status_count("updatedReplicas");
        let available = self.status_count("availableReplicas");
        if self.policy == RolloutPolicy::None {
            return true;
        }
        let Some(rs) = &self.latest else { return false };
        match self.policy {
            RolloutPolicy::Full => {
                rs.deploy_succeeded() && rs.desired() == desired && updated == desired && updated == available
            }
            RolloutPolicy::MaxUnavailable => {
                let minimum = self.min_available();
                updated >= desired && rs.available() >= minimum && available >= minimum
            }
            RolloutPolicy::Percent(_) => {
                let minimum = self.policy.minimum_for(desired).unwrap_or(desired);
                rs.ready() >= minimum && rs.available() >= minimum
            }
            RolloutPolicy::None => true,
        }
    }

    fn deploy_failed(&self) -> bool {
        self.base.generation_is_current() && self.latest.as_ref().is_some_and(|rs| rs.deploy_failed())
    }

    fn deploy_timed_out(&self, elapsed: Duration) -> bool {
        if self.deploy_failed() {
            return false;
        }
        self.progress_deadline_exceeded() || elapsed > self.base.timeout()
    }

    fn status(&self) -> String {
        if !self.base.exists() {
            return "Not found".to_string();
        }
        let mut s = format!(
            "{} updatedReplicas, {} replicas, {} availableReplicas",
            self.status_count("updatedReplicas"),
            self.status_count("replicas"),
            self.status_count("availableReplicas")
        );
        let unavailable = self.status_count("unavailableReplicas");
        if unavailable > 0 {
            s.push_str(&format!(", {} unavailableReplicas", unavailable));
        }
        s
    }

    fn failure_message(&self) -> Option<String> {
        self.latest.as_ref().and_then(|rs| rs.failure_message())
    }

    fn timeout_message(&self) -> String {
        let latest = self.latest.as_ref().map(|rs| rs.id().name.clone()).unwrap_or_else(|| "none".to_string());
        if self.progress_deadline_exceeded() {
            format!("Timeout reason: ProgressDeadlineExceeded\nLatest ReplicaSet: {}", latest)
        } else {
            format!("{}\nLatest ReplicaSet: {}", crate::STANDARD_TIMEOUT_MESSAGE, latest)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value as Json};
    use vigil_core::REQUIRED_ROLLOUT_ANNOTATION;

    fn manifest(annotations: Json, strategy: &str) -> Json {
        json!({
            "apiVersion": "apps/v1", "kind": "Deployment",
            "metadata": {"name": "web", "annotations": annotations},
            "spec": {"replicas": 3, "strategy": {"type": strategy}}
        })
    }

    #[test]
    fn policy_is_validated_at_construction() {
        let base = |a: Json, s: &str| ResourceBase::from_definition(manifest(a, s), "ns", "c", TIMEOUT, None).unwrap();
        let d = Deployment::new(base(json!({REQUIRED_ROLLOUT_ANNOTATION: "90%"}), "RollingUpdate")).unwrap();
        assert_eq!(d.policy(), RolloutPolicy::Percent(90));

        let err = Deployment::new(base(json!({REQUIRED_ROLLOUT_ANNOTATION: "most"}), "RollingUpdate")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidRollout { .. }));

        let err = Deployment::new(base(json!({REQUIRED_ROLLOUT_ANNOTATION: "maxUnavailable"}), "Recreate")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidDefinition { .. }));
    }

    #[test]
    fn unsynced_deployment_is_undecided() {
        let base = ResourceBase::from_definition(manifest(json!({}), "RollingUpdate"), "ns", "c", TIMEOUT, None).unwrap();
        let d = Deployment::new(base).unwrap();
        assert!(!d.deploy_succeeded());
        assert!(!d.deploy_failed());
        assert!(d.deploy_timed_out(Duration::from_secs(8 * 60)));
        assert_eq!(d.status(), "Not found");
    }
}
