//! DaemonSets: scheduled pods updated and ready per the `required-rollout` policy.

use std::time::Duration;

use async_trait::async_trait;
use vigil_core::json;
use vigil_core::ValidationError;
use vigil_store::SyncMediator;

use super::{first_pod_failure, owned_pods, Pod};
use crate::{KubernetesResource, ResourceBase, RolloutPolicy};

pub const KIND: &str = "DaemonSet";
pub const TIMEOUT: Duration = Duration::from_secs(5 * 60);
const TEMPLATE_GENERATION_LABEL: &str = "pod-template-generation";

#[derive(Debug)]
pub struct DaemonSet {
    base: ResourceBase,
    policy: RolloutPolicy,
    pods: Vec<Pod>,
}

pub(crate) fn build(base: ResourceBase) -> Result<Box<dyn KubernetesResource>, ValidationError> {
    let policy = RolloutPolicy::from_base(&base)?;
    Ok(Box::new(DaemonSet { base, policy, pods: Vec::new() }))
}

impl DaemonSet {
    fn count(&self, field: &str) -> i64 {
        self.base.i64_at(&format!("/status/{}", field)).unwrap_or(0)
    }

    /// Scheduled pods allowed to be unavailable during a rolling update (controller default 1).
    fn max_unavailable(&self, desired: i64) -> i64 {
        self.base
            .instance()
            .and_then(|i| i.pointer("/spec/updateStrategy/rollingUpdate/maxUnavailable"))
            .and_then(|v| json::scaled_int_or_percent(v, desired, true))
            .unwrap_or(1)
    }
}

#[async_trait]
impl KubernetesResource for DaemonSet {
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
        // only pods stamped with the current template generation belong to this rollout
        let generation = self.base.instance().and_then(json::generation).map(|g| g.to_string());
        self.pods = owned_pods(cache, &self.base, |p| match (json::label(p, TEMPLATE_GENERATION_LABEL), &generation) {
            (Some(label), Some(g)) => label == g,
            _ => true,
        })
        .await;
    }

    fn deploy_succeeded(&self) -> bool {
        if !self.base.generation_is_current() {
            return false;
        }
        let desired = self.count("desiredNumberScheduled");
        let updated = self.count("updatedNumberScheduled");
        let ready = self.count("numberReady");
        match self.policy {
            RolloutPolicy::Full => desired == updated && desired == ready,
            RolloutPolicy::None => true,
            RolloutPolicy::MaxUnavailable => updated >= desired && ready >= desired - self.max_unavailable(desired),
            RolloutPolicy::Percent(_) => {
                let minimum = self.policy.minimum_for(desired).unwrap_or(desired);
                updated >= minimum && ready >= minimum
            }
        }
    }

    fn deploy_failed(&self) -> bool {
        self.base.generation_is_current() && self.pods.iter().any(|p| p.deploy_failed())
    }

    fn status(&self) -> String {
        if !self.base.exists() {
            return "Not found".to_string();
        }
        format!(
            "{} updatedNumberScheduled, {} desiredNumberScheduled, {} numberReady",
            self.count("updatedNumberScheduled"),
            self.count("desiredNumberScheduled"),
            self.count("numberReady")
        )
    }

    fn failure_message(&self) -> Option<String> {
        first_pod_failure(&self.pods)
    }
}
