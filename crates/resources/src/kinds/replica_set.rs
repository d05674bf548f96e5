//! ReplicaSets: every desired replica ready and available, failing when one of their pods is doomed.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as Json;
use vigil_core::ValidationError;
use vigil_store::SyncMediator;

use super::{first_pod_failure, owned_pods, Pod};
use crate::{KubernetesResource, ResourceBase};

pub const KIND: &str = "ReplicaSet";
pub const TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
pub struct ReplicaSet {
    base: ResourceBase,
    pods: Vec<Pod>,
}

pub(crate) fn build(base: ResourceBase) -> Result<Box<dyn KubernetesResource>, ValidationError> {
    Ok(Box::new(ReplicaSet { base, pods: Vec::new() }))
}

impl ReplicaSet {
    /// A replica set found through its Deployment. Call `sync_pods` to load its pods.
    pub fn observed(instance: Json, namespace: &str, context: &str) -> Self {
        Self { base: ResourceBase::observed(KIND, instance, namespace, context, TIMEOUT), pods: Vec::new() }
    }

    pub async fn sync_pods(&mut self, cache: &SyncMediator) {
        self.pods = owned_pods(cache, &self.base, |_| true).await;
    }

    pub fn pods(&self) -> &[Pod] {
        &self.pods
    }

    pub fn desired(&self) -> i64 {
        self.base.i64_at("/spec/replicas").unwrap_or(1)
    }

    pub fn ready(&self) -> i64 {
        self.base.i64_at("/status/readyReplicas").unwrap_or(0)
    }

    pub fn available(&self) -> i64 {
        self.base.i64_at("/status/availableReplicas").unwrap_or(0)
    }
}

#[async_trait]
impl KubernetesResource for ReplicaSet {
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
        self.sync_pods(cache).await;
    }

    fn deploy_succeeded(&self) -> bool {
        self.base.generation_is_current() && self.desired() == self.available() && self.desired() == self.ready()
    }

    fn deploy_failed(&self) -> bool {
        self.base.generation_is_current() && self.pods.iter().any(|p| p.deploy_failed())
    }

    fn status(&self) -> String {
        if !self.base.exists() {
            return "Not found".to_string();
        }
        format!(
            "{} replicas, {} readyReplicas, {} availableReplicas",
            self.base.i64_at("/status/replicas").unwrap_or(0),
            self.ready(),
            self.available()
        )
    }

    fn failure_message(&self) -> Option<String> {
        first_pod_failure(&self.pods)
    }
}
