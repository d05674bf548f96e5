//! Vigil resource model: one type per Kubernetes kind, each judging its own rollout from the
//! object it last observed (plus any children fetched through the cycle's cache).

#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use vigil_core::ResourceId;
use vigil_store::{SyncMediator, SyncTarget};

pub mod base;
pub mod builder;
pub mod conditions;
pub mod kinds;
pub mod rollout;

pub use base::ResourceBase;
pub use builder::{CrdInfo, ResourceBuilder};
pub use conditions::RolloutConditions;
pub use rollout::RolloutPolicy;

pub const STANDARD_TIMEOUT_MESSAGE: &str = "Kubernetes will continue to attempt to deploy this resource in the \
     cluster, but at this point it is considered unlikely that it will succeed.\nIf you have reason to believe \
     it will succeed, retry the deploy to continue to monitor the rollout.";

/// A watched resource. Predicates read only the last observation made by `sync`.
#[async_trait]
pub trait KubernetesResource: Send + Sync + std::fmt::Debug {
    fn base(&self) -> &ResourceBase;

    fn base_mut(&mut self) -> &mut ResourceBase;

    /// Kinds listed in bulk before `sync` so child lookups hit a warm cache.
    fn dependency_kinds(&self) -> &'static [&'static str] {
        &[]
    }

    async fn sync(&mut self, cache: &SyncMediator) {
        self.base_mut().refresh(cache).await;
    }

    fn deploy_succeeded(&self) -> bool;

    fn deploy_failed(&self) -> bool {
        false
    }

    fn deploy_timed_out(&self, elapsed: Duration) -> bool {
        !self.deploy_failed() && elapsed > self.base().timeout()
    }

    fn status(&self) -> String {
        if self.base().exists() {
            "Exists".to_string()
        } else {
            "Not found".to_string()
        }
    }

    fn failure_message(&self) -> Option<String> {
        None
    }

    fn timeout_message(&self) -> String {
        STANDARD_TIMEOUT_MESSAGE.to_string()
    }

    fn id(&self) -> &ResourceId {
        self.base().id()
    }
}

#[async_trait]
impl SyncTarget for Box<dyn KubernetesResource> {
    fn type_name(&self) -> String {
        self.base().type_name().to_string()
    }

    fn cluster_scoped(&self) -> bool {
        self.base().cluster_scoped()
    }

    fn dependency_kinds(&self) -> &'static [&'static str] {
        KubernetesResource::dependency_kinds(self.as_ref())
    }

    async fn sync(&mut self, cache: &SyncMediator) {
        KubernetesResource::sync(self.as_mut(), cache).await;
    }
}
