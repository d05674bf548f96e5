//! Per-kind resource types and the kind -> constructor table.

use std::time::Duration;

use serde_json::Value as Json;
use vigil_core::json;
use vigil_core::{LabelSelector, ValidationError};
use vigil_store::SyncMediator;

use crate::{KubernetesResource, ResourceBase};

pub mod crd;
pub mod custom_resource;
pub mod daemon_set;
pub mod deployment;
pub mod hpa;
pub mod job;
pub mod pod;
pub mod pvc;
pub mod replica_set;
pub mod service;
pub mod simple;
pub mod stateful_set;

pub use crd::CustomResourceDefinition;
pub use custom_resource::CustomResource;
pub use daemon_set::DaemonSet;
pub use deployment::Deployment;
pub use hpa::HorizontalPodAutoscaler;
pub use job::Job;
pub use pod::Pod;
pub use pvc::PersistentVolumeClaim;
pub use replica_set::ReplicaSet;
pub use service::Service;
pub use simple::{Existence, ResourceQuota, UnknownResource};
pub use stateful_set::StatefulSet;

pub type Constructor = fn(ResourceBase) -> Result<Box<dyn KubernetesResource>, ValidationError>;

pub struct KindEntry {
    pub kind: &'static str,
    pub timeout: Duration,
    pub build: Constructor,
}

const fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Default for kinds without a dedicated entry.
pub const UNKNOWN_TIMEOUT: Duration = secs(5 * 60);

pub const REGISTRY: &[KindEntry] = &[
    KindEntry { kind: pod::KIND, timeout: pod::TIMEOUT, build: pod::build },
    KindEntry { kind: replica_set::KIND, timeout: replica_set::TIMEOUT, build: replica_set::build },
    KindEntry { kind: deployment::KIND, timeout: deployment::TIMEOUT, build: deployment::build },
    KindEntry { kind: daemon_set::KIND, timeout: daemon_set::TIMEOUT, build: daemon_set::build },
    KindEntry { kind: stateful_set::KIND, timeout: stateful_set::TIMEOUT, build: stateful_set::build },
    KindEntry { kind: job::KIND, timeout: job::TIMEOUT, build: job::build },
    KindEntry { kind: service::KIND, timeout: service::TIMEOUT, build: service::build },
    KindEntry { kind: pvc::KIND, timeout: pvc::TIMEOUT, build: pvc::build },
    KindEntry { kind: hpa::KIND, timeout: hpa::TIMEOUT, build: hpa::build },
    KindEntry { kind: crd::KIND, timeout: crd::TIMEOUT, build: crd::build },
    KindEntry { kind: "ResourceQuota", timeout: secs(30), build: simple::build_quota },
    KindEntry { kind: "ConfigMap", timeout: secs(30), build: simple::build_existence },
    KindEntry { kind: "Secret", timeout: secs(30), build: simple::build_existence },
    KindEntry { kind: "ServiceAccount", timeout: secs(30), build: simple::build_existence },
    KindEntry { kind: "Role", timeout: secs(30), build: simple::build_existence },
    KindEntry { kind: "RoleBinding", timeout: secs(30), build: simple::build_existence },
    KindEntry { kind: "ClusterRole", timeout: secs(30), build: simple::build_existence },
    KindEntry { kind: "ClusterRoleBinding", timeout: secs(30), build: simple::build_existence },
    KindEntry { kind: "NetworkPolicy", timeout: secs(30), build: simple::build_existence },
    KindEntry { kind: "PodDisruptionBudget", timeout: secs(30), build: simple::build_existence },
    KindEntry { kind: "PodTemplate", timeout: secs(30), build: simple::build_existence },
    KindEntry { kind: "StorageClass", timeout: secs(30), build: simple::build_existence },
    KindEntry { kind: "Ingress", timeout: secs(30), build: simple::build_existence },
    KindEntry { kind: "Namespace", timeout: secs(60), build: simple::build_existence },
    KindEntry { kind: "CronJob", timeout: secs(30), build: simple::build_existence },
];

pub fn lookup(kind: &str) -> Option<&'static KindEntry> {
    REGISTRY.iter().find(|e| e.kind == kind)
}

/// Pods selected by the owner's `spec.selector.matchLabels` and carrying the owner's uid among
/// their owner references, narrowed further by `keep`.
pub(crate) async fn owned_pods<F>(cache: &SyncMediator, owner: &ResourceBase, keep: F) -> Vec<Pod>
where
    F: Fn(&Json) -> bool + Send,
{
    let Some(inst) = owner.instance() else { return Vec::new() };
    let Some(uid) = json::uid(inst) else { return Vec::new() };
    let selector = LabelSelector::from_match_labels(inst.pointer("/spec/selector/matchLabels"));
    cache
        .list_all(pod::KIND, Some(&selector))
        .await
        .into_iter()
        .filter(|p| json::owned_by(p, uid) && keep(p))
        .map(|p| Pod::owned(p, owner.namespace(), owner.context(), owner.id().to_string()))
        .collect()
}

/// `Pod/name: reason` for the first failed pod, if any.
pub(crate) fn first_pod_failure(pods: &[Pod]) -> Option<String> {
    pods.iter()
        .find_map(|p| p.failure_message().map(|msg| format!("{}: {}", p.id(), msg)))
}
