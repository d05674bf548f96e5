//! Vigil core types: resource identity, validation errors, annotations and shared helpers.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod duration;
pub mod json;
pub mod selector;

pub use selector::LabelSelector;

/// Per-instance override of the kind's default rollout timeout, e.g. `"90s"` or `"10m"`.
pub const TIMEOUT_OVERRIDE_ANNOTATION: &str = "vigil.dev/timeout-override";
/// Rollout policy for Deployments and DaemonSets.
pub const REQUIRED_ROLLOUT_ANNOTATION: &str = "vigil.dev/required-rollout";
/// Rollout conditions for instances of a CustomResourceDefinition.
pub const ROLLOUT_CONDITIONS_ANNOTATION: &str = "vigil.dev/instance-rollout-conditions";

/// Process exit codes for the encompassing CLI.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const TIMEOUT: i32 = 70;
}

/// Built-in kinds that live outside any namespace.
pub const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "APIService",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "MutatingWebhookConfiguration",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PriorityClass",
    "StorageClass",
    "ValidatingWebhookConfiguration",
];

pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Identity of a single cluster object. `namespace` is empty for cluster-scoped kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind: kind.into(), namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Fatal configuration errors. Raised before any cluster mutation and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("manifest is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("{id}: invalid value `{value}` for {annotation}; expected full, none, maxUnavailable or a percentage like 90%")]
    InvalidRollout { id: String, annotation: &'static str, value: String },
    #[error("{id}: invalid timeout override `{value}`: {reason}")]
    InvalidTimeout { id: String, value: String, reason: String },
    #[error("{id}: invalid rollout conditions: {reason}")]
    InvalidRolloutConditions { id: String, reason: String },
    #[error("{id}: {reason}")]
    InvalidDefinition { id: String, reason: String },
}
