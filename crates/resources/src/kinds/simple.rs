//! Kinds whose rollout is over once the object exists (or, for quotas, is in effect), plus the
//! fallback for kinds nobody taught us about.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;
use vigil_core::ValidationError;

use crate::{KubernetesResource, ResourceBase};

#[derive(Debug)]
pub struct Existence {
    base: ResourceBase,
}

pub(crate) fn build_existence(base: ResourceBase) -> Result<Box<dyn KubernetesResource>, ValidationError> {
    Ok(Box::new(Existence { base }))
}

impl KubernetesResource for Existence {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn deploy_succeeded(&self) -> bool {
        self.base.exists()
    }

    fn timeout_message(&self) -> String {
        format!("{} was not found in the cluster.", self.base.id())
    }
}

#[derive(Debug)]
pub struct ResourceQuota {
    base: ResourceBase,
}

pub(crate) fn build_quota(base: ResourceBase) -> Result<Box<dyn KubernetesResource>, ValidationError> {
    Ok(Box::new(ResourceQuota { base }))
}

impl KubernetesResource for ResourceQuota {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    /// The quota controller copies `spec.hard` into `status.hard` once it is enforced.
    fn deploy_succeeded(&self) -> bool {
        self.base
            .instance()
            .is_some_and(|i| i.pointer("/spec/hard").is_some() && i.pointer("/spec/hard") == i.pointer("/status/hard"))
    }

    fn status(&self) -> String {
        if !self.base.exists() {
            "Not found".to_string()
        } else if self.deploy_succeeded() {
            "In effect".to_string()
        } else {
            "Not yet in effect".to_string()
        }
    }
}

/// Any kind without a dedicated type: success is existence, with a one-time warning.
#[derive(Debug)]
pub struct UnknownResource {
    base: ResourceBase,
    warned: AtomicBool,
}

impl UnknownResource {
    pub fn new(base: ResourceBase) -> Self {
        Self { base, warned: AtomicBool::new(false) }
    }
}

impl KubernetesResource for UnknownResource {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn deploy_succeeded(&self) -> bool {
        if !self.warned.swap(true, Ordering::Relaxed) {
            warn!(
                resource = %self.base.id(),
                "no rollout knowledge for kind {}; assuming success once it exists",
                self.base.kind()
            );
        }
        self.base.exists()
    }
}
