//! Pods: standalone ones run to completion, pods owned by a workload must be running and ready.

use std::time::Duration;

use serde_json::Value as Json;
use smallvec::SmallVec;
use vigil_core::json::{self, condition_is_true, str_at};
use vigil_core::ValidationError;

use crate::{KubernetesResource, ResourceBase};

pub const KIND: &str = "Pod";
pub const TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
pub struct Pod {
    base: ResourceBase,
    /// Owning workload, e.g. `ReplicaSet/web-5d8f`. `None` for standalone pods.
    parent: Option<String>,
}

pub(crate) fn build(base: ResourceBase) -> Result<Box<dyn KubernetesResource>, ValidationError> {
    Ok(Box::new(Pod { base, parent: None }))
}

impl Pod {
    /// A pod discovered through its owner during the owner's sync.
    pub fn owned(instance: Json, namespace: &str, context: &str, parent: String) -> Self {
        Self { base: ResourceBase::observed(KIND, instance, namespace, context, TIMEOUT), parent: Some(parent) }
    }

    fn standalone(&self) -> bool {
        self.parent.is_none()
    }

    fn phase(&self) -> Option<&str> {
        self.base.str_at("/status/phase")
    }

    fn ready(&self) -> bool {
        self.base.instance().is_some_and(|i| condition_is_true(i, "Ready"))
    }

    /// Why any container in this pod is not going to come up on its own.
    pub fn container_doom_reasons(&self) -> SmallVec<[String; 2]> {
        let mut out = SmallVec::new();
        let Some(inst) = self.base.instance() else { return out };
        for key in ["initContainerStatuses", "containerStatuses"] {
            let statuses = inst.pointer(&format!("/status/{}", key)).and_then(|s| s.as_array());
            for status in statuses.into_iter().flatten() {
                if let Some(reason) = container_doom(status, self.standalone()) {
                    let name = status.get("name").and_then(|n| n.as_str()).unwrap_or("?");
                    out.push(format!("Container \"{}\": {}", name, reason));
                }
            }
        }
        out
    }
}

fn container_doom(status: &Json, standalone: bool) -> Option<String> {
    let waiting_reason = str_at(status, "/state/waiting/reason");
    let waiting_message = str_at(status, "/state/waiting/message").unwrap_or_default();
    let image = str_at(status, "/image").unwrap_or("?");

    for state in ["/lastState/terminated", "/state/terminated"] {
        if str_at(status, &format!("{}/reason", state)) == Some("ContainerCannotRun") {
            let code = json::i64_at(status, &format!("{}/exitCode", state)).unwrap_or_default();
            let msg = str_at(status, &format!("{}/message", state)).unwrap_or_default();
            return Some(format!("Failed to start (exit {}): {}", code, msg));
        }
    }
    match waiting_reason {
        Some("CrashLoopBackOff") => {
            let code = json::i64_at(status, "/lastState/terminated/exitCode").unwrap_or_default();
            return Some(format!("Crashing repeatedly (exit {}). See logs for more information.", code));
        }
        Some("ErrImagePull" | "ImagePullBackOff") if waiting_message.to_lowercase().contains("not found") => {
            return Some(format!(
                "Failed to pull image {}. Did you wait for it to be built and pushed to the registry before deploying?",
                image
            ));
        }
        Some("ErrImagePull" | "ImagePullBackOff") => {
            return Some(format!("Failed to pull image {}: {}", image, waiting_message));
        }
        Some("CreateContainerConfigError") => {
            return Some(format!("Failed to generate container configuration: {}", waiting_message));
        }
        Some("RunContainerError") => {
            return Some(format!("Failed to start: {}", waiting_message));
        }
        _ => {}
    }
    // owned pods get restarted; a standalone run-to-completion pod is done for
    if standalone {
        let code = json::i64_at(status, "/state/terminated/exitCode").unwrap_or_default();
        if code != 0 {
            return Some(format!("Exited with status {}", code));
        }
    }
    None
}

impl KubernetesResource for Pod {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn deploy_succeeded(&self) -> bool {
        if self.standalone() {
            self.phase() == Some("Succeeded")
        } else {
            self.phase() == Some("Running") && self.ready()
        }
    }

    fn deploy_failed(&self) -> bool {
        self.failure_message().is_some()
    }

    fn status(&self) -> String {
        if !self.base.exists() {
            return "Not found".to_string();
        }
        match (self.phase(), self.standalone()) {
            (None, _) => "Unknown".to_string(),
            (Some("Running"), false) if self.ready() => "Running (Ready)".to_string(),
            (Some("Running"), false) => "Running (Not Ready)".to_string(),
            (Some(phase), _) => phase.to_string(),
        }
    }

    fn failure_message(&self) -> Option<String> {
        let inst = self.base.instance()?;
        let message = str_at(inst, "/status/message").unwrap_or_default();
        match str_at(inst, "/status/reason") {
            Some("Evicted") => return Some(format!("Pod has been evicted: {}", message)),
            Some("Preempting" | "Preempted") => return Some("Pod was preempted by a higher priority pod".to_string()),
            _ => {}
        }
        if self.standalone() {
            if self.phase() == Some("Failed") {
                return Some(format!("Pod status: Failed. {}", message).trim_end().to_string());
            }
            if inst.pointer("/metadata/deletionTimestamp").is_some() {
                return Some("Pod status: Terminating".to_string());
            }
        }
        let doomed = self.container_doom_reasons();
        if doomed.is_empty() {
            None
        } else {
            Some(doomed.join("\n"))
        }
    }
}
