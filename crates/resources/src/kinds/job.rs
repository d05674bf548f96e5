//! Jobs: done on the `Complete` condition or enough successful pods, failed on `Failed`.

use std::time::Duration;

use vigil_core::json::{condition, condition_is_true};
use vigil_core::ValidationError;

use crate::{KubernetesResource, ResourceBase};

pub const KIND: &str = "Job";
pub const TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
pub struct Job {
    base: ResourceBase,
}

pub(crate) fn build(base: ResourceBase) -> Result<Box<dyn KubernetesResource>, ValidationError> {
    Ok(Box::new(Job { base }))
}

impl Job {
    fn count(&self, field: &str) -> i64 {
        self.base.i64_at(&format!("/status/{}", field)).unwrap_or(0)
    }
}

impl KubernetesResource for Job {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn deploy_succeeded(&self) -> bool {
        let Some(inst) = self.base.instance() else { return false };
        let completions = self.base.i64_at("/spec/completions").unwrap_or(1);
        condition_is_true(inst, "Complete") || self.count("succeeded") >= completions
    }

    fn deploy_failed(&self) -> bool {
        self.base.instance().is_some_and(|i| condition_is_true(i, "Failed"))
    }

    fn status(&self) -> String {
        if !self.base.exists() {
            "Not found".to_string()
        } else if self.deploy_succeeded() {
            "Succeeded".to_string()
        } else if self.deploy_failed() {
            "Failed".to_string()
        } else {
            format!("{} active, {} succeeded, {} failed", self.count("active"), self.count("succeeded"), self.count("failed"))
        }
    }

    fn failure_message(&self) -> Option<String> {
        let failed = condition(self.base.instance()?, "Failed")?;
        if failed.get("status").and_then(|s| s.as_str()) != Some("True") {
            return None;
        }
        let field = |k: &str| failed.get(k).and_then(|v| v.as_str()).unwrap_or_default();
        Some(format!("Job failed: {}: {}", field("reason"), field("message")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value as Json};

    fn job(spec: Json, status: Json) -> Job {
        Job { base: ResourceBase::observed(KIND, json!({"kind": "Job", "metadata": {"name": "migrate"}, "spec": spec, "status": status}), "ns", "c", TIMEOUT) }
    }

    #[test]
    fn completes_by_condition_or_count() {
        assert!(job(json!({}), json!({"conditions": [{"type": "Complete", "status": "True"}]})).deploy_succeeded());
        assert!(job(json!({"completions": 2}), json!({"succeeded": 2})).deploy_succeeded());
        assert!(!job(json!({"completions": 2}), json!({"succeeded": 1, "active": 1})).deploy_succeeded());
    }

    #[test]
    fn failed_condition_carries_reason() {
        let j = job(
            json!({}),
            json!({"conditions": [{"type": "Failed", "status": "True", "reason": "BackoffLimitExceeded", "message": "Job has reached the specified backoff limit"}]}),
        );
        assert!(j.deploy_failed());
        assert_eq!(j.failure_message().unwrap(), "Job failed: BackoffLimitExceeded: Job has reached the specified backoff limit");
    }
}
