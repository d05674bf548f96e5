//! Services are healthy once they route somewhere: they select at least one pod, or every
//! workload they front is deliberately scaled to zero.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as Json;
use vigil_core::json;
use vigil_core::{LabelSelector, ValidationError};
use vigil_store::SyncMediator;

use crate::{KubernetesResource, ResourceBase};

pub const KIND: &str = "Service";
pub const TIMEOUT: Duration = Duration::from_secs(7 * 60);

#[derive(Debug)]
pub struct Service {
    base: ResourceBase,
    selected_pods: usize,
    /// Replicas requested across Deployments/StatefulSets whose pod template matches the selector.
    /// `None` when no such workload exists.
    workload_replicas: Option<i64>,
}

pub(crate) fn build(base: ResourceBase) -> Result<Box<dyn KubernetesResource>, ValidationError> {
    Ok(Box::new(Service { base, selected_pods: 0, workload_replicas: None }))
}

impl Service {
    fn selector(&self) -> LabelSelector {
        LabelSelector::from_match_labels(self.base.instance().and_then(|i| i.pointer("/spec/selector")))
    }

    fn service_type(&self) -> &str {
        self.base.str_at("/spec/type").unwrap_or("ClusterIP")
    }

    fn needs_endpoints(&self) -> bool {
        self.service_type() != "ExternalName" && !self.selector().is_empty()
    }

    fn has_load_balancer_ingress(&self) -> bool {
        self.base
            .instance()
            .and_then(|i| i.pointer("/status/loadBalancer/ingress"))
            .and_then(Json::as_array)
            .is_some_and(|a| !a.is_empty())
    }
}

#[async_trait]
impl KubernetesResource for Service {
    fn base(&self) -> &ResourceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResourceBase {
        &mut self.base
    }

    fn dependency_kinds(&self) -> &'static [&'static str] {
        &["Pod", "Deployment", "StatefulSet"]
    }

    async fn sync(&mut self, cache: &SyncMediator) {
        self.base.refresh(cache).await;
        if !self.base.exists() || !self.needs_endpoints() {
            return;
        }
        let selector = self.selector();
        self.selected_pods = cache.list_all("Pod", Some(&selector)).await.len();

        let mut replicas = None;
        for kind in ["Deployment", "StatefulSet"] {
            for workload in cache.list_all(kind, None).await {
                if selector.matches_labels(workload.pointer("/spec/template/metadata/labels")) {
                    let r = json::i64_at(&workload, "/spec/replicas").unwrap_or(1);
                    replicas = Some(replicas.unwrap_or(0) + r);
                }
            }
        }
        self.workload_replicas = replicas;
    }

    fn deploy_succeeded(&self) -> bool {
        if !self.base.exists() {
            return false;
        }
        if self.service_type() == "LoadBalancer" && !self.has_load_balancer_ingress() {
            return false;
        }
        if !self.needs_endpoints() {
            return true;
        }
        self.selected_pods > 0 || self.workload_replicas == Some(0)
    }

    fn status(&self) -> String {
        if !self.base.exists() {
            "Not found".to_string()
        } else if !self.needs_endpoints() {
            "Doesn't require any endpoints".to_string()
        } else if self.selected_pods > 0 {
            format!("Selects {} pod(s)", self.selected_pods)
        } else if self.workload_replicas == Some(0) {
            "Related workloads are scaled to 0".to_string()
        } else {
            "Selects 0 pods".to_string()
        }
    }

    fn timeout_message(&self) -> String {
        if self.service_type() == "LoadBalancer" && !self.has_load_balancer_ingress() {
            "This service has not been assigned a load balancer address.".to_string()
        } else {
            "This service does not seem to select any pods and this is likely invalid. \
             Please confirm the spec.selector is correct and the targeted workload is healthy."
                .to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn svc(spec: Json, status: Json, pods: usize, replicas: Option<i64>) -> Service {
        let obj = json!({"kind": "Service", "metadata": {"name": "web"}, "spec": spec, "status": status});
        Service { base: ResourceBase::observed(KIND, obj, "ns", "c", TIMEOUT), selected_pods: pods, workload_replicas: replicas }
    }

    #[test]
    fn selectorless_and_external_names_need_nothing() {
        assert!(svc(json!({}), json!({}), 0, None).deploy_succeeded());
        assert!(svc(json!({"type": "ExternalName", "selector": {"app": "x"}}), json!({}), 0, None).deploy_succeeded());
    }

    #[test]
    fn selecting_services_need_pods_or_zero_replicas() {
        let spec = json!({"selector": {"app": "web"}});
        assert!(!svc(spec.clone(), json!({}), 0, None).deploy_succeeded());
        assert!(!svc(spec.clone(), json!({}), 0, Some(2)).deploy_succeeded());
        assert!(svc(spec.clone(), json!({}), 0, Some(0)).deploy_succeeded());
        assert!(svc(spec, json!({}), 1, None).deploy_succeeded());
    }

    #[test]
    fn load_balancers_need_an_address() {
        let spec = json!({"type": "LoadBalancer", "selector": {"app": "web"}});
        assert!(!svc(spec.clone(), json!({"loadBalancer": {}}), 2, None).deploy_succeeded());
        assert!(svc(spec, json!({"loadBalancer": {"ingress": [{"ip": "10.0.0.1"}]}}), 2, None).deploy_succeeded());
    }
}
