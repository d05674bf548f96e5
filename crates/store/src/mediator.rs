//! Per-cycle observation cache shared by every resource synced in one pass.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};

use metrics::counter;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value as Json;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use vigil_core::LabelSelector;
use vigil_kubectl::{Kubectl, KubectlError, RunOptions};

use crate::distribute::distribute;

/// Anything the mediator can refresh in bulk.
#[async_trait::async_trait]
pub trait SyncTarget: Send + Sync {
    /// kubectl resource type, e.g. `Deployment` or `Widget.example.com`.
    fn type_name(&self) -> String;

    fn cluster_scoped(&self) -> bool {
        false
    }

    /// Kinds that must be warm in the cache before this target can judge its own status.
    fn dependency_kinds(&self) -> &'static [&'static str] {
        &[]
    }

    async fn sync(&mut self, cache: &SyncMediator);
}

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("kubectl get {0} failed")]
    Command(String),
    #[error("unparsable list for {kind}: {source}")]
    Parse { kind: String, source: serde_json::Error },
}

type ListCell = Arc<OnceCell<Arc<Vec<Json>>>>;

/// Memoizes "list kind K" (at most one underlying call per kind per cycle, collapsed across
/// concurrent callers) and serves single-instance lookups without ever warming the list cache.
pub struct SyncMediator {
    kubectl: Kubectl,
    lists: Mutex<FxHashMap<String, ListCell>>,
    cluster_scoped: Arc<Mutex<FxHashSet<String>>>,
    max_workers: usize,
    fetch_attempts: u32,
}

impl std::fmt::Debug for SyncMediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMediator")
            .field("kubectl", &self.kubectl)
            .field("max_workers", &self.max_workers)
            .field("fetch_attempts", &self.fetch_attempts)
            .finish()
    }
}

impl SyncMediator {
    pub fn new(kubectl: Kubectl, max_workers: usize) -> Self {
        let scoped = vigil_core::CLUSTER_SCOPED_KINDS.iter().map(|k| k.to_string()).collect();
        Self {
            kubectl,
            lists: Mutex::new(FxHashMap::default()),
            cluster_scoped: Arc::new(Mutex::new(scoped)),
            max_workers: max_workers.max(1),
            fetch_attempts: 5,
        }
    }

    pub fn with_fetch_attempts(mut self, attempts: u32) -> Self {
        self.fetch_attempts = attempts.max(1);
        self
    }

    pub fn kubectl(&self) -> &Kubectl {
        &self.kubectl
    }

    /// Isolated view for one resource's sync: warmed lists are shared, but `clear` only
    /// drops this handle's own entries.
    pub fn handle(&self) -> SyncMediator {
        let lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner).clone();
        SyncMediator {
            kubectl: self.kubectl.clone(),
            lists: Mutex::new(lists),
            cluster_scoped: Arc::clone(&self.cluster_scoped),
            max_workers: self.max_workers,
            fetch_attempts: self.fetch_attempts,
        }
    }

    /// Start a new cycle: forget every cached list.
    pub fn clear(&self) {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn mark_cluster_scoped(&self, type_name: &str) {
        self.cluster_scoped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(type_name.to_string());
    }

    fn is_cluster_scoped(&self, type_name: &str) -> bool {
        self.cluster_scoped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(type_name)
    }

    fn cell(&self, kind: &str) -> ListCell {
        let mut lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(lists.entry(kind.to_string()).or_default())
    }

    fn warm(&self, kind: &str) -> Option<Arc<Vec<Json>>> {
        let lists = self.lists.lock().unwrap_or_else(PoisonError::into_inner);
        lists.get(kind).and_then(|cell| cell.get().cloned())
    }

    pub fn is_warm(&self, kind: &str) -> bool {
        self.warm(kind).is_some()
    }

    fn options_for(&self, kind: &str) -> RunOptions {
        RunOptions::json()
            .attempts(self.fetch_attempts)
            .use_namespace(!self.is_cluster_scoped(kind))
            .sensitive(kind == "Secret")
    }

    async fn fetch_list(&self, kind: &str) -> Result<Arc<Vec<Json>>, FetchError> {
        counter!("vigil_cache_fetch_total", 1, "kind" => kind.to_string());
        let out = self
            .kubectl
            .run(&["get", kind, "--chunk-size=0"], self.options_for(kind))
            .await
            .map_err(|_| FetchError::Command(kind.to_string()))?;
        if !out.success {
            return Err(FetchError::Command(kind.to_string()));
        }
        let parsed: Json = serde_json::from_str(&out.stdout)
            .map_err(|source| FetchError::Parse { kind: kind.to_string(), source })?;
        let items = match parsed.get("items") {
            Some(Json::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        debug!(kind, count = items.len(), "cached list");
        Ok(Arc::new(items))
    }

    /// Every instance of `kind`, optionally filtered by exact label match.
    /// A failed fetch yields an empty list and is not cached, so the next caller retries.
    pub async fn list_all(&self, kind: &str, selector: Option<&LabelSelector>) -> Vec<Json> {
        let cell = self.cell(kind);
        let items = match cell.get_or_try_init(|| self.fetch_list(kind)).await {
            Ok(items) => Arc::clone(items),
            Err(e) => {
                warn!(kind, error = %e, "list fetch failed; treating as empty");
                return Vec::new();
            }
        };
        match selector {
            Some(sel) if !sel.is_empty() => items.iter().filter(|o| sel.matches(o)).cloned().collect(),
            _ => items.as_ref().clone(),
        }
    }

    /// One instance by name. Served from a warm list when present; otherwise a targeted
    /// fetch whose result is never written into the list cache.
    pub async fn get_instance(&self, kind: &str, name: &str) -> Option<Json> {
        if let Some(items) = self.warm(kind) {
            return items.iter().find(|o| vigil_core::json::name(o) == Some(name)).cloned();
        }
        let opts = self.options_for(kind).raise_if_not_found(true);
        match self.kubectl.run(&["get", kind, name], opts).await {
            Ok(out) if out.success => match serde_json::from_str::<Json>(&out.stdout) {
                Ok(obj) if obj.is_object() => Some(obj),
                Ok(_) => None,
                Err(e) => {
                    warn!(kind, name, error = %e, "unparsable instance; treating as absent");
                    None
                }
            },
            Ok(_) => None,
            Err(KubectlError::NotFound(_)) => None,
        }
    }

    /// Pre-warm every kind the batch needs (in parallel, one fetch per kind), then sync each
    /// resource against its own isolated handle.
    pub async fn sync_all<R: SyncTarget>(&self, resources: &mut [R]) {
        let mut kinds: BTreeSet<String> = BTreeSet::new();
        for r in resources.iter() {
            let type_name = r.type_name();
            if r.cluster_scoped() {
                self.mark_cluster_scoped(&type_name);
            }
            kinds.insert(type_name);
            kinds.extend(r.dependency_kinds().iter().map(|k| k.to_string()));
        }
        debug!(resources = resources.len(), kinds = kinds.len(), "warming cache");

        distribute(kinds.into_iter().collect(), self.max_workers, |kind: String| async move {
            self.list_all(&kind, None).await;
            Ok::<(), Infallible>(())
        })
        .await
        .unwrap_or_else(|never| match never {});

        distribute(resources.iter_mut().collect(), self.max_workers, |r| async move {
            let handle = self.handle();
            r.sync(&handle).await;
            Ok::<(), Infallible>(())
        })
        .await
        .unwrap_or_else(|never| match never {});
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use vigil_kubectl::{BackoffPolicy, CommandOutput, FakeCluster, ScriptedRunner};

    fn config_maps() -> Json {
        json!({"apiVersion": "v1", "kind": "List", "items": [
            {"kind": "ConfigMap", "metadata": {"name": "a", "labels": {"app": "web"}}},
            {"kind": "ConfigMap", "metadata": {"name": "b", "labels": {"app": "db"}}}
        ]})
    }

    fn mediator(runner: Arc<dyn vigil_kubectl::CommandRunner>) -> SyncMediator {
        let kubectl = Kubectl::new(runner, "ns", "ctx").with_backoff(BackoffPolicy::none());
        SyncMediator::new(kubectl, 8).with_fetch_attempts(1)
    }

    #[tokio::test]
    async fn concurrent_cold_lists_collapse_into_one_call() {
        let runner = Arc::new(
            ScriptedRunner::new(|_| CommandOutput::ok(config_maps().to_string())).with_delay(Duration::from_millis(25)),
        );
        let m = mediator(runner.clone());
        let (a, b) = tokio::join!(m.list_all("ConfigMap", None), m.list_all("ConfigMap", None));
        assert_eq!(runner.count_prefix(&["get", "ConfigMap"]), 1);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lists_across_threads() {
        let runner = Arc::new(
            ScriptedRunner::new(|_| CommandOutput::ok(config_maps().to_string())).with_delay(Duration::from_millis(25)),
        );
        let m = Arc::new(mediator(runner.clone()));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                tokio::spawn(async move { m.list_all("ConfigMap", None).await })
            })
            .collect();
        for t in tasks {
            assert_eq!(t.await.unwrap().len(), 2);
        }
        assert_eq!(runner.count_prefix(&["get", "ConfigMap"]), 1);
    }

    #[tokio::test]
    async fn selector_filters_warm_list() {
        let runner = Arc::new(ScriptedRunner::new(|_| CommandOutput::ok(config_maps().to_string())));
        let m = mediator(runner.clone());
        let web = m.list_all("ConfigMap", Some(&LabelSelector::new().with("app", "web"))).await;
        assert_eq!(web.len(), 1);
        assert_eq!(web[0]["metadata"]["name"], "a");
        let all = m.list_all("ConfigMap", Some(&LabelSelector::new())).await;
        assert_eq!(all.len(), 2);
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let seen = AtomicUsize::new(0);
        let runner = Arc::new(ScriptedRunner::new(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                CommandOutput::failed("connection refused")
            } else {
                CommandOutput::ok(config_maps().to_string())
            }
        }));
        let m = mediator(runner.clone());
        assert!(m.list_all("ConfigMap", None).await.is_empty());
        assert!(!m.is_warm("ConfigMap"));
        assert_eq!(m.list_all("ConfigMap", None).await.len(), 2);
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn instance_lookup_never_warms_the_list() {
        let cluster = Arc::new(FakeCluster::new(vec![
            json!({"kind": "ConfigMap", "metadata": {"name": "a"}}),
            json!({"kind": "ConfigMap", "metadata": {"name": "b"}}),
        ]));
        let m = mediator(cluster.clone());
        let a = m.get_instance("ConfigMap", "a").await;
        assert_eq!(a.unwrap()["metadata"]["name"], "a");
        assert!(!m.is_warm("ConfigMap"));
        assert_eq!(m.list_all("ConfigMap", None).await.len(), 2);
        assert_eq!(cluster.count_prefix(&["get", "ConfigMap", "--chunk-size=0"]), 1);

        // now warm: lookups are served without new calls
        let before = cluster.calls().len();
        assert!(m.get_instance("ConfigMap", "b").await.is_some());
        assert!(m.get_instance("ConfigMap", "zzz").await.is_none());
        assert_eq!(cluster.calls().len(), before);
    }

    #[tokio::test]
    async fn missing_instance_is_absent() {
        let cluster = Arc::new(FakeCluster::new(vec![]));
        let m = mediator(cluster.clone());
        assert!(m.get_instance("Secret", "nope").await.is_none());
        let call = &cluster.calls()[0];
        assert!(call.contains(&"--output=json".to_string()));
    }

    #[tokio::test]
    async fn handles_are_isolated_from_each_other() {
        let cluster = Arc::new(FakeCluster::new(vec![json!({"kind": "ConfigMap", "metadata": {"name": "a"}})]));
        let m = mediator(cluster.clone());
        m.list_all("ConfigMap", None).await;

        let child = m.handle();
        assert!(child.is_warm("ConfigMap"));
        child.clear();
        assert!(!child.is_warm("ConfigMap"));
        assert!(m.is_warm("ConfigMap"));

        let sibling = m.handle();
        assert!(sibling.is_warm("ConfigMap"));
        assert_eq!(cluster.count_prefix(&["get", "ConfigMap"]), 1);
    }

    #[tokio::test]
    async fn cluster_scoped_kinds_skip_namespace() {
        let cluster = Arc::new(FakeCluster::new(vec![]));
        let m = mediator(cluster.clone());
        m.list_all("ClusterRole", None).await;
        m.list_all("Pod", None).await;
        let calls = cluster.calls();
        assert!(!calls[0].iter().any(|a| a.starts_with("--namespace")));
        assert!(calls[1].contains(&"--namespace=ns".to_string()));
    }
}
