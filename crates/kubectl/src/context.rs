//! Resolve which kubeconfig context and namespace every kubectl call is scoped to.

use anyhow::{anyhow, Context, Result};
use kube::config::Kubeconfig;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTarget {
    pub context: String,
    pub namespace: String,
}

/// Explicit values win; otherwise fall back to the kubeconfig's current context and that
/// context's namespace, and finally to `default`.
pub fn resolve_target(context: Option<&str>, namespace: Option<&str>) -> Result<ClusterTarget> {
    if let (Some(c), Some(n)) = (context, namespace) {
        return Ok(ClusterTarget { context: c.to_string(), namespace: n.to_string() });
    }
    let kubeconfig = Kubeconfig::read().context("reading kubeconfig")?;
    let target = resolve_from(&kubeconfig, context, namespace)?;
    info!(context = %target.context, namespace = %target.namespace, "resolved cluster target");
    Ok(target)
}

pub fn resolve_from(kubeconfig: &Kubeconfig, context: Option<&str>, namespace: Option<&str>) -> Result<ClusterTarget> {
    let context = match context {
        Some(c) => c.to_string(),
        None => kubeconfig
            .current_context
            .clone()
            .ok_or_else(|| anyhow!("no --context given and kubeconfig has no current-context"))?,
    };
    let ctx_namespace = kubeconfig
        .contexts
        .iter()
        .find(|named| named.name == context)
        .and_then(|named| named.context.as_ref())
        .and_then(|c| c.namespace.clone());
    let namespace = namespace
        .map(|n| n.to_string())
        .or(ctx_namespace)
        .unwrap_or_else(|| "default".to_string());
    Ok(ClusterTarget { context, namespace })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kubeconfig() -> Kubeconfig {
        Kubeconfig::from_yaml(
            r#"
apiVersion: v1
kind: Config
current-context: staging
contexts:
  - name: staging
    context:
      cluster: staging
      user: admin
      namespace: shop
  - name: prod
    context:
      cluster: prod
      user: admin
clusters: []
users: []
"#,
        )
        .unwrap()
    }

    #[test]
    fn falls_back_to_current_context_namespace() {
        let t = resolve_from(&kubeconfig(), None, None).unwrap();
        assert_eq!(t, ClusterTarget { context: "staging".into(), namespace: "shop".into() });
    }

    #[test]
    fn explicit_context_without_namespace_uses_default() {
        let t = resolve_from(&kubeconfig(), Some("prod"), None).unwrap();
        assert_eq!(t.namespace, "default");
        let t = resolve_from(&kubeconfig(), Some("prod"), Some("web")).unwrap();
        assert_eq!(t.namespace, "web");
    }
}
