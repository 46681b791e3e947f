//! Kubernetes client for weblogview

use anyhow::{Context, Result, bail};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::Api;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use parking_lot::RwLock;
use tracing::info;

use crate::{ContainerInfo, ContextInfo, NamespaceInfo, PodInfo};

/// Kubernetes client wrapper
///
/// The kubeconfig is re-read on every call so edits made by other tools are
/// picked up. Switching context only changes which context this process
/// uses; the kubeconfig file itself is never rewritten.
#[derive(Default)]
pub struct KubeClient {
    active_context: RwLock<Option<String>>,
}

impl KubeClient {
    /// Create a new KubeClient that follows the kubeconfig's current context
    pub fn new() -> Self {
        Self::default()
    }

    fn load_kubeconfig() -> Result<Kubeconfig> {
        Kubeconfig::read().context("Failed to read kubeconfig. Is kubectl configured?")
    }

    /// Get all available contexts from kubeconfig
    pub fn get_contexts(&self) -> Result<Vec<ContextInfo>> {
        let kubeconfig = Self::load_kubeconfig()?;
        let active = self.active_context.read().clone();
        Ok(contexts_from(&kubeconfig, active.as_deref()))
    }

    /// Get the name of the context clients are built for
    pub fn current_context(&self) -> Result<Option<String>> {
        if let Some(active) = self.active_context.read().clone() {
            return Ok(Some(active));
        }
        Ok(Self::load_kubeconfig()?.current_context)
    }

    /// Make `context_name` the context used for all subsequent clients
    pub fn switch_context(&self, context_name: &str) -> Result<()> {
        let kubeconfig = Self::load_kubeconfig()?;
        if !kubeconfig.contexts.iter().any(|c| c.name == context_name) {
            bail!("context '{}' not found", context_name);
        }

        *self.active_context.write() = Some(context_name.to_string());
        info!(context = %context_name, "Switched Kubernetes context");
        Ok(())
    }

    /// Create a kube::Client for the active context
    ///
    /// Without an explicit switch this infers the configuration, which tries
    /// the kubeconfig first and falls back to the in-cluster service account.
    pub async fn client(&self) -> Result<kube::Client> {
        let context = self.active_context.read().clone();

        let config = match context {
            Some(context_name) => kube::Config::from_kubeconfig(&KubeConfigOptions {
                context: Some(context_name.clone()),
                ..Default::default()
            })
            .await
            .context(format!(
                "Failed to create config for context: {}",
                context_name
            ))?,
            None => kube::Config::infer()
                .await
                .context("Failed to build Kubernetes configuration")?,
        };

        kube::Client::try_from(config).context("Failed to create Kubernetes client")
    }

    /// Fetch all namespaces from the cluster
    pub async fn get_namespaces(&self) -> Result<Vec<NamespaceInfo>> {
        let client = self.client().await?;
        let namespaces: Api<Namespace> = Api::all(client);
        let list = namespaces
            .list(&ListParams::default())
            .await
            .context("Failed to list namespaces")?;

        Ok(list
            .items
            .into_iter()
            .map(|ns| NamespaceInfo::new(ns.metadata.name.unwrap_or_default()))
            .collect())
    }

    /// Fetch all pods in a namespace
    pub async fn get_pods(&self, namespace: &str) -> Result<Vec<PodInfo>> {
        let client = self.client().await?;

        // Surface a clear error for a mistyped namespace instead of an empty list
        let namespaces: Api<Namespace> = Api::all(client.clone());
        namespaces.get(namespace).await.context(format!(
            "namespace '{}' not found or inaccessible",
            namespace
        ))?;

        let pods: Api<Pod> = Api::namespaced(client, namespace);
        let list = pods
            .list(&ListParams::default())
            .await
            .context(format!("Failed to list pods in {}", namespace))?;

        Ok(list
            .items
            .into_iter()
            .map(Self::pod_to_info)
            .collect())
    }

    /// Fetch the containers declared by a pod
    pub async fn get_containers(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<Vec<ContainerInfo>> {
        let client = self.client().await?;
        let pods: Api<Pod> = Api::namespaced(client, namespace);
        let pod = pods.get(pod_name).await.context(format!(
            "Failed to get pod '{}' in namespace '{}'",
            pod_name, namespace
        ))?;

        Ok(Self::pod_to_info(pod).containers)
    }

    /// Convert a k8s Pod to PodInfo
    fn pod_to_info(pod: Pod) -> PodInfo {
        let name = pod.metadata.name.unwrap_or_default();
        let mut info = PodInfo::new(name);

        if let Some(spec) = pod.spec {
            info.containers = spec
                .containers
                .into_iter()
                .map(|c| ContainerInfo::new(c.name))
                .collect();
        }

        info
    }
}

/// Build context listings, marking `active` (or the kubeconfig's own current
/// context when no override is set) as current
fn contexts_from(kubeconfig: &Kubeconfig, active: Option<&str>) -> Vec<ContextInfo> {
    let current = active.or(kubeconfig.current_context.as_deref());

    kubeconfig
        .contexts
        .iter()
        .map(|ctx| {
            let context = ctx.context.as_ref();
            ContextInfo::new(
                ctx.name.clone(),
                context.map(|c| c.cluster.clone()).unwrap_or_default(),
                context.and_then(|c| c.namespace.clone()),
                Some(ctx.name.as_str()) == current,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: dev
clusters:
- name: dev-cluster
  cluster:
    server: https://dev.example.com
- name: prod-cluster
  cluster:
    server: https://prod.example.com
contexts:
- name: dev
  context:
    cluster: dev-cluster
    user: dev-user
- name: prod
  context:
    cluster: prod-cluster
    user: prod-user
    namespace: payments
users:
- name: dev-user
  user:
    token: abc
- name: prod-user
  user:
    token: def
"#;

    #[test]
    fn test_contexts_follow_kubeconfig_current() {
        let kubeconfig = Kubeconfig::from_yaml(KUBECONFIG).unwrap();
        let contexts = contexts_from(&kubeconfig, None);

        assert_eq!(contexts.len(), 2);
        let dev = contexts.iter().find(|c| c.name == "dev").unwrap();
        assert!(dev.is_current);
        assert_eq!(dev.namespace, "default");
        assert_eq!(dev.cluster, "dev-cluster");

        let prod = contexts.iter().find(|c| c.name == "prod").unwrap();
        assert!(!prod.is_current);
        assert_eq!(prod.namespace, "payments");
    }

    #[test]
    fn test_contexts_prefer_active_override() {
        let kubeconfig = Kubeconfig::from_yaml(KUBECONFIG).unwrap();
        let contexts = contexts_from(&kubeconfig, Some("prod"));

        let current: Vec<_> = contexts.iter().filter(|c| c.is_current).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].name, "prod");
    }

    fn pod(name: &str, containers: Option<&[&str]>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: containers.map(|names| PodSpec {
                containers: names
                    .iter()
                    .map(|n| Container {
                        name: n.to_string(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_to_info_lists_declared_containers() {
        let info = KubeClient::pod_to_info(pod("api-7d9f", Some(&["api", "sidecar"])));
        assert_eq!(info.name, "api-7d9f");
        let names: Vec<_> = info.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["api", "sidecar"]);
    }

    #[test]
    fn test_pod_to_info_without_pod_spec() {
        let info = KubeClient::pod_to_info(pod("pending-pod", None));
        assert_eq!(info.name, "pending-pod");
        assert!(info.containers.is_empty());
    }
}
