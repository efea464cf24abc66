//! Kubernetes store access for the console operator
//!
//! All object-store traffic goes through the [`Store`] trait so the
//! reconciliation core can be exercised against a mock in tests. The
//! production implementation, [`KubeStore`], wraps a `kube::Client` and maps
//! 404 responses to `Ok(None)` on reads; every other API failure surfaces as
//! [`OperatorError::KubeError`].

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;

#[cfg(test)]
use mockall::automock;

use crate::crd::{ObjectKey, RivvenCluster, RivvenConsole, RivvenConsoleStatus};
use crate::error::{OperatorError, Result};

/// Object-store operations used by the reconciliation core
///
/// Reads return `Ok(None)` when the object does not exist. Updates take the
/// fetched current object so identity metadata (`resourceVersion`, `uid`) is
/// carried over; callers never replace ownership of a live object.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a RivvenConsole
    async fn get_console(&self, key: &ObjectKey) -> Result<Option<RivvenConsole>>;

    /// Fetch a RivvenCluster
    async fn get_cluster(&self, key: &ObjectKey) -> Result<Option<RivvenCluster>>;

    /// Add a finalizer to a console if not already present
    async fn add_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()>;

    /// Remove a finalizer from a console; a no-op if the console is gone
    async fn remove_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()>;

    /// Patch the status subresource of a console
    async fn update_console_status(
        &self,
        key: &ObjectKey,
        status: &RivvenConsoleStatus,
    ) -> Result<()>;

    /// Fetch a Secret
    async fn get_secret(&self, key: &ObjectKey) -> Result<Option<Secret>>;

    /// Create a Secret
    async fn create_secret(&self, secret: &Secret) -> Result<()>;

    /// Fetch a ConfigMap
    async fn get_config_map(&self, key: &ObjectKey) -> Result<Option<ConfigMap>>;

    /// Create a ConfigMap
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()>;

    /// Update a ConfigMap, preserving the current object's identity metadata
    async fn update_config_map(&self, current: &ConfigMap, desired: ConfigMap) -> Result<()>;

    /// Fetch a Deployment
    async fn get_deployment(&self, key: &ObjectKey) -> Result<Option<Deployment>>;

    /// Create a Deployment
    async fn create_deployment(&self, deployment: &Deployment) -> Result<()>;

    /// Update a Deployment, preserving the current object's identity metadata
    async fn update_deployment(&self, current: &Deployment, desired: Deployment) -> Result<()>;

    /// Fetch a Service
    async fn get_service(&self, key: &ObjectKey) -> Result<Option<Service>>;

    /// Create a Service
    async fn create_service(&self, service: &Service) -> Result<()>;

    /// Update a Service, preserving the current object's identity metadata
    async fn update_service(&self, current: &Service, desired: Service) -> Result<()>;
}

/// Production [`Store`] backed by the Kubernetes API
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a new KubeStore wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn consoles(&self, namespace: &str) -> Api<RivvenConsole> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn clusters(&self, namespace: &str) -> Api<RivvenCluster> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map a kube 404 to `Ok(None)`
fn ok_or_not_found<T>(result: kube::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Extract namespace/name from object metadata for an update call
fn meta_key<K: ResourceExt>(obj: &K, kind: &str) -> Result<ObjectKey> {
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| OperatorError::InvalidConfig(format!("{kind} missing metadata.name")))?;
    let namespace = obj.meta().namespace.clone().ok_or_else(|| {
        OperatorError::InvalidConfig(format!("{kind} missing metadata.namespace"))
    })?;
    Ok(ObjectKey::new(namespace, name))
}

/// Carry identity metadata of the live object into the desired one
fn preserve_identity<K: ResourceExt>(current: &K, desired: &mut K) {
    desired.meta_mut().resource_version = current.meta().resource_version.clone();
    desired.meta_mut().uid = current.meta().uid.clone();
}

#[async_trait]
impl Store for KubeStore {
    async fn get_console(&self, key: &ObjectKey) -> Result<Option<RivvenConsole>> {
        ok_or_not_found(self.consoles(&key.namespace).get(&key.name).await)
    }

    async fn get_cluster(&self, key: &ObjectKey) -> Result<Option<RivvenCluster>> {
        ok_or_not_found(self.clusters(&key.namespace).get(&key.name).await)
    }

    async fn add_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()> {
        let api = self.consoles(&key.namespace);
        let console = api.get(&key.name).await?;
        let mut finalizers = console.finalizers().to_vec();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        let patch = json!({"metadata": {"finalizers": finalizers}});
        api.patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn remove_finalizer(&self, key: &ObjectKey, finalizer: &str) -> Result<()> {
        let api = self.consoles(&key.namespace);
        let Some(console) = ok_or_not_found(api.get(&key.name).await)? else {
            return Ok(());
        };
        let finalizers: Vec<String> = console
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != finalizer)
            .cloned()
            .collect();

        let patch = json!({"metadata": {"finalizers": finalizers}});
        ok_or_not_found(
            api.patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
                .await,
        )?;
        Ok(())
    }

    async fn update_console_status(
        &self,
        key: &ObjectKey,
        status: &RivvenConsoleStatus,
    ) -> Result<()> {
        let patch = json!({"status": status});
        self.consoles(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Option<Secret>> {
        ok_or_not_found(self.secrets(&key.namespace).get(&key.name).await)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        let key = meta_key(secret, "Secret")?;
        self.secrets(&key.namespace)
            .create(&PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn get_config_map(&self, key: &ObjectKey) -> Result<Option<ConfigMap>> {
        ok_or_not_found(self.config_maps(&key.namespace).get(&key.name).await)
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<()> {
        let key = meta_key(config_map, "ConfigMap")?;
        self.config_maps(&key.namespace)
            .create(&PostParams::default(), config_map)
            .await?;
        Ok(())
    }

    async fn update_config_map(&self, current: &ConfigMap, mut desired: ConfigMap) -> Result<()> {
        let key = meta_key(current, "ConfigMap")?;
        preserve_identity(current, &mut desired);
        self.config_maps(&key.namespace)
            .replace(&key.name, &PostParams::default(), &desired)
            .await?;
        Ok(())
    }

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Option<Deployment>> {
        ok_or_not_found(self.deployments(&key.namespace).get(&key.name).await)
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<()> {
        let key = meta_key(deployment, "Deployment")?;
        self.deployments(&key.namespace)
            .create(&PostParams::default(), deployment)
            .await?;
        Ok(())
    }

    async fn update_deployment(&self, current: &Deployment, mut desired: Deployment) -> Result<()> {
        let key = meta_key(current, "Deployment")?;
        preserve_identity(current, &mut desired);
        self.deployments(&key.namespace)
            .replace(&key.name, &PostParams::default(), &desired)
            .await?;
        Ok(())
    }

    async fn get_service(&self, key: &ObjectKey) -> Result<Option<Service>> {
        ok_or_not_found(self.services(&key.namespace).get(&key.name).await)
    }

    async fn create_service(&self, service: &Service) -> Result<()> {
        let key = meta_key(service, "Service")?;
        self.services(&key.namespace)
            .create(&PostParams::default(), service)
            .await?;
        Ok(())
    }

    async fn update_service(&self, current: &Service, mut desired: Service) -> Result<()> {
        let key = meta_key(current, "Service")?;
        preserve_identity(current, &mut desired);
        // Services carry an immutable clusterIP; keep the live one.
        if let (Some(current_spec), Some(desired_spec)) = (&current.spec, &mut desired.spec) {
            desired_spec.cluster_ip = current_spec.cluster_ip.clone();
        }
        self.services(&key.namespace)
            .replace(&key.name, &PostParams::default(), &desired)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_meta_key_requires_name_and_namespace() {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("console-config".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let key = meta_key(&cm, "ConfigMap").unwrap();
        assert_eq!(key, ObjectKey::new("default", "console-config"));

        let nameless = ConfigMap::default();
        assert!(meta_key(&nameless, "ConfigMap").is_err());
    }

    #[test]
    fn test_preserve_identity_copies_version_and_uid() {
        let current = ConfigMap {
            metadata: ObjectMeta {
                name: Some("console-config".to_string()),
                namespace: Some("default".to_string()),
                resource_version: Some("42".to_string()),
                uid: Some("abc-123".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut desired = ConfigMap {
            metadata: ObjectMeta {
                name: Some("console-config".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        preserve_identity(&current, &mut desired);

        assert_eq!(desired.metadata.resource_version, Some("42".to_string()));
        assert_eq!(desired.metadata.uid, Some("abc-123".to_string()));
    }
}
