//! Console resources and the ordered applier
//!
//! Each piece of console state is one [`ConsoleResource`]: the SCRAM user,
//! its ACLs, the ConfigMap, the Deployment and the Service. [`apply_all`]
//! drives them in dependency order and stops at the first failure or retry
//! request, so later resources never observe a half-built predecessor.
//!
//! Kubernetes objects carry an owner reference back to the console and are
//! garbage collected with it. The user and ACLs live inside the cluster
//! where no garbage collector reaches them; they implement
//! [`ExternalResource`] and are torn down explicitly on deletion.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec as K8sDeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, Secret, SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use tracing::{debug, info};

use crate::admin::AdminApi;
use crate::config::{
    CONFIG_MAP_KEY, ConfigPaths, ResolvedCredentials, SASL_MECHANISM_SCRAM_SHA_256,
    generate_config, render_yaml,
};
use crate::crd::{ObjectKey, RivvenCluster, RivvenConsole};
use crate::error::{OperatorError, Result};
use crate::secrets::{resolve_connect_auth, secret_field};
use crate::store::Store;

/// Requeue interval while the referenced cluster has no broker endpoints yet
pub const CLUSTER_NOT_READY_REQUEUE: Duration = Duration::from_secs(10);

/// Directory the config volume is mounted at in the console container
const CONFIG_MOUNT_DIR: &str = "/etc/rivven-console";

/// Generated password length for the console's SCRAM credential
const PASSWORD_LENGTH: usize = 32;

/// Outcome of ensuring one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The resource matches the desired state
    Applied,
    /// The resource cannot be applied yet; retry after the given delay
    RequeueAfter(Duration),
}

/// One piece of console state driven toward its desired form
#[async_trait]
pub trait ConsoleResource: Send + Sync {
    /// Bring the resource to its desired state; idempotent
    async fn ensure(&self) -> Result<EnsureOutcome>;

    /// Key identifying the resource, for logging
    fn key(&self) -> ObjectKey;
}

/// A resource living outside the Kubernetes object store
///
/// Owner-reference garbage collection cannot reach these; deletion must
/// remove them explicitly.
#[async_trait]
pub trait ExternalResource: ConsoleResource {
    /// Remove the resource; a no-op if it is already gone
    async fn cleanup(&self) -> Result<()>;
}

/// Ensure every resource in order, stopping at the first failure
///
/// Returns `Ok(Some(delay))` when a resource asked to be retried; resources
/// after it are not touched.
pub async fn apply_all(resources: &[Box<dyn ConsoleResource>]) -> Result<Option<Duration>> {
    for resource in resources {
        match resource.ensure().await? {
            EnsureOutcome::Applied => {
                debug!(resource = %resource.key(), "Resource applied");
            }
            EnsureOutcome::RequeueAfter(delay) => {
                info!(resource = %resource.key(), ?delay, "Resource not ready, requeueing");
                return Ok(Some(delay));
            }
        }
    }
    Ok(None)
}

/// Clean up every external resource in order, stopping at the first failure
pub async fn cleanup_all(resources: &[Box<dyn ExternalResource>]) -> Result<()> {
    for resource in resources {
        resource.cleanup().await?;
        debug!(resource = %resource.key(), "Resource cleaned up");
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Naming
// ----------------------------------------------------------------------------

/// Base name shared by the console's Kubernetes objects
pub fn console_resource_name(console: &RivvenConsole) -> String {
    format!("rivven-console-{}", console.object_key().name)
}

/// Key of the Secret holding the console's SCRAM credential
pub fn user_secret_key(console: &RivvenConsole) -> ObjectKey {
    ObjectKey::new(
        console.namespace_or_default(),
        format!("{}-user", console_resource_name(console)),
    )
}

/// Key of the console's ConfigMap
pub fn config_map_key(console: &RivvenConsole) -> ObjectKey {
    ObjectKey::new(
        console.namespace_or_default(),
        format!("{}-config", console_resource_name(console)),
    )
}

/// Key of the console's Deployment
pub fn deployment_key(console: &RivvenConsole) -> ObjectKey {
    ObjectKey::new(
        console.namespace_or_default(),
        console_resource_name(console),
    )
}

/// Key of the console's Service
pub fn service_key(console: &RivvenConsole) -> ObjectKey {
    ObjectKey::new(
        console.namespace_or_default(),
        console_resource_name(console),
    )
}

/// SCRAM username of the console's cluster credential
///
/// Includes the namespace so consoles with the same name in different
/// namespaces never collide inside one cluster.
pub fn console_username(console: &RivvenConsole) -> String {
    format!(
        "rivven-console-{}-{}",
        console.namespace_or_default(),
        console.object_key().name
    )
}

/// ACL principal of the console's cluster credential
pub fn console_principal(console: &RivvenConsole) -> String {
    format!("User:{}", console_username(console))
}

/// Owner reference pointing at the console, for garbage collection
pub fn owner_reference(console: &RivvenConsole) -> Result<OwnerReference> {
    let uid = console.metadata.uid.clone().ok_or_else(|| {
        OperatorError::InvalidConfig(format!(
            "console {} has no uid; cannot set owner reference",
            console.object_key()
        ))
    })?;
    Ok(OwnerReference {
        api_version: "rivven.hupe1980.github.io/v1alpha1".to_string(),
        kind: "RivvenConsole".to_string(),
        name: console.object_key().name,
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

fn generate_password(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

// ----------------------------------------------------------------------------
// Builders
// ----------------------------------------------------------------------------

fn object_meta(console: &RivvenConsole, key: &ObjectKey) -> Result<ObjectMeta> {
    Ok(ObjectMeta {
        name: Some(key.name.clone()),
        namespace: Some(key.namespace.clone()),
        labels: Some(console.get_labels()),
        owner_references: Some(vec![owner_reference(console)?]),
        ..Default::default()
    })
}

/// Build the Secret holding the console's SCRAM credential
pub fn build_credential_secret(
    console: &RivvenConsole,
    username: &str,
    password: &str,
) -> Result<Secret> {
    let key = user_secret_key(console);
    Ok(Secret {
        metadata: object_meta(console, &key)?,
        type_: Some("kubernetes.io/basic-auth".to_string()),
        string_data: Some(BTreeMap::from([
            ("username".to_string(), username.to_string()),
            ("password".to_string(), password.to_string()),
        ])),
        ..Default::default()
    })
}

/// Build the ConfigMap carrying the rendered console configuration
pub fn build_config_map(console: &RivvenConsole, config_yaml: String) -> Result<ConfigMap> {
    let key = config_map_key(console);
    Ok(ConfigMap {
        metadata: object_meta(console, &key)?,
        data: Some(BTreeMap::from([(CONFIG_MAP_KEY.to_string(), config_yaml)])),
        ..Default::default()
    })
}

/// Build the console Deployment
///
/// The ConfigMap is mounted read-only; TLS secrets are mounted at the same
/// paths the generated config refers to.
pub fn build_deployment(
    console: &RivvenConsole,
    cluster: &RivvenCluster,
    paths: &ConfigPaths,
) -> Result<Deployment> {
    let key = deployment_key(console);
    let deployment_spec = &console.spec.deployment;

    let mut volumes = vec![Volume {
        name: "config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map_key(console).name,
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: "config".to_string(),
        mount_path: CONFIG_MOUNT_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    }];

    if cluster.is_schema_registry_tls_enabled() && !paths.prefer_public_ca {
        if let Some(node_secret) = cluster.schema_registry_node_secret_ref() {
            volumes.push(Volume {
                name: "schema-registry-tls".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(node_secret.name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            });
            mounts.push(VolumeMount {
                name: "schema-registry-tls".to_string(),
                mount_path: paths.schema_registry_tls_dir.clone(),
                read_only: Some(true),
                ..Default::default()
            });
        }
    }

    for connect_cluster in &console.spec.connect.clusters {
        let Some(tls) = &connect_cluster.tls else {
            continue;
        };
        let Some(secret_ref) = &tls.secret_ref else {
            continue;
        };
        let volume_name = format!("connect-tls-{}", connect_cluster.name);
        volumes.push(Volume {
            name: volume_name.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_ref.name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: volume_name,
            mount_path: paths.connect_cluster_dir(&connect_cluster.name),
            read_only: Some(true),
            ..Default::default()
        });
    }

    let health_probe = Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/admin/health".to_string()),
            port: IntOrString::Int(console.spec.server.listen_port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(10),
        period_seconds: Some(10),
        ..Default::default()
    };

    let container = Container {
        name: "console".to_string(),
        image: Some(deployment_spec.image.clone()),
        image_pull_policy: Some(deployment_spec.image_pull_policy.clone()),
        args: Some(vec![
            "--config".to_string(),
            format!("{CONFIG_MOUNT_DIR}/{CONFIG_MAP_KEY}"),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: console.spec.server.listen_port,
            ..Default::default()
        }]),
        volume_mounts: Some(mounts),
        readiness_probe: Some(health_probe.clone()),
        liveness_probe: Some(health_probe),
        resources: deployment_spec.resources.clone(),
        ..Default::default()
    };

    Ok(Deployment {
        metadata: object_meta(console, &key)?,
        spec: Some(K8sDeploymentSpec {
            replicas: Some(deployment_spec.replicas),
            selector: LabelSelector {
                match_labels: Some(console.get_selector_labels()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(console.get_labels()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Build the ClusterIP Service in front of the console
pub fn build_service(console: &RivvenConsole) -> Result<Service> {
    let key = service_key(console);
    Ok(Service {
        metadata: object_meta(console, &key)?,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(console.get_selector_labels()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: console.spec.server.listen_port,
                target_port: Some(IntOrString::Int(console.spec.server.listen_port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

// ----------------------------------------------------------------------------
// Resource implementations
// ----------------------------------------------------------------------------

/// The console's SCRAM user and its credential Secret
pub struct ConsoleUser {
    pub store: Arc<dyn Store>,
    pub admin: Arc<dyn AdminApi>,
    pub console: Arc<RivvenConsole>,
    pub cluster: Arc<RivvenCluster>,
}

#[async_trait]
impl ConsoleResource for ConsoleUser {
    async fn ensure(&self) -> Result<EnsureOutcome> {
        if !self.cluster.has_broker_endpoints() {
            return Ok(EnsureOutcome::RequeueAfter(CLUSTER_NOT_READY_REQUEUE));
        }

        let key = self.key();
        let username = console_username(&self.console);
        let password = match self.store.get_secret(&key).await? {
            Some(secret) => secret_field(&secret, &key, "password")?,
            None => {
                let password = generate_password(PASSWORD_LENGTH);
                let secret = build_credential_secret(&self.console, &username, &password)?;
                self.store.create_secret(&secret).await?;
                info!(secret = %key, "Created console credential secret");
                password
            }
        };

        self.admin
            .ensure_user(&username, &password, SASL_MECHANISM_SCRAM_SHA_256)
            .await?;
        Ok(EnsureOutcome::Applied)
    }

    fn key(&self) -> ObjectKey {
        user_secret_key(&self.console)
    }
}

#[async_trait]
impl ExternalResource for ConsoleUser {
    async fn cleanup(&self) -> Result<()> {
        self.admin
            .delete_user(&console_username(&self.console))
            .await
    }
}

/// ACL entries granting the console user read access
pub struct ConsoleAcl {
    pub admin: Arc<dyn AdminApi>,
    pub console: Arc<RivvenConsole>,
}

#[async_trait]
impl ConsoleResource for ConsoleAcl {
    async fn ensure(&self) -> Result<EnsureOutcome> {
        self.admin
            .ensure_acls(&console_principal(&self.console))
            .await?;
        Ok(EnsureOutcome::Applied)
    }

    fn key(&self) -> ObjectKey {
        ObjectKey::new(
            self.console.namespace_or_default(),
            console_principal(&self.console),
        )
    }
}

#[async_trait]
impl ExternalResource for ConsoleAcl {
    async fn cleanup(&self) -> Result<()> {
        self.admin
            .delete_acls(&console_principal(&self.console))
            .await
    }
}

/// The ConfigMap carrying the rendered console configuration
pub struct ConsoleConfigMap {
    pub store: Arc<dyn Store>,
    pub console: Arc<RivvenConsole>,
    pub cluster: Arc<RivvenCluster>,
    pub paths: ConfigPaths,
}

#[async_trait]
impl ConsoleResource for ConsoleConfigMap {
    async fn ensure(&self) -> Result<EnsureOutcome> {
        let user_key = user_secret_key(&self.console);
        let user_secret =
            self.store
                .get_secret(&user_key)
                .await?
                .ok_or_else(|| OperatorError::NotFound {
                    kind: "Secret".to_string(),
                    name: user_key.name.clone(),
                    namespace: user_key.namespace.clone(),
                })?;
        let credentials = ResolvedCredentials {
            username: secret_field(&user_secret, &user_key, "username")?,
            password: secret_field(&user_secret, &user_key, "password")?,
        };

        let connect_auth = resolve_connect_auth(self.store.as_ref(), &self.console).await?;
        let config = generate_config(
            &self.paths,
            &self.console,
            &self.cluster,
            Some(&credentials),
            &connect_auth,
        );
        let desired = build_config_map(&self.console, render_yaml(&config)?)?;

        match self.store.get_config_map(&self.key()).await? {
            None => {
                self.store.create_config_map(&desired).await?;
                info!(config_map = %self.key(), "Created console ConfigMap");
            }
            Some(current)
                if current.data != desired.data
                    || current.metadata.labels != desired.metadata.labels =>
            {
                self.store.update_config_map(&current, desired).await?;
                info!(config_map = %self.key(), "Updated console ConfigMap");
            }
            Some(_) => {}
        }
        Ok(EnsureOutcome::Applied)
    }

    fn key(&self) -> ObjectKey {
        config_map_key(&self.console)
    }
}

/// The console Deployment
pub struct ConsoleDeployment {
    pub store: Arc<dyn Store>,
    pub console: Arc<RivvenConsole>,
    pub cluster: Arc<RivvenCluster>,
    pub paths: ConfigPaths,
}

#[async_trait]
impl ConsoleResource for ConsoleDeployment {
    async fn ensure(&self) -> Result<EnsureOutcome> {
        let desired = build_deployment(&self.console, &self.cluster, &self.paths)?;
        match self.store.get_deployment(&self.key()).await? {
            None => {
                self.store.create_deployment(&desired).await?;
                info!(deployment = %self.key(), "Created console Deployment");
            }
            Some(current)
                if current.spec != desired.spec
                    || current.metadata.labels != desired.metadata.labels =>
            {
                self.store.update_deployment(&current, desired).await?;
                info!(deployment = %self.key(), "Updated console Deployment");
            }
            Some(_) => {}
        }
        Ok(EnsureOutcome::Applied)
    }

    fn key(&self) -> ObjectKey {
        deployment_key(&self.console)
    }
}

/// The ClusterIP Service in front of the console
pub struct ConsoleService {
    pub store: Arc<dyn Store>,
    pub console: Arc<RivvenConsole>,
}

#[async_trait]
impl ConsoleResource for ConsoleService {
    async fn ensure(&self) -> Result<EnsureOutcome> {
        let desired = build_service(&self.console)?;
        match self.store.get_service(&self.key()).await? {
            None => {
                self.store.create_service(&desired).await?;
                info!(service = %self.key(), "Created console Service");
            }
            Some(current) if service_needs_update(&current, &desired) => {
                self.store.update_service(&current, desired).await?;
                info!(service = %self.key(), "Updated console Service");
            }
            Some(_) => {}
        }
        Ok(EnsureOutcome::Applied)
    }

    fn key(&self) -> ObjectKey {
        service_key(&self.console)
    }
}

/// Compare only the fields the operator manages; the API server fills in
/// `clusterIP` and friends on the live object.
fn service_needs_update(current: &Service, desired: &Service) -> bool {
    let (Some(current_spec), Some(desired_spec)) = (&current.spec, &desired.spec) else {
        return true;
    };
    current_spec.ports != desired_spec.ports
        || current_spec.selector != desired_spec.selector
        || current_spec.type_ != desired_spec.type_
        || current.metadata.labels != desired.metadata.labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::MockAdminApi;
    use crate::crd::{
        ClusterReference, InternalListenerSpec, NodeEndpoints, RivvenClusterSpec,
        RivvenClusterStatus, RivvenConsoleSpec,
    };
    use crate::store::MockStore;
    use k8s_openapi::ByteString;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn console() -> RivvenConsole {
        RivvenConsole {
            metadata: ObjectMeta {
                name: Some("console".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("uid-1".to_string()),
                ..Default::default()
            },
            spec: RivvenConsoleSpec {
                cluster_ref: ClusterReference {
                    name: "prod".to_string(),
                    namespace: None,
                },
                server: Default::default(),
                schema: Default::default(),
                connect: Default::default(),
                deployment: Default::default(),
            },
            status: None,
        }
    }

    fn ready_cluster() -> RivvenCluster {
        let mut spec = RivvenClusterSpec {
            enable_sasl: true,
            listeners: Default::default(),
            schema_registry: Default::default(),
            admin_port: 9644,
        };
        spec.listeners.internal = Some(InternalListenerSpec { port: 9092 });
        RivvenCluster {
            metadata: ObjectMeta {
                name: Some("prod".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec,
            status: Some(RivvenClusterStatus {
                nodes: NodeEndpoints {
                    internal: vec!["rivven-prod-0.rivven-prod.default.svc".to_string()],
                    external: vec![],
                },
            }),
        }
    }

    fn credential_secret() -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("rivven-console-console-user".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                (
                    "username".to_string(),
                    ByteString(b"rivven-console-default-console".to_vec()),
                ),
                ("password".to_string(), ByteString(b"pw123".to_vec())),
            ])),
            ..Default::default()
        }
    }

    #[test]
    fn test_resource_names() {
        let console = console();
        assert_eq!(console_resource_name(&console), "rivven-console-console");
        assert_eq!(
            user_secret_key(&console),
            ObjectKey::new("default", "rivven-console-console-user")
        );
        assert_eq!(
            config_map_key(&console),
            ObjectKey::new("default", "rivven-console-console-config")
        );
        assert_eq!(console_username(&console), "rivven-console-default-console");
        assert_eq!(
            console_principal(&console),
            "User:rivven-console-default-console"
        );
    }

    #[test]
    fn test_owner_reference_requires_uid() {
        let console = console();
        let owner = owner_reference(&console).unwrap();
        assert_eq!(owner.kind, "RivvenConsole");
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.controller, Some(true));

        let mut no_uid = console;
        no_uid.metadata.uid = None;
        assert!(owner_reference(&no_uid).is_err());
    }

    #[test]
    fn test_build_deployment_mounts_config() {
        let deployment = build_deployment(&console(), &ready_cluster(), &ConfigPaths::default())
            .unwrap();
        let pod = deployment.spec.unwrap().template.spec.unwrap();
        let container = &pod.containers[0];

        assert_eq!(
            container.args.as_ref().unwrap(),
            &vec![
                "--config".to_string(),
                "/etc/rivven-console/config.yaml".to_string()
            ]
        );
        let mounts = container.volume_mounts.as_ref().unwrap();
        assert!(mounts.iter().any(|m| m.mount_path == "/etc/rivven-console"));
        assert!(
            pod.volumes
                .as_ref()
                .unwrap()
                .iter()
                .any(|v| v.config_map.is_some())
        );
    }

    #[test]
    fn test_build_service_targets_listen_port() {
        let service = build_service(&console()).unwrap();
        let spec = service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(spec.ports.as_ref().unwrap()[0].port, 8080);
    }

    #[tokio::test]
    async fn test_user_requeues_until_cluster_ready() {
        let mut cluster = ready_cluster();
        cluster.status = None;

        let user = ConsoleUser {
            store: Arc::new(MockStore::new()),
            admin: Arc::new(MockAdminApi::new()),
            console: Arc::new(console()),
            cluster: Arc::new(cluster),
        };

        assert_eq!(
            user.ensure().await.unwrap(),
            EnsureOutcome::RequeueAfter(CLUSTER_NOT_READY_REQUEUE)
        );
    }

    #[tokio::test]
    async fn test_user_creates_secret_and_scram_user() {
        let mut store = MockStore::new();
        store.expect_get_secret().returning(|_| Ok(None));
        store
            .expect_create_secret()
            .withf(|secret| {
                let data = secret.string_data.as_ref().unwrap();
                data["username"] == "rivven-console-default-console"
                    && data["password"].len() == PASSWORD_LENGTH
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut admin = MockAdminApi::new();
        admin
            .expect_ensure_user()
            .withf(|username, password, mechanism| {
                username == "rivven-console-default-console"
                    && password.len() == PASSWORD_LENGTH
                    && mechanism == SASL_MECHANISM_SCRAM_SHA_256
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let user = ConsoleUser {
            store: Arc::new(store),
            admin: Arc::new(admin),
            console: Arc::new(console()),
            cluster: Arc::new(ready_cluster()),
        };

        assert_eq!(user.ensure().await.unwrap(), EnsureOutcome::Applied);
    }

    #[tokio::test]
    async fn test_user_reuses_existing_password() {
        let mut store = MockStore::new();
        store
            .expect_get_secret()
            .returning(|_| Ok(Some(credential_secret())));
        store.expect_create_secret().times(0);

        let mut admin = MockAdminApi::new();
        admin
            .expect_ensure_user()
            .withf(|_, password, _| password == "pw123")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let user = ConsoleUser {
            store: Arc::new(store),
            admin: Arc::new(admin),
            console: Arc::new(console()),
            cluster: Arc::new(ready_cluster()),
        };

        assert_eq!(user.ensure().await.unwrap(), EnsureOutcome::Applied);
    }

    #[tokio::test]
    async fn test_config_map_requires_credential_secret() {
        let mut store = MockStore::new();
        store.expect_get_secret().returning(|_| Ok(None));
        store.expect_create_config_map().times(0);

        let cm = ConsoleConfigMap {
            store: Arc::new(store),
            console: Arc::new(console()),
            cluster: Arc::new(ready_cluster()),
            paths: ConfigPaths::default(),
        };

        let err = cm.ensure().await.unwrap_err();
        assert!(matches!(err, OperatorError::NotFound { ref kind, .. } if kind == "Secret"));
    }

    #[tokio::test]
    async fn test_config_map_converged_makes_no_writes() {
        let console = Arc::new(console());
        let cluster = Arc::new(ready_cluster());

        // Render the exact ConfigMap the resource would produce.
        let creds = ResolvedCredentials {
            username: "rivven-console-default-console".to_string(),
            password: "pw123".to_string(),
        };
        let config = generate_config(
            &ConfigPaths::default(),
            &console,
            &cluster,
            Some(&creds),
            &BTreeMap::new(),
        );
        let existing = build_config_map(&console, render_yaml(&config).unwrap()).unwrap();

        let mut store = MockStore::new();
        store
            .expect_get_secret()
            .returning(|_| Ok(Some(credential_secret())));
        store
            .expect_get_config_map()
            .returning(move |_| Ok(Some(existing.clone())));
        store.expect_create_config_map().times(0);
        store.expect_update_config_map().times(0);

        let cm = ConsoleConfigMap {
            store: Arc::new(store),
            console,
            cluster,
            paths: ConfigPaths::default(),
        };
        assert_eq!(cm.ensure().await.unwrap(), EnsureOutcome::Applied);
    }

    #[tokio::test]
    async fn test_config_map_updates_on_drift() {
        let mut stale = build_config_map(&console(), "stale: true\n".to_string()).unwrap();
        stale.metadata.resource_version = Some("7".to_string());

        let mut store = MockStore::new();
        store
            .expect_get_secret()
            .returning(|_| Ok(Some(credential_secret())));
        store
            .expect_get_config_map()
            .returning(move |_| Ok(Some(stale.clone())));
        store
            .expect_update_config_map()
            .times(1)
            .returning(|_, _| Ok(()));
        store.expect_create_config_map().times(0);

        let cm = ConsoleConfigMap {
            store: Arc::new(store),
            console: Arc::new(console()),
            cluster: Arc::new(ready_cluster()),
            paths: ConfigPaths::default(),
        };
        assert_eq!(cm.ensure().await.unwrap(), EnsureOutcome::Applied);
    }

    #[tokio::test]
    async fn test_config_map_updates_on_label_drift() {
        let console = Arc::new(console());
        let cluster = Arc::new(ready_cluster());

        let creds = ResolvedCredentials {
            username: "rivven-console-default-console".to_string(),
            password: "pw123".to_string(),
        };
        let config = generate_config(
            &ConfigPaths::default(),
            &console,
            &cluster,
            Some(&creds),
            &BTreeMap::new(),
        );
        let mut existing = build_config_map(&console, render_yaml(&config).unwrap()).unwrap();
        existing
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .remove("app.kubernetes.io/managed-by");

        let mut store = MockStore::new();
        store
            .expect_get_secret()
            .returning(|_| Ok(Some(credential_secret())));
        store
            .expect_get_config_map()
            .returning(move |_| Ok(Some(existing.clone())));
        store
            .expect_update_config_map()
            .times(1)
            .returning(|_, _| Ok(()));
        store.expect_create_config_map().times(0);

        let cm = ConsoleConfigMap {
            store: Arc::new(store),
            console,
            cluster,
            paths: ConfigPaths::default(),
        };
        assert_eq!(cm.ensure().await.unwrap(), EnsureOutcome::Applied);
    }

    #[tokio::test]
    async fn test_deployment_converged_makes_no_writes() {
        let console = Arc::new(console());
        let cluster = Arc::new(ready_cluster());
        let existing = build_deployment(&console, &cluster, &ConfigPaths::default()).unwrap();

        let mut store = MockStore::new();
        store
            .expect_get_deployment()
            .returning(move |_| Ok(Some(existing.clone())));
        store.expect_create_deployment().times(0);
        store.expect_update_deployment().times(0);

        let deployment = ConsoleDeployment {
            store: Arc::new(store),
            console,
            cluster,
            paths: ConfigPaths::default(),
        };
        assert_eq!(deployment.ensure().await.unwrap(), EnsureOutcome::Applied);
    }

    #[tokio::test]
    async fn test_service_ignores_server_assigned_fields() {
        let console = Arc::new(console());
        let mut existing = build_service(&console).unwrap();
        existing.spec.as_mut().unwrap().cluster_ip = Some("10.0.0.17".to_string());

        let mut store = MockStore::new();
        store
            .expect_get_service()
            .returning(move |_| Ok(Some(existing.clone())));
        store.expect_create_service().times(0);
        store.expect_update_service().times(0);

        let service = ConsoleService {
            store: Arc::new(store),
            console,
        };
        assert_eq!(service.ensure().await.unwrap(), EnsureOutcome::Applied);
    }

    struct StubResource {
        name: &'static str,
        outcome: EnsureOutcome,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConsoleResource for StubResource {
        async fn ensure(&self) -> Result<EnsureOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcome.clone())
        }

        fn key(&self) -> ObjectKey {
            ObjectKey::new("default", self.name)
        }
    }

    #[tokio::test]
    async fn test_apply_all_stops_at_first_requeue() {
        let calls: Vec<Arc<AtomicUsize>> =
            (0..5).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let names = ["a", "b", "c", "d", "e"];
        let resources: Vec<Box<dyn ConsoleResource>> = names
            .into_iter()
            .zip(&calls)
            .map(|(name, calls)| {
                let outcome = if name == "b" {
                    EnsureOutcome::RequeueAfter(Duration::from_secs(5))
                } else {
                    EnsureOutcome::Applied
                };
                Box::new(StubResource {
                    name,
                    outcome,
                    calls: calls.clone(),
                }) as Box<dyn ConsoleResource>
            })
            .collect();

        let delay = apply_all(&resources).await.unwrap();
        assert_eq!(delay, Some(Duration::from_secs(5)));
        assert_eq!(calls[0].load(Ordering::SeqCst), 1);
        assert_eq!(calls[1].load(Ordering::SeqCst), 1);
        for later in &calls[2..] {
            assert_eq!(later.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_apply_all_completes_in_order() {
        let calls: Vec<Arc<AtomicUsize>> =
            (0..2).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let resources: Vec<Box<dyn ConsoleResource>> = vec![
            Box::new(StubResource {
                name: "a",
                outcome: EnsureOutcome::Applied,
                calls: calls[0].clone(),
            }),
            Box::new(StubResource {
                name: "b",
                outcome: EnsureOutcome::Applied,
                calls: calls[1].clone(),
            }),
        ];

        assert_eq!(apply_all(&resources).await.unwrap(), None);
        assert_eq!(calls[0].load(Ordering::SeqCst), 1);
        assert_eq!(calls[1].load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cleanup_all_removes_user_and_acls() {
        let mut user_admin = MockAdminApi::new();
        user_admin
            .expect_delete_user()
            .withf(|username| username == "rivven-console-default-console")
            .times(1)
            .returning(|_| Ok(()));
        let mut acl_admin = MockAdminApi::new();
        acl_admin
            .expect_delete_acls()
            .withf(|principal| principal == "User:rivven-console-default-console")
            .times(1)
            .returning(|_| Ok(()));

        let console = Arc::new(console());
        let resources: Vec<Box<dyn ExternalResource>> = vec![
            Box::new(ConsoleUser {
                store: Arc::new(MockStore::new()),
                admin: Arc::new(user_admin),
                console: console.clone(),
                cluster: Arc::new(ready_cluster()),
            }),
            Box::new(ConsoleAcl {
                admin: Arc::new(acl_admin),
                console,
            }),
        ];

        cleanup_all(&resources).await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_all_aborts_on_failure() {
        let mut user_admin = MockAdminApi::new();
        user_admin
            .expect_delete_user()
            .times(1)
            .returning(|_| Err(OperatorError::AdminApi("connection refused".to_string())));
        let mut acl_admin = MockAdminApi::new();
        acl_admin.expect_delete_acls().times(0);

        let console = Arc::new(console());
        let resources: Vec<Box<dyn ExternalResource>> = vec![
            Box::new(ConsoleUser {
                store: Arc::new(MockStore::new()),
                admin: Arc::new(user_admin),
                console: console.clone(),
                cluster: Arc::new(ready_cluster()),
            }),
            Box::new(ConsoleAcl {
                admin: Arc::new(acl_admin),
                console,
            }),
        ];

        assert!(cleanup_all(&resources).await.is_err());
    }
}
