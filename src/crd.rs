//! Custom Resource Definitions for the Rivven console operator
//!
//! This module defines the `RivvenConsole` CRD that represents a deployed
//! Rivven web console, plus the read-only view of the `RivvenCluster` CRD
//! the console connects to. The cluster CRD is owned by the main rivven
//! operator; only the fields the console consumes are modeled here.

use kube::{CustomResource, ResourceExt};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// Regex for validating Kubernetes names (RFC 1123 subdomain)
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Validate a Kubernetes name (RFC 1123 subdomain)
fn validate_k8s_name(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(()); // Empty is allowed for optional fields
    }
    if value.len() > 63 {
        return Err(
            ValidationError::new("name_too_long").with_message("name exceeds 63 characters".into())
        );
    }
    if !NAME_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_name").with_message(
            format!("'{}' is not a valid Kubernetes name (RFC 1123)", value).into(),
        ));
    }
    Ok(())
}

fn validate_optional_k8s_name(value: &str) -> Result<(), ValidationError> {
    validate_k8s_name(value)
}

/// Validate a container image reference
fn validate_image(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(()); // Empty is allowed (uses default)
    }
    if value.len() > 255 {
        return Err(ValidationError::new("image_too_long")
            .with_message("image reference exceeds 255 characters".into()));
    }
    if value.contains("..") || value.starts_with('/') || value.starts_with('-') {
        return Err(ValidationError::new("invalid_image")
            .with_message(format!("'{}' is not a valid container image", value).into()));
    }
    Ok(())
}

/// Validate a connect cluster URL (http or https)
fn validate_connect_url(value: &str) -> Result<(), ValidationError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ValidationError::new("invalid_url")
            .with_message(format!("'{}' must be an http(s) URL", value).into()));
    }
    Ok(())
}

/// Namespace + name identifying one object in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Object namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Create a new object key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reference to a Secret holding credential material
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    /// Name of the Secret
    #[validate(length(min = 1, max = 63, message = "secret name must be 1-63 characters"))]
    #[validate(custom(function = "validate_k8s_name"))]
    pub name: String,

    /// Namespace of the Secret (defaults to the console's namespace)
    #[serde(default)]
    #[validate(custom(function = "validate_optional_k8s_name"))]
    pub namespace: Option<String>,
}

impl SecretRef {
    /// Resolve the key of the referenced Secret
    pub fn object_key(&self, default_namespace: &str) -> ObjectKey {
        ObjectKey::new(
            self.namespace.as_deref().unwrap_or(default_namespace),
            &self.name,
        )
    }
}

/// Reference to the RivvenCluster a console connects to
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReference {
    /// Name of the RivvenCluster
    #[validate(length(min = 1, max = 63, message = "cluster name must be 1-63 characters"))]
    #[validate(custom(function = "validate_k8s_name"))]
    pub name: String,

    /// Namespace of the RivvenCluster (defaults to same namespace)
    #[serde(default)]
    #[validate(custom(function = "validate_optional_k8s_name"))]
    pub namespace: Option<String>,
}

impl ClusterReference {
    /// Resolve the key of the referenced cluster
    pub fn object_key(&self, default_namespace: &str) -> ObjectKey {
        ObjectKey::new(
            self.namespace.as_deref().unwrap_or(default_namespace),
            &self.name,
        )
    }
}

// ============================================================================
// RivvenConsole CRD
// ============================================================================

/// RivvenConsole custom resource definition
///
/// Represents one deployed Rivven web console connected to a RivvenCluster.
/// The operator watches these resources and drives the console's credential,
/// ACLs, configuration, Deployment and Service toward the desired state.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "rivven.hupe1980.github.io",
    version = "v1alpha1",
    kind = "RivvenConsole",
    plural = "rivvenconsoles",
    shortname = "rco",
    namespaced,
    status = "RivvenConsoleStatus",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterRef.name"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RivvenConsoleSpec {
    /// Cluster the console connects to
    #[validate(nested)]
    pub cluster_ref: ClusterReference,

    /// Console HTTP server options
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerSpec,

    /// Schema registry integration
    #[serde(default)]
    pub schema: SchemaSpec,

    /// Connect cluster integration
    #[serde(default)]
    #[validate(nested)]
    pub connect: ConnectSpec,

    /// Console workload settings
    #[serde(default)]
    #[validate(nested)]
    pub deployment: DeploymentSpec,
}

/// Console HTTP server options, passed through into the generated config
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    /// Port the console listens on
    #[serde(default = "default_listen_port")]
    #[validate(range(min = 1, max = 65535, message = "listenPort must be a valid port"))]
    pub listen_port: i32,
}

impl Default for ServerSpec {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
        }
    }
}

fn default_listen_port() -> i32 {
    8080
}

/// Schema registry toggle
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSpec {
    /// Enable the schema registry integration
    #[serde(default)]
    pub enabled: bool,
}

/// Connect cluster integration settings
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectSpec {
    /// Enable the connect integration
    #[serde(default)]
    pub enabled: bool,

    /// Connect clusters the console talks to (max 20)
    #[serde(default)]
    #[validate(length(max = 20, message = "maximum 20 connect clusters allowed"))]
    #[validate(nested)]
    pub clusters: Vec<ConnectClusterSpec>,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub connect_timeout_seconds: u64,

    /// Read timeout in seconds
    #[serde(default = "default_read_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub read_timeout_seconds: u64,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub request_timeout_seconds: u64,
}

impl Default for ConnectSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            clusters: vec![],
            connect_timeout_seconds: default_connect_timeout(),
            read_timeout_seconds: default_read_timeout(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_read_timeout() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    6
}

/// One connect cluster the console talks to
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectClusterSpec {
    /// Connect cluster name, used in the generated config and TLS mount paths
    #[validate(length(min = 1, max = 63, message = "cluster name must be 1-63 characters"))]
    #[validate(custom(function = "validate_k8s_name"))]
    pub name: String,

    /// Connect cluster URL
    #[validate(custom(function = "validate_connect_url"))]
    pub url: String,

    /// Secret with `username`/`password` fields for basic auth
    #[serde(default)]
    #[validate(nested)]
    pub basic_auth_ref: Option<SecretRef>,

    /// Secret with a `token` field for bearer auth
    #[serde(default)]
    #[validate(nested)]
    pub token_ref: Option<SecretRef>,

    /// TLS settings for the connect cluster connection
    #[serde(default)]
    #[validate(nested)]
    pub tls: Option<ConnectClusterTlsSpec>,
}

/// TLS settings for one connect cluster connection
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectClusterTlsSpec {
    /// Enable TLS
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Skip server certificate verification (testing only)
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    /// Secret with `ca.crt`/`tls.crt`/`tls.key` mounted into the console pod
    #[serde(default)]
    #[validate(nested)]
    pub secret_ref: Option<SecretRef>,
}

fn default_true() -> bool {
    true
}

/// Console workload settings
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Number of console replicas
    #[serde(default = "default_replicas")]
    #[validate(range(min = 1, max = 10, message = "replicas must be between 1 and 10"))]
    pub replicas: i32,

    /// Container image
    #[serde(default = "default_image")]
    #[validate(custom(function = "validate_image"))]
    pub image: String,

    /// Image pull policy (Always, IfNotPresent, Never)
    #[serde(default = "default_image_pull_policy")]
    pub image_pull_policy: String,

    /// Resource requirements (CPU, memory)
    #[serde(default)]
    #[schemars(skip)]
    pub resources: Option<k8s_openapi::api::core::v1::ResourceRequirements>,
}

impl Default for DeploymentSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            image: default_image(),
            image_pull_policy: default_image_pull_policy(),
            resources: None,
        }
    }
}

fn default_replicas() -> i32 {
    1
}

fn default_image() -> String {
    "ghcr.io/hupe1980/rivven-console:latest".to_string()
}

fn default_image_pull_policy() -> String {
    "IfNotPresent".to_string()
}

/// Current phase of a console
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub enum ConsolePhase {
    /// Console has not been reconciled yet
    #[default]
    Pending,
    /// Console resources are being brought up
    Provisioning,
    /// Console is running
    Running,
}

/// Condition describing an aspect of console state
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleCondition {
    /// Condition type (e.g. Ready)
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Condition status (True, False, Unknown)
    pub status: String,

    /// Machine-readable reason
    pub reason: Option<String>,

    /// Human-readable message
    pub message: Option<String>,

    /// Last time the condition transitioned
    pub last_transition_time: Option<String>,
}

/// Status of a RivvenConsole resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RivvenConsoleStatus {
    /// Current phase of the console
    pub phase: ConsolePhase,

    /// Current observed generation
    pub observed_generation: i64,

    /// Conditions describing console state
    #[serde(default)]
    pub conditions: Vec<ConsoleCondition>,

    /// Last time the status was updated
    pub last_updated: Option<String>,
}

impl RivvenConsole {
    /// Namespace of the console, defaulting like the API server does
    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    /// Key of this console object
    pub fn object_key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace_or_default(), self.name_any())
    }

    /// Key of the referenced RivvenCluster
    pub fn cluster_key(&self) -> ObjectKey {
        self.spec.cluster_ref.object_key(&self.namespace_or_default())
    }

    /// Labels applied to every resource managed for this console
    pub fn get_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.get_selector_labels();
        labels.insert(
            "app.kubernetes.io/component".to_string(),
            "console".to_string(),
        );
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "rivven-console-operator".to_string(),
        );
        labels
    }

    /// Selector labels for the console workload
    pub fn get_selector_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/name".to_string(),
            "rivven-console".to_string(),
        );
        labels.insert("app.kubernetes.io/instance".to_string(), self.name_any());
        labels
    }
}

// ============================================================================
// RivvenCluster - read-only view
// ============================================================================

/// RivvenCluster custom resource, reduced to the fields the console reads
///
/// The cluster CRD is owned and reconciled by the main rivven operator; this
/// operator only fetches it to derive broker endpoints, SASL and schema
/// registry settings. Unknown fields are ignored on deserialization.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "rivven.hupe1980.github.io",
    version = "v1alpha1",
    kind = "RivvenCluster",
    plural = "rivvenclusters",
    namespaced,
    status = "RivvenClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct RivvenClusterSpec {
    /// Whether brokers require SASL authentication
    #[serde(default)]
    pub enable_sasl: bool,

    /// Broker listener configuration
    #[serde(default)]
    pub listeners: ListenersSpec,

    /// Schema registry configuration
    #[serde(default)]
    pub schema_registry: SchemaRegistrySpec,

    /// Admin API port on the cluster client service
    #[serde(default = "default_admin_port")]
    pub admin_port: i32,
}

/// Broker listeners exposed by the cluster
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListenersSpec {
    /// In-cluster listener; when present, broker addresses are derived from
    /// internal node hosts plus this listener's port
    #[serde(default)]
    pub internal: Option<InternalListenerSpec>,
}

/// In-cluster broker listener
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InternalListenerSpec {
    /// Broker port shared by all internal hosts
    #[serde(default = "default_kafka_port")]
    pub port: i32,
}

/// Schema registry exposed by the cluster
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRegistrySpec {
    /// Schema registry port
    #[serde(default = "default_schema_registry_port")]
    pub port: i32,

    /// TLS settings of the schema registry API
    #[serde(default)]
    pub tls: Option<SchemaRegistryTlsSpec>,
}

impl Default for SchemaRegistrySpec {
    fn default() -> Self {
        Self {
            port: default_schema_registry_port(),
            tls: None,
        }
    }
}

/// TLS settings of the cluster schema registry API
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRegistryTlsSpec {
    /// Whether the schema registry serves TLS
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Secret holding the per-node CA certificate (`ca.crt`)
    #[serde(default)]
    pub node_secret_ref: Option<SecretRef>,
}

fn default_admin_port() -> i32 {
    9644
}

fn default_kafka_port() -> i32 {
    9092
}

fn default_schema_registry_port() -> i32 {
    8081
}

/// Status of a RivvenCluster, reduced to the fields the console reads
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RivvenClusterStatus {
    /// Addresses of the cluster's broker nodes
    #[serde(default)]
    pub nodes: NodeEndpoints,
}

/// Broker node addresses reported by the cluster
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeEndpoints {
    /// In-cluster hostnames (no port; the internal listener port applies)
    #[serde(default)]
    pub internal: Vec<String>,

    /// External `host:port` addresses
    #[serde(default)]
    pub external: Vec<String>,
}

impl RivvenCluster {
    /// Namespace of the cluster, defaulting like the API server does
    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    /// The internal broker listener, when the cluster exposes one
    pub fn internal_listener(&self) -> Option<&InternalListenerSpec> {
        self.spec.listeners.internal.as_ref()
    }

    /// Whether the cluster reports any broker endpoints yet
    pub fn has_broker_endpoints(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| !s.nodes.internal.is_empty() || !s.nodes.external.is_empty())
    }

    /// Whether the schema registry API serves TLS
    pub fn is_schema_registry_tls_enabled(&self) -> bool {
        self.spec
            .schema_registry
            .tls
            .as_ref()
            .is_some_and(|t| t.enabled)
    }

    /// The per-node CA secret of the schema registry, if configured
    pub fn schema_registry_node_secret_ref(&self) -> Option<&SecretRef> {
        self.spec
            .schema_registry
            .tls
            .as_ref()
            .and_then(|t| t.node_secret_ref.as_ref())
    }

    /// In-cluster URL of the schema registry API
    pub fn schema_registry_url(&self) -> String {
        let scheme = if self.is_schema_registry_tls_enabled() {
            "https"
        } else {
            "http"
        };
        format!(
            "{}://rivven-{}-schema-registry.{}.svc.cluster.local:{}",
            scheme,
            self.name_any(),
            self.namespace_or_default(),
            self.spec.schema_registry.port
        )
    }

    /// In-cluster URL of the admin API
    pub fn admin_url(&self) -> String {
        format!(
            "http://rivven-{}.{}.svc.cluster.local:{}",
            self.name_any(),
            self.namespace_or_default(),
            self.spec.admin_port
        )
    }
}
