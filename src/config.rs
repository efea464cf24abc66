//! Console configuration assembly
//!
//! Builds the console's `config.yaml` from a console spec and the referenced
//! cluster. [`generate_config`] is a pure function: every secret it needs is
//! resolved by the caller first, so the same inputs always render the same
//! document and the ConfigMap diff in reconciliation stays meaningful.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crd::{RivvenCluster, RivvenConsole};
use crate::error::Result;

/// Key of the rendered document inside the console ConfigMap
pub const CONFIG_MAP_KEY: &str = "config.yaml";

/// SASL mechanism the console credential is created with
pub const SASL_MECHANISM_SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Filesystem locations the rendered config refers to
///
/// These are operator-level settings, not per-console: the CA preference and
/// mount directories are fixed when the operator starts and every generated
/// config uses the same layout as the Deployment's volume mounts.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    /// Trust the container image's CA bundle instead of mounted per-node CAs
    pub prefer_public_ca: bool,

    /// CA bundle shipped in the console image
    pub public_ca_path: String,

    /// Mount directory of the schema registry node certificate secret
    pub schema_registry_tls_dir: String,

    /// Base mount directory for per-connect-cluster TLS secrets
    pub connect_tls_dir: String,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self {
            prefer_public_ca: true,
            public_ca_path: "/etc/ssl/certs/ca-certificates.crt".to_string(),
            schema_registry_tls_dir: "/rivven/schema-registry".to_string(),
            connect_tls_dir: "/rivven/connect".to_string(),
        }
    }
}

impl ConfigPaths {
    /// CA path for the schema registry connection
    ///
    /// The mounted per-node CA is used only when the cluster provides a node
    /// secret and the operator is not told to prefer the public bundle.
    pub fn schema_registry_ca_path(&self, has_node_secret: bool) -> String {
        if self.prefer_public_ca || !has_node_secret {
            self.public_ca_path.clone()
        } else {
            format!("{}/ca.crt", self.schema_registry_tls_dir)
        }
    }

    /// Client certificate path inside the schema registry TLS mount
    pub fn schema_registry_cert_path(&self) -> String {
        format!("{}/tls.crt", self.schema_registry_tls_dir)
    }

    /// Client key path inside the schema registry TLS mount
    pub fn schema_registry_key_path(&self) -> String {
        format!("{}/tls.key", self.schema_registry_tls_dir)
    }

    /// Mount directory of one connect cluster's TLS secret
    pub fn connect_cluster_dir(&self, cluster_name: &str) -> String {
        format!("{}/{}", self.connect_tls_dir, cluster_name)
    }

    /// CA path inside a connect cluster's TLS mount
    pub fn connect_ca_path(&self, cluster_name: &str) -> String {
        format!("{}/ca.crt", self.connect_cluster_dir(cluster_name))
    }

    /// Client certificate path inside a connect cluster's TLS mount
    pub fn connect_cert_path(&self, cluster_name: &str) -> String {
        format!("{}/tls.crt", self.connect_cluster_dir(cluster_name))
    }

    /// Client key path inside a connect cluster's TLS mount
    pub fn connect_key_path(&self, cluster_name: &str) -> String {
        format!("{}/tls.key", self.connect_cluster_dir(cluster_name))
    }
}

/// SCRAM credential resolved from the console's user secret
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub username: String,
    pub password: String,
}

/// Authentication material resolved for one connect cluster
#[derive(Debug, Clone, Default)]
pub struct ConnectClusterAuth {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

// ----------------------------------------------------------------------------
// Rendered configuration model
// ----------------------------------------------------------------------------

/// Root of the console's `config.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleConfig {
    pub server: ServerConfig,
    pub kafka: KafkaConfig,
    pub connect: ConnectConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub listen_port: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub client_id: String,
    pub schema: SchemaConfig,
    pub sasl: SaslConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaConfig {
    pub enabled: bool,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub tls: SchemaTlsConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaTlsConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ca_filepath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cert_filepath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key_filepath: Option<String>,
}

/// SASL section of the kafka config
///
/// Always serialized, even with SASL off, so the document shape does not
/// depend on cluster settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaslConfig {
    pub enabled: bool,
    pub username: String,
    pub password: String,
    pub mechanism: String,
}

impl Default for SaslConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            username: String::new(),
            password: String::new(),
            mechanism: SASL_MECHANISM_SCRAM_SHA_256.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectConfig {
    pub enabled: bool,
    #[serde(default)]
    pub clusters: Vec<ConnectClusterConfig>,
    pub connect_timeout: u64,
    pub read_timeout: u64,
    pub request_timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectClusterConfig {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token: Option<String>,
    #[serde(default)]
    pub tls: ConnectTlsConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTlsConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ca_filepath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cert_filepath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key_filepath: Option<String>,
    pub insecure_skip_verify: bool,
}

// ----------------------------------------------------------------------------
// Assembly
// ----------------------------------------------------------------------------

/// Kafka client id the console identifies itself with
pub fn client_id(console: &RivvenConsole) -> String {
    format!(
        "rivven-console-{}-{}",
        console.namespace_or_default(),
        console.object_key().name
    )
}

/// Derive broker addresses from the cluster's reported node endpoints
///
/// When the cluster exposes an internal listener, each internal host is
/// combined with the listener port, preserving the reported order; external
/// addresses are never mixed in. Without an internal listener, external
/// addresses are used verbatim (they already carry ports).
pub fn derive_brokers(cluster: &RivvenCluster) -> Vec<String> {
    let Some(status) = cluster.status.as_ref() else {
        return vec![];
    };

    match cluster.internal_listener() {
        Some(listener) => status
            .nodes
            .internal
            .iter()
            .map(|host| format!("{}:{}", host, listener.port))
            .collect(),
        None => status.nodes.external.clone(),
    }
}

/// Build the console configuration from pre-resolved inputs
pub fn generate_config(
    paths: &ConfigPaths,
    console: &RivvenConsole,
    cluster: &RivvenCluster,
    sasl: Option<&ResolvedCredentials>,
    connect_auth: &BTreeMap<String, ConnectClusterAuth>,
) -> ConsoleConfig {
    let mut sasl_config = SaslConfig::default();
    if cluster.spec.enable_sasl {
        if let Some(creds) = sasl {
            sasl_config.enabled = true;
            sasl_config.username = creds.username.clone();
            sasl_config.password = creds.password.clone();
        }
    }

    let schema_tls_enabled = cluster.is_schema_registry_tls_enabled();
    let schema = SchemaConfig {
        enabled: console.spec.schema.enabled,
        urls: if console.spec.schema.enabled {
            vec![cluster.schema_registry_url()]
        } else {
            vec![]
        },
        tls: SchemaTlsConfig {
            enabled: schema_tls_enabled,
            ca_filepath: schema_tls_enabled.then(|| {
                paths.schema_registry_ca_path(cluster.schema_registry_node_secret_ref().is_some())
            }),
            cert_filepath: schema_tls_enabled.then(|| paths.schema_registry_cert_path()),
            key_filepath: schema_tls_enabled.then(|| paths.schema_registry_key_path()),
        },
    };

    let connect_spec = &console.spec.connect;
    let clusters = connect_spec
        .clusters
        .iter()
        .map(|cc| {
            let auth = connect_auth.get(&cc.name);
            let tls = match &cc.tls {
                Some(tls_spec) => ConnectTlsConfig {
                    enabled: tls_spec.enabled,
                    ca_filepath: tls_spec
                        .secret_ref
                        .as_ref()
                        .map(|_| paths.connect_ca_path(&cc.name)),
                    cert_filepath: tls_spec
                        .secret_ref
                        .as_ref()
                        .map(|_| paths.connect_cert_path(&cc.name)),
                    key_filepath: tls_spec
                        .secret_ref
                        .as_ref()
                        .map(|_| paths.connect_key_path(&cc.name)),
                    insecure_skip_verify: tls_spec.insecure_skip_tls_verify,
                },
                None => ConnectTlsConfig::default(),
            };
            ConnectClusterConfig {
                name: cc.name.clone(),
                url: cc.url.clone(),
                username: auth.and_then(|a| a.username.clone()),
                password: auth.and_then(|a| a.password.clone()),
                token: auth.and_then(|a| a.token.clone()),
                tls,
            }
        })
        .collect();

    ConsoleConfig {
        server: ServerConfig {
            listen_port: console.spec.server.listen_port,
        },
        kafka: KafkaConfig {
            brokers: derive_brokers(cluster),
            client_id: client_id(console),
            schema,
            sasl: sasl_config,
        },
        connect: ConnectConfig {
            enabled: connect_spec.enabled,
            clusters,
            connect_timeout: connect_spec.connect_timeout_seconds,
            read_timeout: connect_spec.read_timeout_seconds,
            request_timeout: connect_spec.request_timeout_seconds,
        },
    }
}

/// Render the configuration as YAML
pub fn render_yaml(config: &ConsoleConfig) -> Result<String> {
    Ok(serde_yaml::to_string(config)?)
}
