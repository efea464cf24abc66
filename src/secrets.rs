//! Secret field resolution
//!
//! Config assembly is a pure function, so every secret it needs is resolved
//! up front here. A missing secret is a typed [`OperatorError::NotFound`] and
//! a present secret with a missing field is a typed
//! [`OperatorError::MissingSecretField`]; neither is retried blindly.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;

use crate::config::ConnectClusterAuth;
use crate::crd::{ObjectKey, RivvenConsole};
use crate::error::{OperatorError, Result};
use crate::store::Store;

/// Extract a single field from a secret's data, decoded as UTF-8
pub fn secret_field(secret: &Secret, key: &ObjectKey, field: &str) -> Result<String> {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(field))
        .ok_or_else(|| OperatorError::MissingSecretField {
            secret: key.to_string(),
            field: field.to_string(),
        })?;
    String::from_utf8(bytes.0.clone()).map_err(|_| {
        OperatorError::InvalidConfig(format!("secret {key} field '{field}' is not valid UTF-8"))
    })
}

/// Fetch a secret and extract the given fields
///
/// The secret itself must exist; every requested field must be present.
pub async fn resolve_secret_fields(
    store: &dyn Store,
    key: &ObjectKey,
    fields: &[&str],
) -> Result<BTreeMap<String, String>> {
    let secret = store
        .get_secret(key)
        .await?
        .ok_or_else(|| OperatorError::NotFound {
            kind: "Secret".to_string(),
            name: key.name.clone(),
            namespace: key.namespace.clone(),
        })?;

    let mut resolved = BTreeMap::new();
    for field in fields {
        resolved.insert(field.to_string(), secret_field(&secret, key, field)?);
    }
    Ok(resolved)
}

/// Resolve authentication material for every configured connect cluster
///
/// Returns a map keyed by connect cluster name. Clusters without auth
/// references get no entry.
pub async fn resolve_connect_auth(
    store: &dyn Store,
    console: &RivvenConsole,
) -> Result<BTreeMap<String, ConnectClusterAuth>> {
    let namespace = console.namespace_or_default();
    let mut auth = BTreeMap::new();

    for cluster in &console.spec.connect.clusters {
        let mut resolved = ConnectClusterAuth::default();

        // Each reference is resolved independently; a cluster may carry both.
        if let Some(basic_auth_ref) = &cluster.basic_auth_ref {
            let key = basic_auth_ref.object_key(&namespace);
            let fields = resolve_secret_fields(store, &key, &["username", "password"]).await?;
            resolved.username = fields.get("username").cloned();
            resolved.password = fields.get("password").cloned();
        }
        if let Some(token_ref) = &cluster.token_ref {
            let key = token_ref.object_key(&namespace);
            let fields = resolve_secret_fields(store, &key, &["token"]).await?;
            resolved.token = fields.get("token").cloned();
        }

        if cluster.basic_auth_ref.is_some() || cluster.token_ref.is_some() {
            auth.insert(cluster.name.clone(), resolved);
        }
    }

    Ok(auth)
}
