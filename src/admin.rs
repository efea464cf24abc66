//! Cluster admin API client
//!
//! The console authenticates against its cluster with a SCRAM credential and
//! a set of ACLs. Both live inside the cluster, not in the Kubernetes object
//! store, so the operator manages them through the cluster's admin HTTP API
//! and must tear them down explicitly on console deletion.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::crd::RivvenCluster;
use crate::error::{OperatorError, Result};

/// Default request timeout for admin API operations
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Security operations exposed by a cluster's admin API
///
/// All operations are idempotent: ensuring an existing user or ACL set
/// succeeds, deleting an absent one succeeds.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AdminApi: Send + Sync {
    /// Create the SCRAM user if it does not exist
    async fn ensure_user(&self, username: &str, password: &str, mechanism: &str) -> Result<()>;

    /// Delete the SCRAM user; a no-op if it does not exist
    async fn delete_user(&self, username: &str) -> Result<()>;

    /// Create the ACL entries for a principal if they do not exist
    async fn ensure_acls(&self, principal: &str) -> Result<()>;

    /// Delete all ACL entries for a principal; a no-op if none exist
    async fn delete_acls(&self, principal: &str) -> Result<()>;
}

/// Builds an [`AdminApi`] client for a referenced cluster
///
/// Reconciliation constructs everything per invocation, so the factory is
/// the only long-lived piece; it owns the shared HTTP connection pool.
pub trait AdminApiFactory: Send + Sync {
    /// Create a client for the given cluster's admin endpoint
    fn for_cluster(&self, cluster: &RivvenCluster) -> Arc<dyn AdminApi>;
}

/// [`AdminApiFactory`] producing HTTP clients
pub struct HttpAdminApiFactory {
    http: reqwest::Client,
}

impl HttpAdminApiFactory {
    /// Create a new factory with the default request timeout
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| OperatorError::AdminApi(e.to_string()))?;
        Ok(Self { http })
    }
}

impl AdminApiFactory for HttpAdminApiFactory {
    fn for_cluster(&self, cluster: &RivvenCluster) -> Arc<dyn AdminApi> {
        Arc::new(HttpAdminApi {
            base_url: cluster.admin_url(),
            http: self.http.clone(),
        })
    }
}

/// [`AdminApi`] implementation over the cluster admin HTTP endpoint
pub struct HttpAdminApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpAdminApi {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn admin_error(context: &str, err: reqwest::Error) -> OperatorError {
    OperatorError::AdminApi(format!("{context}: {err}"))
}

fn unexpected_status(context: &str, status: StatusCode) -> OperatorError {
    OperatorError::AdminApi(format!("{context}: HTTP {status}"))
}

#[async_trait]
impl AdminApi for HttpAdminApi {
    async fn ensure_user(&self, username: &str, password: &str, mechanism: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url("/v1/security/users"))
            .json(&json!({
                "username": username,
                "password": password,
                "mechanism": mechanism,
            }))
            .send()
            .await
            .map_err(|e| admin_error("creating user", e))?;

        match response.status() {
            status if status.is_success() => {
                info!(user = %username, "Created SCRAM user");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(user = %username, "SCRAM user already exists");
                Ok(())
            }
            status => Err(unexpected_status("creating user", status)),
        }
    }

    async fn delete_user(&self, username: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/v1/security/users/{username}")))
            .send()
            .await
            .map_err(|e| admin_error("deleting user", e))?;

        match response.status() {
            status if status.is_success() => {
                info!(user = %username, "Deleted SCRAM user");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                debug!(user = %username, "SCRAM user already gone");
                Ok(())
            }
            status => Err(unexpected_status("deleting user", status)),
        }
    }

    async fn ensure_acls(&self, principal: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url("/v1/security/acls"))
            .json(&json!({
                "principal": principal,
                "host": "*",
                "operations": ["describe", "read"],
            }))
            .send()
            .await
            .map_err(|e| admin_error("creating ACLs", e))?;

        match response.status() {
            status if status.is_success() => {
                info!(principal = %principal, "Created ACL entries");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(principal = %principal, "ACL entries already exist");
                Ok(())
            }
            status => Err(unexpected_status("creating ACLs", status)),
        }
    }

    async fn delete_acls(&self, principal: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url("/v1/security/acls"))
            .query(&[("principal", principal)])
            .send()
            .await
            .map_err(|e| admin_error("deleting ACLs", e))?;

        match response.status() {
            status if status.is_success() => {
                info!(principal = %principal, "Deleted ACL entries");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                debug!(principal = %principal, "ACL entries already gone");
                Ok(())
            }
            status => Err(unexpected_status("deleting ACLs", status)),
        }
    }
}
