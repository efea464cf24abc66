//! # Rivven Console Operator
//!
//! Kubernetes operator for deploying and managing the Rivven web console
//! alongside a RivvenCluster.
//!
//! This crate watches `RivvenConsole` custom resources and keeps each
//! console's Kubernetes objects and in-cluster security state aligned with
//! the declared spec.
//!
//! ## Features
//!
//! - **Custom Resource Definition**: `RivvenConsole` CRD for declarative
//!   console management
//! - **Automated Reconciliation**: Continuous state management with eventual
//!   consistency
//! - **Cluster Credentials**: SCRAM user and ACLs created in the referenced
//!   cluster and removed again on console deletion
//! - **Configuration Management**: The console's `config.yaml` is derived
//!   from the cluster's listeners, SASL and schema registry settings
//! - **Workload Management**: Deployment and ClusterIP Service with
//!   config and TLS secret mounts
//! - **Observability**: Prometheus-compatible operator metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_console_operator::prelude::*;
//! use kube::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::try_default().await?;
//!     run_controller(client, None, ConfigPaths::default()).await
//! }
//! ```
//!
//! ## Architecture
//!
//! The operator follows the standard Kubernetes controller pattern:
//!
//! 1. **Watch**: Monitor RivvenConsole resources and the objects they own
//! 2. **Reconcile**: Compare desired state (CRD spec) with actual state
//! 3. **Act**: Apply the console's resources in dependency order — SCRAM
//!    user, ACLs, ConfigMap, Deployment, Service
//! 4. **Status**: Update the RivvenConsole status with the current phase
//!
//! Kubernetes objects carry owner references and are garbage collected with
//! the console. The SCRAM user and ACLs live inside the cluster and are
//! cleaned up explicitly behind a finalizer.
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types with validation
//! - [`controller`] - RivvenConsole reconciliation logic and controller setup
//! - [`resources`] - Console resources and the ordered applier
//! - [`config`] - Console configuration assembly
//! - [`secrets`] - Secret field resolution
//! - [`admin`] - Cluster admin API client
//! - [`store`] - Kubernetes object store access
//! - [`error`] - Error types for operator operations
//!
//! ## Metrics
//!
//! The operator exposes Prometheus metrics:
//!
//! - `rivven_console_reconciliations_total` - Total reconciliation attempts
//! - `rivven_console_reconciliation_errors_total` - Reconciliation errors
//! - `rivven_console_reconciliation_duration_seconds` - Reconciliation latency

pub mod admin;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod resources;
pub mod secrets;
pub mod store;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::admin::{AdminApi, AdminApiFactory, HttpAdminApi, HttpAdminApiFactory};
    pub use crate::config::{ConfigPaths, ConsoleConfig, generate_config, render_yaml};
    pub use crate::controller::{
        CONSOLE_FINALIZER, ControllerContext, ControllerMetrics, run_controller,
    };
    pub use crate::crd::{
        ClusterReference, ConnectClusterSpec, ConsoleCondition, ConsolePhase, ObjectKey,
        RivvenCluster, RivvenClusterSpec, RivvenClusterStatus, RivvenConsole, RivvenConsoleSpec,
        RivvenConsoleStatus, SecretRef,
    };
    pub use crate::error::{OperatorError, Result};
    pub use crate::resources::{ConsoleResource, EnsureOutcome, ExternalResource};
    pub use crate::store::{KubeStore, Store};
}
