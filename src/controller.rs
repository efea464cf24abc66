//! RivvenConsole controller
//!
//! Watches RivvenConsole resources and drives each toward its declared
//! state. Every invocation classifies the console as reconciling or
//! deleting, then runs the ordered resource applier or the external-state
//! cleanup. All Kubernetes traffic goes through the [`Store`] seam so the
//! dispatch logic is testable without an API server.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::Api;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

use crate::admin::{AdminApiFactory, HttpAdminApiFactory};
use crate::config::ConfigPaths;
use crate::crd::{
    ConsoleCondition, ConsolePhase, ObjectKey, RivvenCluster, RivvenConsole, RivvenConsoleStatus,
};
use crate::error::{OperatorError, Result};
use crate::resources::{
    ConsoleAcl, ConsoleConfigMap, ConsoleDeployment, ConsoleResource, ConsoleService, ConsoleUser,
    ExternalResource, apply_all, cleanup_all,
};
use crate::store::{KubeStore, Store};

/// Finalizer guarding external-state cleanup
pub const CONSOLE_FINALIZER: &str = "rivven.hupe1980.github.io/console-finalizer";

/// Requeue interval after a successful reconciliation
const DEFAULT_REQUEUE_SECONDS: u64 = 300;

/// Requeue interval for error cases (base for exponential backoff)
const ERROR_REQUEUE_SECONDS: u64 = 30;

/// Maximum requeue delay for error backoff
const MAX_ERROR_REQUEUE_SECONDS: u64 = 600;

/// Context passed to the controller
pub struct ControllerContext {
    /// Object store access
    pub store: Arc<dyn Store>,
    /// Admin API client factory
    pub admin: Arc<dyn AdminApiFactory>,
    /// Filesystem layout of the generated configuration
    pub paths: ConfigPaths,
    /// Metrics recorder (optional)
    pub metrics: Option<ControllerMetrics>,
    /// Per-console error retry counts for exponential backoff
    pub error_counts: dashmap::DashMap<String, u32>,
}

/// Metrics for the controller
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for reconciliation errors
    pub errors: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl ControllerMetrics {
    /// Create new controller metrics
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("rivven_console_reconciliations_total"),
            errors: metrics::counter!("rivven_console_reconciliation_errors_total"),
            duration: metrics::histogram!("rivven_console_reconciliation_duration_seconds"),
        }
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a console, decided once per reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleState {
    /// The console exists and should be driven toward its spec
    Reconciling,
    /// The console carries a deletion timestamp; external state is torn down
    Deleting,
}

impl ConsoleState {
    fn of(console: &RivvenConsole) -> Self {
        if console.metadata.deletion_timestamp.is_some() {
            ConsoleState::Deleting
        } else {
            ConsoleState::Reconciling
        }
    }
}

/// Start the RivvenConsole controller
pub async fn run_controller(
    client: Client,
    namespace: Option<String>,
    paths: ConfigPaths,
) -> Result<()> {
    let consoles: Api<RivvenConsole> = match &namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let admin = Arc::new(HttpAdminApiFactory::new()?);
    let ctx = Arc::new(ControllerContext {
        store: Arc::new(KubeStore::new(client.clone())),
        admin,
        paths,
        metrics: Some(ControllerMetrics::new()),
        error_counts: dashmap::DashMap::new(),
    });

    info!(
        namespace = namespace.as_deref().unwrap_or("all"),
        "Starting RivvenConsole controller"
    );

    let secrets = match &namespace {
        Some(ns) => Api::<Secret>::namespaced(client.clone(), ns),
        None => Api::<Secret>::all(client.clone()),
    };
    let config_maps = match &namespace {
        Some(ns) => Api::<ConfigMap>::namespaced(client.clone(), ns),
        None => Api::<ConfigMap>::all(client.clone()),
    };
    let deployments = match &namespace {
        Some(ns) => Api::<Deployment>::namespaced(client.clone(), ns),
        None => Api::<Deployment>::all(client.clone()),
    };
    let services = match &namespace {
        Some(ns) => Api::<Service>::namespaced(client.clone(), ns),
        None => Api::<Service>::all(client.clone()),
    };

    Controller::new(consoles, Config::default())
        .owns(secrets, Config::default())
        .owns(config_maps, Config::default())
        .owns(deployments, Config::default())
        .owns(services, Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(
                        name = obj.name,
                        namespace = obj.namespace,
                        ?action,
                        "Reconciliation completed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation failed");
                }
            }
        })
        .await;

    Ok(())
}

/// Main reconciliation function
#[instrument(skip(console, ctx), fields(name = %console.name_any(), namespace = console.namespace()))]
async fn reconcile(console: Arc<RivvenConsole>, ctx: Arc<ControllerContext>) -> Result<Action> {
    let start = std::time::Instant::now();

    if let Some(ref metrics) = ctx.metrics {
        metrics.reconciliations.increment(1);
    }

    let key = console.object_key();
    let result = reconcile_console(&key, &ctx).await;

    if let Some(ref metrics) = ctx.metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
    }

    // Reset error backoff counter on success
    match &result {
        Ok(_) => {
            ctx.error_counts.remove(&key.to_string());
        }
        Err(_) => {
            if let Some(ref metrics) = ctx.metrics {
                metrics.errors.increment(1);
            }
        }
    }

    result
}

/// Reconcile one console identified by key
///
/// The console is re-fetched so the decision is made against the freshest
/// observed state, not the watch event that queued it.
pub(crate) async fn reconcile_console(
    key: &ObjectKey,
    ctx: &Arc<ControllerContext>,
) -> Result<Action> {
    let Some(console) = ctx.store.get_console(key).await? else {
        // Deleted between the watch event and now; owned resources are
        // garbage collected via owner references.
        debug!(console = %key, "Console no longer exists, nothing to do");
        return Ok(Action::await_change());
    };
    let console = Arc::new(console);

    match ConsoleState::of(&console) {
        ConsoleState::Deleting => delete_console(key, console, ctx).await,
        ConsoleState::Reconciling => apply_console(key, console, ctx).await,
    }
}

async fn apply_console(
    key: &ObjectKey,
    console: Arc<RivvenConsole>,
    ctx: &Arc<ControllerContext>,
) -> Result<Action> {
    validate_console(&console)?;

    let cluster_key = console.cluster_key();
    let cluster = ctx.store.get_cluster(&cluster_key).await?.ok_or_else(|| {
        OperatorError::NotFound {
            kind: "RivvenCluster".to_string(),
            name: cluster_key.name.clone(),
            namespace: cluster_key.namespace.clone(),
        }
    })?;
    let cluster = Arc::new(cluster);

    // The finalizer must be in place before any external state is created.
    if !console.finalizers().iter().any(|f| f == CONSOLE_FINALIZER) {
        ctx.store.add_finalizer(key, CONSOLE_FINALIZER).await?;
        debug!(console = %key, "Added finalizer");
    }

    let admin = ctx.admin.for_cluster(&cluster);
    let resources: Vec<Box<dyn ConsoleResource>> = vec![
        Box::new(ConsoleUser {
            store: ctx.store.clone(),
            admin: admin.clone(),
            console: console.clone(),
            cluster: cluster.clone(),
        }),
        Box::new(ConsoleAcl {
            admin,
            console: console.clone(),
        }),
        Box::new(ConsoleConfigMap {
            store: ctx.store.clone(),
            console: console.clone(),
            cluster: cluster.clone(),
            paths: ctx.paths.clone(),
        }),
        Box::new(ConsoleDeployment {
            store: ctx.store.clone(),
            console: console.clone(),
            cluster,
            paths: ctx.paths.clone(),
        }),
        Box::new(ConsoleService {
            store: ctx.store.clone(),
            console: console.clone(),
        }),
    ];

    match apply_all(&resources).await? {
        Some(delay) => {
            update_status(ctx, key, &console, ConsolePhase::Provisioning).await?;
            Ok(Action::requeue(delay))
        }
        None => {
            update_status(ctx, key, &console, ConsolePhase::Running).await?;
            Ok(Action::requeue(Duration::from_secs(DEFAULT_REQUEUE_SECONDS)))
        }
    }
}

async fn delete_console(
    key: &ObjectKey,
    console: Arc<RivvenConsole>,
    ctx: &Arc<ControllerContext>,
) -> Result<Action> {
    info!(console = %key, "Console marked for deletion, cleaning up external state");

    let cluster_key = console.cluster_key();
    if let Some(cluster) = ctx.store.get_cluster(&cluster_key).await? {
        let admin = ctx.admin.for_cluster(&cluster);
        let external: Vec<Box<dyn ExternalResource>> = vec![
            Box::new(ConsoleUser {
                store: ctx.store.clone(),
                admin: admin.clone(),
                console: console.clone(),
                cluster: Arc::new(cluster),
            }),
            Box::new(ConsoleAcl {
                admin,
                console: console.clone(),
            }),
        ];
        cleanup_all(&external).await?;
    } else {
        // The cluster is gone; its internal state went with it.
        warn!(console = %key, cluster = %cluster_key, "Referenced cluster gone, skipping external cleanup");
    }

    ctx.store.remove_finalizer(key, CONSOLE_FINALIZER).await?;
    info!(console = %key, "Console cleanup complete");
    Ok(Action::await_change())
}

fn validate_console(console: &RivvenConsole) -> Result<()> {
    if let Err(errors) = console.spec.validate() {
        let error_messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter()
                    .map(move |e| format!("{}: {:?}", field, e.message))
            })
            .collect();
        let error_msg = error_messages.join("; ");
        warn!(console = %console.object_key(), errors = %error_msg, "Console spec validation failed");
        return Err(OperatorError::InvalidConfig(error_msg));
    }
    Ok(())
}

async fn update_status(
    ctx: &Arc<ControllerContext>,
    key: &ObjectKey,
    console: &RivvenConsole,
    phase: ConsolePhase,
) -> Result<()> {
    let ready = phase == ConsolePhase::Running;
    let status = RivvenConsoleStatus {
        phase,
        observed_generation: console.metadata.generation.unwrap_or(0),
        conditions: vec![ConsoleCondition {
            condition_type: "Ready".to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
            reason: Some(if ready {
                "Reconciled".to_string()
            } else {
                "Provisioning".to_string()
            }),
            message: None,
            last_transition_time: Some(Utc::now().to_rfc3339()),
        }],
        last_updated: Some(Utc::now().to_rfc3339()),
    };
    ctx.store.update_console_status(key, &status).await
}

/// Error policy for the controller — exponential backoff.
fn error_policy(
    console: Arc<RivvenConsole>,
    error: &OperatorError,
    ctx: Arc<ControllerContext>,
) -> Action {
    let key = console.object_key().to_string();
    let retries = {
        let mut entry = ctx.error_counts.entry(key.clone()).or_insert(0);
        *entry += 1;
        *entry
    };

    // Use the error's suggested delay OR exponential backoff:
    // 30s → 60s → 120s → 240s → 480s → 600s (capped)
    let delay = error.requeue_delay().unwrap_or_else(|| {
        let base = Duration::from_secs(ERROR_REQUEUE_SECONDS);
        let backoff = base * 2u32.saturating_pow((retries - 1).min(5));
        backoff.min(Duration::from_secs(MAX_ERROR_REQUEUE_SECONDS))
    });

    warn!(
        error = %error,
        retry = retries,
        delay_secs = delay.as_secs(),
        "Reconciliation error for '{}', will retry",
        key
    );

    Action::requeue(delay)
}
