use crate::error::Error;
use crate::metrics::Metrics;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::runtime::events::Reporter;
use kube::runtime::reflector::Store;
use kube::{client::Client, runtime::controller::Action};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Duration;

/// Identifies which of the three controllers (or the cluster-status
/// collector) produced a given log line or metric sample.
pub type ControllerId = &'static str;

/// Process-wide knobs set from CLI flags/environment at startup, read by the
/// reconcilers through [`Context::config`] rather than as hardcoded
/// constants.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Local directory (or the root of a shared PVC mount) resolved jars are
    /// cached under, keyed by `(namespace, topology)`.
    pub jar_cache_dir: PathBuf,
    /// Deadline applied to every non-submission Nimbus REST call
    /// (`GetClusterInfo`, `GetTopology`, `KillTopology`, activate/deactivate).
    pub nimbus_timeout: Duration,
    /// Restricts every controller's watch/list to a single namespace.
    /// `None` watches cluster-wide.
    pub namespace: Option<String>,
    /// Debounce applied to every controller's watch stream before a
    /// reconcile is dispatched.
    pub reconcile_debounce: Duration,
    /// Upper bound on a topology's declared `extractionTimeoutSeconds`; the
    /// smaller of the two is always used.
    pub extraction_timeout_ceiling: Duration,
    /// Wall-clock ceiling wrapped around an entire top-level reconcile call.
    /// A reconcile that blows through this is treated as a transient error
    /// and requeued rather than left to hang indefinitely.
    pub reconcile_timeout: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            jar_cache_dir: PathBuf::from("/var/lib/storm-operator/jar-cache"),
            nimbus_timeout: Duration::from_secs(15),
            namespace: None,
            reconcile_debounce: Duration::from_millis(500),
            extraction_timeout_ceiling: Duration::from_secs(600),
            reconcile_timeout: Duration::from_secs(120),
        }
    }
}

/// Context injected into every `reconcile`/`error_policy` invocation.
///
/// Generic over `K`, the child resource kind a controller reflects and
/// watches to trigger out-of-band reconciles (a `Deployment` for the
/// worker-pool controller, a `StatefulSet` for the cluster controller, the
/// unit type `()` for controllers with nothing to watch).
#[derive(Clone)]
pub struct Context<K> {
    /// Kubernetes client, shared across all reconciler tasks.
    pub client: Client,
    /// Prometheus metrics, shared across all controllers.
    pub metrics: Arc<Metrics>,
    /// Diagnostics read by the web server's `/readyz` and debug endpoints.
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Read-only shared view of the reflected child-resource store, used by
    /// reconcilers to check existing state without an extra API round-trip.
    pub store: Store<K>,
    /// Process-wide configuration set from CLI flags at startup.
    pub config: Arc<OperatorConfig>,
    controller_id: ControllerId,
}

impl<K> Context<K>
where
    K: kube::Resource + Clone + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    pub fn controller_id(&self) -> ControllerId {
        self.controller_id
    }
}

/// Scopes an `Api<K>` to `namespace`, or watches cluster-wide when `None`,
/// so every controller honors `OperatorConfig::namespace` the same way.
pub fn scoped<K>(client: Client, namespace: Option<&str>) -> kube::Api<K>
where
    K: kube::Resource,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => kube::Api::namespaced(client, ns),
        None => kube::Api::all(client),
    }
}

/// The default error policy shared by all three controllers: log, record
/// the failure against the reconciliation-errors metric, and requeue with a
/// fixed backoff. Individual controllers wrap this when they need
/// transient/permanent error branching (see `error::Error::is_transient`).
pub fn error_policy<K: kube::ResourceExt>(
    kind: &'static str,
    obj: &Arc<K>,
    error: &Error,
    metrics: &Metrics,
) -> Action {
    tracing::warn!(msg = "reconcile failed", %kind, instance = %obj.name_any(), %error);
    metrics.reconcile_failure_set(kind, obj, error);
    if error.is_transient() {
        Action::requeue(Duration::from_secs(15))
    } else {
        Action::requeue(Duration::from_secs(5 * 60))
    }
}

/// Diagnostics surfaced by the debug/readiness web server.
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "storm-operator".into(),
        }
    }
}

impl Diagnostics {
    pub fn with_reporter(reporter: &'static str) -> Self {
        Self {
            reporter: reporter.into(),
            ..Self::default()
        }
    }

    pub fn touch(&mut self) {
        self.last_event = Utc::now();
    }
}

/// State shared between the controllers and the web server.
#[derive(Clone, Default)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: Arc<Metrics>,
    config: Arc<OperatorConfig>,
}

impl State {
    pub fn new(config: OperatorConfig) -> Self {
        Self {
            config: Arc::new(config),
            ..Self::default()
        }
    }

    /// Builds `State` around metrics whose registry already carries
    /// metrics registered before startup, such as the apiserver HTTP
    /// client layer.
    pub fn with_metrics(config: OperatorConfig, metrics: Metrics) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(metrics),
            ..Self::default()
        }
    }

    pub fn config(&self) -> Arc<OperatorConfig> {
        self.config.clone()
    }

    pub fn metrics_text(&self) -> String {
        let mut buffer = String::new();
        let registry = &*self.metrics.registry;
        prometheus_client::encoding::text::encode(&mut buffer, registry).unwrap();
        buffer
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn to_context<K>(
        &self,
        client: Client,
        controller_id: ControllerId,
        store: Store<K>,
    ) -> Arc<Context<K>> {
        Arc::new(Context {
            client,
            metrics: self.metrics.clone(),
            diagnostics: self.diagnostics.clone(),
            store,
            config: self.config.clone(),
            controller_id,
        })
    }
}
