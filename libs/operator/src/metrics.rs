use crate::error::Error;

use kube::ResourceExt;
use opentelemetry::trace::TraceId;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::{
    counter::Counter, exemplar::HistogramWithExemplars, family::Family, gauge::Gauge,
    histogram::Histogram,
};
use prometheus_client::registry::{Registry, Unit};
use std::sync::Arc;
use tokio::time::Instant;

/// Top-level metrics handle, shared by all three controllers and the
/// standalone cluster-status collector, and exposed to the web server via
/// [`Metrics::registry`].
#[derive(Clone)]
pub struct Metrics {
    pub reconcile: ReconcileMetrics,
    pub storm: StormMetrics,
    pub watch: WatchMetrics,
    /// Per-call instrumentation for every `StormApiClient` the reconcilers
    /// construct, registered once and shared rather than per-cluster so
    /// `storm_api_requests_total` aggregates across every `StormCluster`.
    pub api: Arc<storm_client::metrics::ApiMetrics>,
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Registers every controller/domain metric into a caller-supplied
    /// registry. Used when the registry already carries metrics registered
    /// before the `Metrics` struct exists, such as the apiserver HTTP client
    /// layer, so both end up in the same `/metrics` payload.
    pub fn new(mut registry: Registry) -> Self {
        let reconcile = ReconcileMetrics::default().register(&mut registry);
        let storm = StormMetrics::default().register(&mut registry);
        let watch = WatchMetrics::default().register(&mut registry);
        let api = Arc::new(storm_client::metrics::ApiMetrics::register(&mut registry));
        Self {
            registry: Arc::new(registry),
            reconcile,
            storm,
            watch,
            api,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(Registry::with_prefix("storm"))
    }
}

impl Metrics {
    /// Records an event from a watched child resource (Deployment,
    /// StatefulSet, ...) that the controller uses to trigger out-of-band
    /// reconciles.
    pub fn triggered_inc(&self, action: Action, kind: &'static str) {
        self.watch
            .triggered
            .get_or_create(&WatchLabels {
                kind,
                action: action.as_str(),
            })
            .inc();
    }

    pub fn watch_operations_failed_inc(&self) {
        self.watch.operations_failed.get_or_create(&()).inc();
    }

    pub fn ready_set(&self, value: i64) {
        self.watch.ready.set(value);
    }

    pub fn reconcile_failure_set<K: ResourceExt>(&self, kind: &'static str, obj: &Arc<K>, e: &Error) {
        self.reconcile.set_failure(kind, obj, e);
    }
}

/// The kind of watch event that triggered an out-of-band reconcile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Apply,
    Delete,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Apply => "apply",
            Action::Delete => "delete",
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WatchLabels {
    pub kind: &'static str,
    pub action: &'static str,
}

/// Metrics describing the reflector-backed watches the controllers keep on
/// their owned child resources, independent of the reconcile loop itself.
#[derive(Clone, Default)]
pub struct WatchMetrics {
    pub triggered: Family<WatchLabels, Counter>,
    pub operations_failed: Family<(), Counter>,
    pub ready: Gauge,
}

impl WatchMetrics {
    pub fn register(self, r: &mut Registry) -> Self {
        r.register(
            "watch_triggered",
            "reconciles triggered by a watched child-resource event",
            self.triggered.clone(),
        );
        r.register(
            "watch_operations_failed",
            "errors observed on a child-resource watch stream",
            self.operations_failed.clone(),
        );
        r.register(
            "ready",
            "1 once the controller has finished its startup sequence",
            self.ready.clone(),
        );
        self
    }
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug, Default)]
pub struct TraceLabel {
    pub id: String,
}
impl TryFrom<&TraceId> for TraceLabel {
    type Error = Error;

    fn try_from(id: &TraceId) -> Result<TraceLabel, Self::Error> {
        if std::matches!(id, &TraceId::INVALID) {
            Err(Error::InvalidTraceId)
        } else {
            let trace_id = id.to_string();
            Ok(Self { id: trace_id })
        }
    }
}

/// Reconciliation-loop metrics, generic over any of the three CRD kinds.
/// Backs `storm_controller_reconciliation_duration_seconds` and
/// `storm_controller_reconciliation_errors_total`.
#[derive(Clone)]
pub struct ReconcileMetrics {
    pub runs: Family<ResourceLabels, Counter>,
    pub failures: Family<ErrorLabels, Counter>,
    pub duration: HistogramWithExemplars<TraceLabel>,
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self {
            runs: Family::<ResourceLabels, Counter>::default(),
            failures: Family::<ErrorLabels, Counter>::default(),
            duration: HistogramWithExemplars::new([0.1, 0.5, 1., 5., 10., 30., 60., 120.].into_iter()),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResourceLabels {
    pub controller: &'static str,
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: &'static str,
    pub namespace: String,
    pub name: String,
    pub error_type: &'static str,
}

impl ReconcileMetrics {
    pub fn register(self, r: &mut Registry) -> Self {
        r.register_with_unit(
            "controller_reconciliation_duration",
            "time spent in a single reconcile call",
            Unit::Seconds,
            self.duration.clone(),
        );
        r.register(
            "controller_reconciliation_errors",
            "reconciliations that ended in an error, by error class",
            self.failures.clone(),
        );
        r.register(
            "controller_reconciliations",
            "total reconcile invocations",
            self.runs.clone(),
        );
        self
    }

    pub fn set_failure<K: ResourceExt>(&self, controller: &'static str, obj: &Arc<K>, e: &Error) {
        self.failures
            .get_or_create(&ErrorLabels {
                controller,
                namespace: obj.namespace().unwrap_or_default(),
                name: obj.name_any(),
                error_type: e.metric_label(),
            })
            .inc();
    }

    pub fn count_and_measure(
        &self,
        controller: &'static str,
        namespace: &str,
        name: &str,
        trace_id: &TraceId,
    ) -> ReconcileMeasurer {
        self.runs
            .get_or_create(&ResourceLabels {
                controller,
                namespace: namespace.to_owned(),
                name: name.to_owned(),
            })
            .inc();
        ReconcileMeasurer {
            start: Instant::now(),
            labels: trace_id.try_into().ok(),
            metric: self.duration.clone(),
        }
    }
}

/// Relies on `Drop` to calculate duration and register the observation in
/// the histogram once the reconcile future finishes (success or error).
pub struct ReconcileMeasurer {
    start: Instant,
    labels: Option<TraceLabel>,
    metric: HistogramWithExemplars<TraceLabel>,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        let labels = self.labels.take();
        self.metric.observe(duration, labels);
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterLabels {
    pub cluster: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterInfoLabels {
    pub cluster: String,
    pub namespace: String,
    pub version: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterSlotLabels {
    pub cluster: String,
    pub namespace: String,
    pub state: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TopologyLabels {
    pub topology: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TopologyInfoLabels {
    pub topology: String,
    pub namespace: String,
    pub cluster: String,
    pub status: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TopologyTransitionLabels {
    pub namespace: String,
    pub topology: String,
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TopologyStateLabels {
    pub namespace: String,
    pub topology: String,
    pub state: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TopologyResultLabels {
    pub namespace: String,
    pub result: &'static str,
}

/// Domain metrics describing the observed Storm cluster/topology state, as
/// opposed to [`ReconcileMetrics`] which describes the operator's own
/// behavior. Populated by the cluster-status collector and the topology
/// reconciler after each successful Nimbus API round-trip.
#[derive(Clone)]
pub struct StormMetrics {
    pub cluster_info: Family<ClusterInfoLabels, Gauge>,
    pub cluster_supervisors_total: Family<ClusterLabels, Gauge>,
    pub cluster_slots_total: Family<ClusterSlotLabels, Gauge>,
    pub topology_info: Family<TopologyInfoLabels, Gauge>,
    pub topology_workers_total: Family<TopologyLabels, Gauge>,
    pub topology_executors_total: Family<TopologyLabels, Gauge>,
    pub topology_tasks_total: Family<TopologyLabels, Gauge>,
    pub topology_uptime_seconds: Family<TopologyLabels, Gauge>,
    pub topology_state_transitions_total: Family<TopologyTransitionLabels, Counter>,
    pub topology_state_duration_seconds: Family<TopologyStateLabels, Histogram>,
    pub topology_jar_download_duration_seconds: Family<TopologyLabels, Histogram>,
    pub topology_jar_size_bytes: Family<TopologyLabels, Histogram>,
    pub topology_submissions_total: Family<TopologyResultLabels, Counter>,
    pub topology_deletions_total: Family<TopologyResultLabels, Counter>,
}

impl Default for StormMetrics {
    fn default() -> Self {
        Self {
            cluster_info: Family::default(),
            cluster_supervisors_total: Family::default(),
            cluster_slots_total: Family::default(),
            topology_info: Family::default(),
            topology_workers_total: Family::default(),
            topology_executors_total: Family::default(),
            topology_tasks_total: Family::default(),
            topology_uptime_seconds: Family::default(),
            topology_state_transitions_total: Family::default(),
            topology_state_duration_seconds: Family::new_with_constructor(|| {
                Histogram::new([1., 5., 15., 30., 60., 120., 300., 600., 1020.].into_iter())
            }),
            topology_jar_download_duration_seconds: Family::new_with_constructor(|| {
                Histogram::new([0.1, 0.2, 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 51.2, 102.4].into_iter())
            }),
            topology_jar_size_bytes: Family::new_with_constructor(|| {
                const MIB: f64 = 1024.0 * 1024.0;
                Histogram::new(
                    [
                        MIB,
                        2. * MIB,
                        4. * MIB,
                        8. * MIB,
                        16. * MIB,
                        32. * MIB,
                        64. * MIB,
                        128. * MIB,
                        256. * MIB,
                        512. * MIB,
                        1024. * MIB,
                    ]
                    .into_iter(),
                )
            }),
            topology_submissions_total: Family::default(),
            topology_deletions_total: Family::default(),
        }
    }
}

impl StormMetrics {
    pub fn register(self, r: &mut Registry) -> Self {
        r.register(
            "cluster_info",
            "static cluster metadata, value is always 1",
            self.cluster_info.clone(),
        );
        r.register(
            "cluster_supervisors",
            "supervisors reported by Nimbus for this cluster",
            self.cluster_supervisors_total.clone(),
        );
        r.register(
            "cluster_slots",
            "worker slots reported by Nimbus for this cluster, by state (total|used|free)",
            self.cluster_slots_total.clone(),
        );
        r.register(
            "topology_info",
            "static topology metadata, value is always 1",
            self.topology_info.clone(),
        );
        r.register(
            "topology_workers",
            "workers assigned to this topology",
            self.topology_workers_total.clone(),
        );
        r.register(
            "topology_executors",
            "executors assigned to this topology",
            self.topology_executors_total.clone(),
        );
        r.register(
            "topology_tasks",
            "tasks assigned to this topology",
            self.topology_tasks_total.clone(),
        );
        r.register_with_unit(
            "topology_uptime",
            "seconds since the topology was last activated, as reported by Nimbus",
            Unit::Seconds,
            self.topology_uptime_seconds.clone(),
        );
        r.register(
            "topology_state_transitions",
            "phase transitions observed for a topology, by from/to state",
            self.topology_state_transitions_total.clone(),
        );
        r.register_with_unit(
            "topology_state_duration",
            "time spent in a topology phase before transitioning out of it",
            Unit::Seconds,
            self.topology_state_duration_seconds.clone(),
        );
        r.register_with_unit(
            "topology_jar_download_duration",
            "time spent resolving and extracting a topology's jar",
            Unit::Seconds,
            self.topology_jar_download_duration_seconds.clone(),
        );
        r.register(
            "topology_jar_size_bytes",
            "size distribution of jars resolved for topologies",
            self.topology_jar_size_bytes.clone(),
        );
        r.register(
            "topology_submissions",
            "topology submissions issued to Nimbus, by result",
            self.topology_submissions_total.clone(),
        );
        r.register(
            "topology_deletions",
            "topology kills issued to Nimbus, by result",
            self.topology_deletions_total.clone(),
        );
        self
    }

    pub fn observe_topology_transition(&self, namespace: &str, topology: &str, from: &'static str, to: &'static str) {
        self.topology_state_transitions_total
            .get_or_create(&TopologyTransitionLabels {
                namespace: namespace.to_owned(),
                topology: topology.to_owned(),
                from,
                to,
            })
            .inc();
        self.topology_state_duration_seconds
            .get_or_create(&TopologyStateLabels {
                namespace: namespace.to_owned(),
                topology: topology.to_owned(),
                state: from,
            });
    }

    pub fn observe_topology_submission(&self, namespace: &str, result: &'static str) {
        self.topology_submissions_total
            .get_or_create(&TopologyResultLabels {
                namespace: namespace.to_owned(),
                result,
            })
            .inc();
    }

    pub fn observe_topology_deletion(&self, namespace: &str, result: &'static str) {
        self.topology_deletions_total
            .get_or_create(&TopologyResultLabels {
                namespace: namespace.to_owned(),
                result,
            })
            .inc();
    }
}
