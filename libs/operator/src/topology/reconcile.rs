use crate::backoff;
use crate::checksum;
use crate::controller::Context;
use crate::error::{Error, Result};
use crate::jar::{self, ResolveContext};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Error as FinalizerError, Event as FinalizerEvent};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use storm_client::{Credentials, StormApiClient};
use storm_types::cluster::{StormCluster, StormClusterPhase};
use storm_types::common::JarSourceSpec;
use storm_types::topology::{StormTopology, StormTopologyPhase, StormTopologySpec, StormTopologyStatus};
use tracing::{field, info, instrument, warn, Span};

pub const CONTROLLER_ID: &str = "stormtopology";
const FIELD_MANAGER: &str = "storm-operator";
pub const TOPOLOGY_FINALIZER: &str = "stormtopologies.storm.apache.org/finalizer";

/// `SubmitTopology` uploads the jar itself, so it gets a longer deadline
/// than the other, cheap Nimbus calls (which use `ctx.config.nimbus_timeout`).
const SUBMIT_DEADLINE: Duration = Duration::from_secs(60);
const CLEANUP_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// `KillTopology` wait used for the update-triggered kill, short because the
/// topology is about to be resubmitted rather than torn down.
const UPDATE_KILL_WAIT_SECS: i64 = 5;

#[derive(Serialize)]
struct ChecksumInput<'a> {
    jar_source: &'a JarSourceSpec,
    main_class: &'a str,
    args: &'a [String],
    config: &'a BTreeMap<String, String>,
}

/// Fingerprints the parts of a spec that require a kill + resubmit when
/// they change while `Running`/`Suspended`. `clusterRef` and the timing
/// knobs (`killWaitSeconds`, `reconcileIntervalSeconds`, ...) deliberately
/// excluded: they don't change what's running in Nimbus.
fn desired_checksum(spec: &StormTopologySpec) -> Result<String> {
    checksum::fingerprint(&ChecksumInput {
        jar_source: &spec.jar_source,
        main_class: &spec.main_class,
        args: &spec.args,
        config: &spec.config,
    })
}

fn topology_name(topology: &StormTopology) -> String {
    topology
        .spec
        .topology_name
        .clone()
        .unwrap_or_else(|| topology.name_any())
}

/// Validates the mutual-exclusivity and non-emptiness invariants on a spec
/// that no amount of retrying will fix. `None` means the spec is valid.
fn validate_spec(spec: &StormTopologySpec) -> Option<String> {
    let source_count = [
        spec.jar_source.url.is_some(),
        spec.jar_source.container.is_some(),
        spec.jar_source.s3.is_some(),
    ]
    .into_iter()
    .filter(|set| *set)
    .count();
    if source_count != 1 {
        return Some(format!(
            "jarSource must set exactly one of url/container/s3, found {source_count}"
        ));
    }
    if let Some(checksum) = &spec.checksum {
        if checksum.value.trim().is_empty() {
            return Some("checksum.value must not be empty when checksum is set".to_owned());
        }
    }
    if spec.extraction_timeout_seconds <= 0 {
        return Some("extractionTimeoutSeconds must be positive".to_owned());
    }
    if spec.main_class.trim().is_empty() {
        return Some("mainClass must not be empty".to_owned());
    }
    None
}

/// Looks up the referenced `StormCluster`, returning it only when `Ready`.
/// A missing or not-yet-ready cluster is not an error here: callers defer
/// whatever they wanted to do to a later tick.
async fn ready_cluster(
    topology: &StormTopology,
    ctx: &Context<Job>,
    namespace: &str,
) -> Result<Option<StormCluster>> {
    let clusters: Api<StormCluster> = Api::namespaced(ctx.client.clone(), namespace);
    match get_opt(&clusters, &topology.spec.cluster_ref).await? {
        Some(cluster)
            if cluster
                .status
                .as_ref()
                .map(|s| s.phase.clone())
                .unwrap_or_default()
                == StormClusterPhase::Ready =>
        {
            Ok(Some(cluster))
        }
        _ => Ok(None),
    }
}

/// Builds a `StormApiClient` targeting a `Ready` cluster's UI/REST endpoint,
/// attaching basic-auth credentials read from `ui.auth.secretName` when set.
async fn storm_client_for(
    cluster: &StormCluster,
    ctx: &Context<Job>,
    namespace: &str,
) -> Result<StormApiClient> {
    let endpoint = cluster
        .status
        .as_ref()
        .and_then(|s| s.ui_endpoint.clone())
        .ok_or_else(|| {
            Error::UserInputError(format!(
                "cluster {} does not expose a Storm REST endpoint (ui.enabled=false)",
                cluster.name_any()
            ))
        })?;
    let mut client = StormApiClient::new(format!("http://{endpoint}")).with_metrics(ctx.metrics.api.clone());
    if let Some(auth) = cluster.spec.ui.as_ref().and_then(|ui| ui.auth.as_ref()) {
        let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);
        let secret = secrets.get(&auth.secret_name).await?;
        let data = secret.data.unwrap_or_default();
        let username = secret_key(&data, "username")?;
        let password = secret_key(&data, "password")?;
        client = client.with_credentials(Some(Credentials { username, password }));
    }
    Ok(client)
}

async fn get_opt(api: &Api<StormCluster>, name: &str) -> Result<Option<StormCluster>> {
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(Error::from(e)),
    }
}

fn secret_key(data: &BTreeMap<String, k8s_openapi::ByteString>, key: &str) -> Result<String> {
    let bytes = data
        .get(key)
        .ok_or_else(|| Error::UserInputError(format!("secret is missing key {key}")))?;
    String::from_utf8(bytes.0.clone())
        .map_err(|e| Error::UserInputError(format!("secret key {key} is not valid utf-8: {e}")))
}

async fn persist_status(
    client: &kube::Client,
    namespace: &str,
    name: &str,
    status: &StormTopologyStatus,
) -> Result<()> {
    let api: Api<StormTopology> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(patch))
        .await?;
    Ok(())
}

/// Drives a single `StormTopology` through its lifecycle. Wraps the actual
/// state machine in [`finalizer`] so deletion always routes through
/// [`cleanup`] while the finalizer is present, regardless of which phase
/// the topology was in. Enforces `ctx.config.reconcile_timeout` around the
/// whole call so a Nimbus/apiserver call that never returns can't wedge the
/// controller's worker forever.
pub async fn reconcile_topology(topology: Arc<StormTopology>, ctx: Arc<Context<Job>>) -> Result<Action> {
    let timeout = ctx.config.reconcile_timeout;
    match tokio::time::timeout(timeout, reconcile_topology_inner(topology, ctx)).await {
        Ok(result) => result,
        Err(_) => Err(Error::ReconcileTimeout),
    }
}

#[instrument(skip(topology, ctx), fields(trace_id))]
async fn reconcile_topology_inner(topology: Arc<StormTopology>, ctx: Arc<Context<Job>>) -> Result<Action> {
    let trace_id = crate::telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));

    let namespace = topology.namespace().ok_or_else(|| {
        Error::UserInputError("StormTopology resource must be namespaced".to_owned())
    })?;
    let name = topology.name_any();
    let _timer = ctx.metrics.count_and_measure(CONTROLLER_ID, &namespace, &name, &trace_id);

    let api: Api<StormTopology> = Api::namespaced(ctx.client.clone(), &namespace);
    finalizer(&api, TOPOLOGY_FINALIZER, topology, |event| async {
        match event {
            FinalizerEvent::Apply(topo) => apply(topo, ctx.clone()).await,
            FinalizerEvent::Cleanup(topo) => cleanup(topo, ctx.clone()).await,
        }
    })
    .await
    .map_err(map_finalizer_error)
}

pub fn on_error(obj: &Arc<StormTopology>, error: &Error, ctx: &Context<Job>) -> Action {
    crate::controller::error_policy(CONTROLLER_ID, obj, error, &ctx.metrics)
}

/// Unwraps the finalizer combinator's own error envelope back to our error
/// type, preserving `is_transient()` so `Pending` (still-converging)
/// cleanup outcomes requeue rather than fail the topology.
fn map_finalizer_error(e: FinalizerError<Error>) -> Error {
    match e {
        FinalizerError::ApplyFailed(inner) | FinalizerError::CleanupFailed(inner) => inner,
        FinalizerError::AddFinalizer(source) | FinalizerError::RemoveFinalizer(source) => {
            Error::KubeError { source }
        }
        FinalizerError::UnnamedObject => Error::UserInputError("object has no name".to_owned()),
        other => Error::Permanent(other.to_string()),
    }
}

/// Deletion path: kill the topology in Nimbus (idempotent on a missing
/// registration), then wait for `GetTopology` to confirm it's actually
/// gone before letting the finalizer combinator strip the finalizer.
async fn cleanup(topology: Arc<StormTopology>, ctx: Arc<Context<Job>>) -> Result<Action> {
    let namespace = topology.namespace().ok_or_else(|| {
        Error::UserInputError("StormTopology resource must be namespaced".to_owned())
    })?;
    let name = topology.name_any();
    let topo_name = topology_name(&topology);
    let control_deadline = ctx.config.nimbus_timeout;

    let cluster = match ready_cluster(&topology, &ctx, &namespace).await {
        Ok(c) => c,
        Err(_) => None,
    };
    let Some(cluster) = cluster else {
        // Cluster unreachable or gone: nothing left to kill, let the
        // resource disappear rather than block deletion indefinitely.
        ctx.metrics.storm.observe_topology_deletion(&namespace, "skipped");
        return Ok(Action::await_change());
    };

    let api_client = storm_client_for(&cluster, &ctx, &namespace).await?;
    api_client
        .kill_topology(&topo_name, topology.spec.kill_wait_seconds, control_deadline)
        .await?;

    match api_client.get_topology(&topo_name, control_deadline).await {
        Err(e) if e.is_not_found() => {
            info!(msg = "topology confirmed removed from nimbus", %namespace, name = %name);
            ctx.metrics.storm.observe_topology_deletion(&namespace, "success");
            Ok(Action::await_change())
        }
        Ok(_) => Err(Error::Pending(
            "nimbus still reports the topology as registered".to_owned(),
        )),
        Err(e) if e.is_transient() || e.is_connection() => Err(Error::Pending(e.to_string())),
        Err(e) => Err(Error::from(e)),
    }
}

/// Non-deletion path: precedence is deletion (handled by the finalizer
/// combinator routing here only when not deleting) > suspend/resume >
/// jar-change-triggered update, then per-phase forward progress.
async fn apply(topology: Arc<StormTopology>, ctx: Arc<Context<Job>>) -> Result<Action> {
    let namespace = topology.namespace().ok_or_else(|| {
        Error::UserInputError("StormTopology resource must be namespaced".to_owned())
    })?;
    let name = topology.name_any();
    let topo_name = topology_name(&topology);
    let client = ctx.client.clone();
    let reconcile_interval = Duration::from_secs(topology.spec.reconcile_interval_seconds.max(1) as u64);
    let control_deadline = ctx.config.nimbus_timeout;

    let mut status = topology.status.clone().unwrap_or_default();
    let previously_observed_generation = status.observed_generation;
    status.observed_generation = topology.meta().generation;

    // A `Failed` topology only ever leaves that phase because its spec
    // changed, never on its own.
    if status.phase == StormTopologyPhase::Failed && status.observed_generation != previously_observed_generation {
        status.phase = StormTopologyPhase::Pending;
        status.last_error = None;
        status.retry_attempt = 0;
    }
    let mut phase = status.phase.clone();

    if topology.spec.suspend && phase == StormTopologyPhase::Running {
        if let Some(cluster) = ready_cluster(&topology, &ctx, &namespace).await? {
            let api_client = storm_client_for(&cluster, &ctx, &namespace).await?;
            api_client.deactivate_topology(&topo_name, control_deadline).await?;
            info!(msg = "deactivated topology", %namespace, name = %name);
            emit_transition(&ctx, &namespace, &name, phase.clone(), StormTopologyPhase::Suspended);
            phase = StormTopologyPhase::Suspended;
        }
    } else if !topology.spec.suspend && phase == StormTopologyPhase::Suspended {
        if let Some(cluster) = ready_cluster(&topology, &ctx, &namespace).await? {
            let api_client = storm_client_for(&cluster, &ctx, &namespace).await?;
            api_client.activate_topology(&topo_name, control_deadline).await?;
            info!(msg = "activated topology", %namespace, name = %name);
            emit_transition(&ctx, &namespace, &name, phase.clone(), StormTopologyPhase::Running);
            phase = StormTopologyPhase::Running;
        }
    } else if phase == StormTopologyPhase::Running || phase == StormTopologyPhase::Suspended {
        let desired = desired_checksum(&topology.spec)?;
        if Some(&desired) != status.observed_jar_checksum.as_ref() {
            if let Some(cluster) = ready_cluster(&topology, &ctx, &namespace).await? {
                let api_client = storm_client_for(&cluster, &ctx, &namespace).await?;
                api_client
                    .kill_topology(&topo_name, UPDATE_KILL_WAIT_SECS, control_deadline)
                    .await?;
                info!(msg = "spec changed while running or suspended, killing for resubmission", %namespace, name = %name, from = ?phase);
                emit_transition(&ctx, &namespace, &name, phase.clone(), StormTopologyPhase::Updating);
                phase = StormTopologyPhase::Updating;
            }
        }
    }
    status.phase = phase.clone();

    match phase {
        StormTopologyPhase::Pending => {
            status.phase = StormTopologyPhase::Validating;
            status.retry_attempt = 0;
            persist_status(&client, &namespace, &name, &status).await?;
            Ok(Action::requeue(Duration::from_secs(1)))
        }

        StormTopologyPhase::Validating => {
            if let Some(msg) = validate_spec(&topology.spec) {
                status.phase = StormTopologyPhase::Failed;
                status.last_error = Some(msg);
                persist_status(&client, &namespace, &name, &status).await?;
                return Ok(Action::requeue(Duration::from_secs(5 * 60)));
            }
            match ready_cluster(&topology, &ctx, &namespace).await? {
                Some(_) => {
                    emit_transition(&ctx, &namespace, &name, phase, StormTopologyPhase::Downloading);
                    status.phase = StormTopologyPhase::Downloading;
                    status.retry_attempt = 0;
                    persist_status(&client, &namespace, &name, &status).await?;
                    Ok(Action::requeue(Duration::from_secs(1)))
                }
                None => {
                    let delay = backoff::backoff(status.retry_attempt);
                    status.retry_attempt = status.retry_attempt.saturating_add(1);
                    persist_status(&client, &namespace, &name, &status).await?;
                    Ok(Action::requeue(delay))
                }
            }
        }

        StormTopologyPhase::Downloading => {
            let resolve_ctx = ResolveContext {
                client: client.clone(),
                namespace: &namespace,
                topology: &name,
                cache_dir: ctx.config.jar_cache_dir.as_path(),
                extraction_timeout: Duration::from_secs(topology.spec.extraction_timeout_seconds as u64)
                    .min(ctx.config.extraction_timeout_ceiling),
                metrics: &ctx.metrics,
            };
            match jar::resolve(&resolve_ctx, &topology.spec.jar_source, topology.spec.checksum.as_ref()).await {
                Ok(resolution) => {
                    emit_transition(&ctx, &namespace, &name, phase, StormTopologyPhase::Submitting);
                    status.phase = StormTopologyPhase::Submitting;
                    status.observed_jar_checksum = Some(resolution.checksum);
                    status.retry_attempt = 0;
                    persist_status(&client, &namespace, &name, &status).await?;
                    submit(topology, ctx, namespace, name, topo_name, status, client).await
                }
                Err(e) if e.is_transient() => {
                    let delay = backoff::backoff(status.retry_attempt);
                    status.retry_attempt = status.retry_attempt.saturating_add(1);
                    persist_status(&client, &namespace, &name, &status).await?;
                    Ok(Action::requeue(delay))
                }
                Err(e) => {
                    status.phase = StormTopologyPhase::Failed;
                    status.last_error = Some(e.to_string());
                    persist_status(&client, &namespace, &name, &status).await?;
                    Ok(Action::requeue(Duration::from_secs(5 * 60)))
                }
            }
        }

        StormTopologyPhase::Submitting => submit(topology, ctx, namespace, name, topo_name, status, client).await,

        StormTopologyPhase::Running => {
            let Some(cluster) = ready_cluster(&topology, &ctx, &namespace).await? else {
                return Ok(Action::requeue(Duration::from_secs(10)));
            };
            let api_client = storm_client_for(&cluster, &ctx, &namespace).await?;
            match api_client.get_topology(&topo_name, control_deadline).await {
                Ok(topo_info) => {
                    record_topology_snapshot(&ctx, &namespace, &name, &topology.spec.cluster_ref, &topo_info);
                    Ok(Action::requeue(reconcile_interval))
                }
                Err(e) if e.is_not_found() => {
                    warn!(msg = "nimbus lost the running topology", %namespace, name = %name);
                    status.phase = StormTopologyPhase::Failed;
                    status.last_error = Some("NimbusLostTopology".to_owned());
                    persist_status(&client, &namespace, &name, &status).await?;
                    Ok(Action::requeue(Duration::from_secs(30)))
                }
                Err(e) if e.is_transient() || e.is_connection() => {
                    warn!(msg = "transient error polling running topology", %namespace, name = %name, %e);
                    Ok(Action::requeue(Duration::from_secs(10)))
                }
                Err(e) => Err(Error::from(e)),
            }
        }

        StormTopologyPhase::Suspended => Ok(Action::requeue(reconcile_interval)),

        StormTopologyPhase::Updating => {
            let Some(cluster) = ready_cluster(&topology, &ctx, &namespace).await? else {
                return Ok(Action::requeue(Duration::from_secs(10)));
            };
            let api_client = storm_client_for(&cluster, &ctx, &namespace).await?;
            match api_client.get_topology(&topo_name, control_deadline).await {
                Err(e) if e.is_not_found() => {
                    emit_transition(&ctx, &namespace, &name, phase, StormTopologyPhase::Validating);
                    status.phase = StormTopologyPhase::Validating;
                    status.retry_attempt = 0;
                    persist_status(&client, &namespace, &name, &status).await?;
                    Ok(Action::requeue(Duration::from_secs(1)))
                }
                _ => Ok(Action::requeue(CLEANUP_POLL_INTERVAL)),
            }
        }

        // Reachable only if an operator restart observes a status left
        // over from a crash mid-deletion; deletion itself always routes
        // through `cleanup` instead.
        StormTopologyPhase::Killing | StormTopologyPhase::Killed => {
            Ok(Action::requeue(Duration::from_secs(5 * 60)))
        }

        StormTopologyPhase::Failed => Ok(Action::requeue(Duration::from_secs(5 * 60))),
    }
}

/// Submits the already-resolved jar and transitions to `Running`. Shared by
/// the `Downloading` handler (fresh resolution, same tick) and the
/// `Submitting` handler (re-entered after an operator restart).
#[allow(clippy::too_many_arguments)]
async fn submit(
    topology: Arc<StormTopology>,
    ctx: Arc<Context<Job>>,
    namespace: String,
    name: String,
    topo_name: String,
    mut status: StormTopologyStatus,
    client: kube::Client,
) -> Result<Action> {
    let Some(cluster) = ready_cluster(&topology, &ctx, &namespace).await? else {
        return Ok(Action::requeue(Duration::from_secs(10)));
    };
    let api_client = storm_client_for(&cluster, &ctx, &namespace).await?;
    let jar_path = jar::cache_path(&ctx.config.jar_cache_dir, &namespace, &name);

    match api_client
        .submit_topology(
            &topo_name,
            &jar_path,
            &topology.spec.main_class,
            &topology.spec.args,
            &topology.spec.config,
            SUBMIT_DEADLINE,
        )
        .await
    {
        Ok(topology_id) => {
            ctx.metrics.storm.observe_topology_submission(&namespace, "success");
            emit_transition(&ctx, &namespace, &name, StormTopologyPhase::Submitting, StormTopologyPhase::Running);
            status.phase = StormTopologyPhase::Running;
            status.topology_id = Some(topology_id);
            status.submitted_at = Some(Time(chrono::Utc::now()));
            status.last_error = None;
            status.retry_attempt = 0;
            persist_status(&client, &namespace, &name, &status).await?;
            Ok(Action::requeue(Duration::from_secs(
                topology.spec.reconcile_interval_seconds.max(1) as u64,
            )))
        }
        Err(e) if e.is_transient() || e.is_connection() => {
            ctx.metrics.storm.observe_topology_submission(&namespace, "retry");
            let delay = backoff::backoff(status.retry_attempt);
            status.retry_attempt = status.retry_attempt.saturating_add(1);
            persist_status(&client, &namespace, &name, &status).await?;
            Ok(Action::requeue(delay))
        }
        Err(e) => {
            ctx.metrics.storm.observe_topology_submission(&namespace, "failure");
            status.phase = StormTopologyPhase::Failed;
            status.last_error = Some(e.to_string());
            persist_status(&client, &namespace, &name, &status).await?;
            Ok(Action::requeue(Duration::from_secs(5 * 60)))
        }
    }
}

fn emit_transition(
    ctx: &Context<Job>,
    namespace: &str,
    name: &str,
    from: StormTopologyPhase,
    to: StormTopologyPhase,
) {
    ctx.metrics
        .storm
        .observe_topology_transition(namespace, name, phase_label(&from), phase_label(&to));
}

fn phase_label(phase: &StormTopologyPhase) -> &'static str {
    match phase {
        StormTopologyPhase::Pending => "Pending",
        StormTopologyPhase::Validating => "Validating",
        StormTopologyPhase::Downloading => "Downloading",
        StormTopologyPhase::Submitting => "Submitting",
        StormTopologyPhase::Running => "Running",
        StormTopologyPhase::Suspended => "Suspended",
        StormTopologyPhase::Updating => "Updating",
        StormTopologyPhase::Killing => "Killing",
        StormTopologyPhase::Killed => "Killed",
        StormTopologyPhase::Failed => "Failed",
    }
}

fn record_topology_snapshot(
    ctx: &Context<Job>,
    namespace: &str,
    name: &str,
    cluster: &str,
    info: &storm_client::model::TopologyInfo,
) {
    let labels = crate::metrics::TopologyLabels {
        topology: name.to_owned(),
        namespace: namespace.to_owned(),
    };
    ctx.metrics.storm.topology_workers_total.get_or_create(&labels).set(info.workers);
    ctx.metrics.storm.topology_executors_total.get_or_create(&labels).set(info.executors);
    ctx.metrics.storm.topology_tasks_total.get_or_create(&labels).set(info.tasks);
    ctx.metrics.storm.topology_uptime_seconds.get_or_create(&labels).set(info.uptime_seconds);
    ctx.metrics
        .storm
        .topology_info
        .get_or_create(&crate::metrics::TopologyInfoLabels {
            topology: name.to_owned(),
            namespace: namespace.to_owned(),
            cluster: cluster.to_owned(),
            status: "active",
        })
        .set(1);
}

#[cfg(test)]
mod test {
    use super::*;
    use storm_types::common::{ChecksumAlgorithm, ChecksumSpec, ContainerJarSource, JarSourceSpec};

    fn base_spec() -> StormTopologySpec {
        StormTopologySpec {
            cluster_ref: "my-cluster".to_owned(),
            topology_name: None,
            jar_source: JarSourceSpec {
                url: Some("https://example.test/topology.jar".to_owned()),
                container: None,
                s3: None,
            },
            main_class: "com.example.Topology".to_owned(),
            args: vec![],
            config: BTreeMap::new(),
            checksum: None,
            suspend: false,
            kill_wait_seconds: 30,
            reconcile_interval_seconds: 30,
            extraction_timeout_seconds: 300,
        }
    }

    #[test]
    fn rejects_no_jar_source() {
        let mut spec = base_spec();
        spec.jar_source.url = None;
        assert!(validate_spec(&spec).is_some());
    }

    #[test]
    fn rejects_multiple_jar_sources() {
        let mut spec = base_spec();
        spec.jar_source.container = Some(ContainerJarSource {
            image: "img".to_owned(),
            path: "/jar".to_owned(),
            extraction_mode: Default::default(),
        });
        assert!(validate_spec(&spec).is_some());
    }

    #[test]
    fn accepts_exactly_one_jar_source() {
        assert!(validate_spec(&base_spec()).is_none());
    }

    #[test]
    fn rejects_empty_declared_checksum() {
        let mut spec = base_spec();
        spec.checksum = Some(ChecksumSpec {
            algorithm: ChecksumAlgorithm::Sha256,
            value: String::new(),
        });
        assert!(validate_spec(&spec).is_some());
    }

    #[test]
    fn checksum_changes_when_jar_source_changes() {
        let mut other = base_spec();
        other.jar_source.url = Some("https://example.test/other.jar".to_owned());
        assert_ne!(
            desired_checksum(&base_spec()).unwrap(),
            desired_checksum(&other).unwrap()
        );
    }

    #[test]
    fn checksum_is_stable_across_calls() {
        assert_eq!(
            desired_checksum(&base_spec()).unwrap(),
            desired_checksum(&base_spec()).unwrap()
        );
    }

    #[test]
    fn checksum_ignores_cluster_ref_and_timing_knobs() {
        let mut other = base_spec();
        other.cluster_ref = "a-different-cluster".to_owned();
        other.kill_wait_seconds = 999;
        other.reconcile_interval_seconds = 999;
        assert_eq!(
            desired_checksum(&base_spec()).unwrap(),
            desired_checksum(&other).unwrap()
        );
    }
}
