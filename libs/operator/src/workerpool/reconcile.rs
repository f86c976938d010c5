//! Desired-state loop for a single `StormWorkerPool`: materializes an
//! optional dedicated `Deployment` (and `HorizontalPodAutoscaler`, when
//! autoscaling is declared) for a topology's workers, folding in the jar
//! extraction fragment appropriate to the referenced topology's
//! `jarSource.container.extractionMode`.

use crate::controller::Context;
use crate::error::{Error, Result};
use crate::jar::fragments;
use crate::telemetry;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
    MetricIdentifier, MetricSpec, MetricTarget, PodsMetricSource, ResourceMetricSource,
};
use k8s_openapi::api::core::v1::{ContainerPort, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, LabelSelector, ObjectMeta, Time};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use storm_types::common::ExtractionMode;
use storm_types::topology::StormTopology;
use storm_types::workerpool::{StormWorkerPool, StormWorkerPoolPhase, StormWorkerPoolStatus};
use tracing::{field, info, instrument, Span};

pub const CONTROLLER_ID: &str = "stormworkerpool";
const FIELD_MANAGER: &str = "storm-operator";
const DEFAULT_CPU_REQUEST: &str = "250m";
const DEFAULT_MEMORY_REQUEST: &str = "512Mi";

fn labels(pool: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_owned(), "storm-worker".to_owned()),
        ("app.kubernetes.io/instance".to_owned(), pool.to_owned()),
        (
            "app.kubernetes.io/managed-by".to_owned(),
            "storm-operator".to_owned(),
        ),
    ])
}

fn owned_meta(pool: &StormWorkerPool, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: pool.namespace(),
        labels: Some(labels(&pool.name_any())),
        owner_references: pool.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

async fn apply<K>(api: &Api<K>, name: &str, obj: &K) -> Result<K>
where
    K: Resource + Clone + serde::Serialize + for<'de> serde::Deserialize<'de> + std::fmt::Debug,
    K::DynamicType: Default,
{
    let pp = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(name, &pp, &Patch::Apply(obj)).await.map_err(Error::from)
}

/// Defaults missing resource requests on the pod template's first
/// container, adds a `ContainerPort` for every slot in the declared port
/// range, and folds in the jar-extraction fragment when the referenced
/// topology uses `initContainer`/`sidecar` extraction.
fn build_pod_spec(pool: &StormWorkerPool, topology: &StormTopology) -> Result<PodTemplateSpec> {
    let mut template = pool
        .spec
        .pod_template
        .clone()
        .ok_or_else(|| Error::UserInputError("podTemplate must be set".to_owned()))?;
    let mut spec = template.spec.take().unwrap_or_default();
    if spec.containers.is_empty() {
        return Err(Error::UserInputError(
            "podTemplate.spec.containers must declare at least one container".to_owned(),
        ));
    }

    let range = &pool.spec.port_range;
    let ports: Vec<ContainerPort> = (0..range.count)
        .map(|i| ContainerPort {
            name: Some(format!("slot-{i}")),
            container_port: range.start + i,
            ..Default::default()
        })
        .collect();

    {
        let main = &mut spec.containers[0];
        if main.resources.is_none() {
            main.resources = Some(default_resources());
        }
        let mut existing = main.ports.take().unwrap_or_default();
        existing.extend(ports);
        main.ports = Some(existing);
    }

    if let Some(container) = topology.spec.jar_source.container.as_ref() {
        match container.extraction_mode {
            ExtractionMode::Job => {}
            ExtractionMode::InitContainer => {
                let mut init_containers = spec.init_containers.take().unwrap_or_default();
                init_containers.push(fragments::init_container(container));
                spec.init_containers = Some(init_containers);
                spec.containers[0]
                    .volume_mounts
                    .get_or_insert_with(Vec::new)
                    .push(fragments::worker_volume_mount());
                spec.volumes.get_or_insert_with(Vec::new).push(fragments::jar_volume());
            }
            ExtractionMode::Sidecar => {
                spec.containers.push(fragments::sidecar_container(container));
                spec.containers[0]
                    .volume_mounts
                    .get_or_insert_with(Vec::new)
                    .push(fragments::worker_volume_mount());
                spec.volumes.get_or_insert_with(Vec::new).push(fragments::jar_volume());
            }
        }
    }

    template.spec = Some(spec);
    template.metadata = Some({
        let mut meta = template.metadata.unwrap_or_default();
        meta.labels.get_or_insert_with(BTreeMap::new).extend(labels(&pool.name_any()));
        meta
    });
    Ok(template)
}

fn default_resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_owned(), Quantity(DEFAULT_CPU_REQUEST.to_owned())),
            ("memory".to_owned(), Quantity(DEFAULT_MEMORY_REQUEST.to_owned())),
        ])),
        ..Default::default()
    }
}

async fn apply_deployment(
    client: kube::Client,
    pool: &StormWorkerPool,
    namespace: &str,
    template: PodTemplateSpec,
) -> Result<(i32, i32)> {
    let name = pool.name_any();
    let replicas = if pool.spec.autoscaling.is_some() {
        None
    } else {
        Some(pool.spec.replicas.unwrap_or(1))
    };
    let deployment = Deployment {
        metadata: owned_meta(pool, name.clone()),
        spec: Some(DeploymentSpec {
            replicas,
            selector: LabelSelector {
                match_labels: Some(labels(&name)),
                ..Default::default()
            },
            template,
            ..Default::default()
        }),
        ..Default::default()
    };
    let api: Api<Deployment> = Api::namespaced(client, namespace);
    let applied = apply(&api, &name, &deployment).await?;
    let status = applied.status.unwrap_or_default();
    let desired = status.replicas.unwrap_or(replicas.unwrap_or(0));
    Ok((status.ready_replicas.unwrap_or(0), desired))
}

/// Builds the metric list for an HPA from the spec's cpu/memory percentages
/// and any custom pod metrics; returns `None` if none are declared (an HPA
/// with no metrics is invalid, so callers skip applying one in that case).
fn autoscaling_metrics(pool: &StormWorkerPool) -> Option<Vec<MetricSpec>> {
    let autoscaling = pool.spec.autoscaling.as_ref()?;
    let mut metrics = Vec::new();
    if let Some(cpu) = autoscaling.cpu_percent {
        metrics.push(MetricSpec {
            type_: "Resource".to_owned(),
            resource: Some(ResourceMetricSource {
                name: "cpu".to_owned(),
                target: MetricTarget {
                    type_: "Utilization".to_owned(),
                    average_utilization: Some(cpu),
                    ..Default::default()
                },
            }),
            ..Default::default()
        });
    }
    if let Some(memory) = autoscaling.memory_percent {
        metrics.push(MetricSpec {
            type_: "Resource".to_owned(),
            resource: Some(ResourceMetricSource {
                name: "memory".to_owned(),
                target: MetricTarget {
                    type_: "Utilization".to_owned(),
                    average_utilization: Some(memory),
                    ..Default::default()
                },
            }),
            ..Default::default()
        });
    }
    for custom in &autoscaling.custom_metrics {
        metrics.push(MetricSpec {
            type_: "Pods".to_owned(),
            pods: Some(PodsMetricSource {
                metric: MetricIdentifier {
                    name: custom.name.clone(),
                    ..Default::default()
                },
                target: MetricTarget {
                    type_: "AverageValue".to_owned(),
                    average_value: Some(Quantity(custom.target_average_value.clone())),
                    ..Default::default()
                },
            }),
            ..Default::default()
        });
    }
    if metrics.is_empty() {
        None
    } else {
        Some(metrics)
    }
}

async fn apply_autoscaler(client: kube::Client, pool: &StormWorkerPool, namespace: &str) -> Result<()> {
    let name = pool.name_any();
    let api: Api<HorizontalPodAutoscaler> = Api::namespaced(client.clone(), namespace);
    match autoscaling_metrics(pool) {
        None => {
            let _ = api.delete(&name, &Default::default()).await;
            Ok(())
        }
        Some(metrics) => {
            let autoscaling = pool.spec.autoscaling.as_ref().expect("checked by autoscaling_metrics");
            let hpa = HorizontalPodAutoscaler {
                metadata: owned_meta(pool, name.clone()),
                spec: Some(HorizontalPodAutoscalerSpec {
                    scale_target_ref: CrossVersionObjectReference {
                        api_version: Some("apps/v1".to_owned()),
                        kind: "Deployment".to_owned(),
                        name: name.clone(),
                    },
                    min_replicas: Some(autoscaling.min_replicas),
                    max_replicas: autoscaling.max_replicas,
                    metrics: Some(metrics),
                    ..Default::default()
                }),
                ..Default::default()
            };
            apply(&api, &name, &hpa).await?;
            Ok(())
        }
    }
}

fn condition(type_: &str, status: bool, reason: &str, message: String) -> Condition {
    Condition {
        type_: type_.to_owned(),
        status: if status { "True".to_owned() } else { "False".to_owned() },
        reason: reason.to_owned(),
        message,
        last_transition_time: Time(chrono::Utc::now()),
        observed_generation: None,
    }
}

/// `ready`/`desired` from the owned `Deployment`'s status. `desired == 0`
/// (nothing materialized yet) is `Pending`; otherwise `Creating` until
/// `ready >= desired`, then `Ready`, with `Degraded` once a previously
/// `Ready` pool drops below full readiness.
fn derive_phase(ready: i32, desired: i32, previous: &StormWorkerPoolPhase) -> StormWorkerPoolPhase {
    if desired == 0 {
        return StormWorkerPoolPhase::Pending;
    }
    if ready >= desired {
        StormWorkerPoolPhase::Ready
    } else if *previous == StormWorkerPoolPhase::Ready {
        StormWorkerPoolPhase::Degraded
    } else {
        StormWorkerPoolPhase::Creating
    }
}

/// Thin wrapper enforcing `ctx.config.reconcile_timeout` around the actual
/// reconcile body, so a Nimbus/apiserver call that never returns can't wedge
/// the controller's worker forever.
pub async fn reconcile_worker_pool(pool: Arc<StormWorkerPool>, ctx: Arc<Context<Deployment>>) -> Result<Action> {
    let timeout = ctx.config.reconcile_timeout;
    match tokio::time::timeout(timeout, reconcile_worker_pool_inner(pool, ctx)).await {
        Ok(result) => result,
        Err(_) => Err(Error::ReconcileTimeout),
    }
}

#[instrument(skip(pool, ctx), fields(trace_id))]
async fn reconcile_worker_pool_inner(pool: Arc<StormWorkerPool>, ctx: Arc<Context<Deployment>>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));

    let namespace = pool
        .namespace()
        .ok_or_else(|| Error::UserInputError("StormWorkerPool resource must be namespaced".to_owned()))?;
    let name = pool.name_any();
    let _timer = ctx.metrics.count_and_measure(CONTROLLER_ID, &namespace, &name, &trace_id);
    let client = ctx.client.clone();

    let topologies: Api<StormTopology> = Api::namespaced(client.clone(), &namespace);
    let topology = match topologies.get_opt(&pool.spec.topology_ref).await? {
        Some(t) => t,
        None => {
            info!(msg = "referenced topology not found yet", %namespace, %name);
            return Ok(Action::requeue(Duration::from_secs(10)));
        }
    };

    let template = match build_pod_spec(&pool, &topology) {
        Ok(t) => t,
        Err(e) => {
            let status = StormWorkerPoolStatus {
                phase: StormWorkerPoolPhase::Failed,
                observed_generation: pool.meta().generation,
                conditions: Some(vec![condition("Ready", false, "ValidationFailed", e.to_string())]),
                ..Default::default()
            };
            persist_status(&client, &namespace, &name, &status).await?;
            return Ok(Action::requeue(Duration::from_secs(5 * 60)));
        }
    };

    let (ready, desired) = apply_deployment(client.clone(), &pool, &namespace, template).await?;
    apply_autoscaler(client.clone(), &pool, &namespace).await?;

    let previous_phase = pool.status.as_ref().map(|s| s.phase.clone()).unwrap_or_default();
    let phase = derive_phase(ready, desired, &previous_phase);

    let status = StormWorkerPoolStatus {
        phase: phase.clone(),
        observed_generation: pool.meta().generation,
        ready_replicas: ready,
        replicas: desired,
        conditions: Some(vec![condition(
            "Ready",
            phase == StormWorkerPoolPhase::Ready,
            match phase {
                StormWorkerPoolPhase::Ready => "AllReplicasReady",
                StormWorkerPoolPhase::Degraded => "ReplicasUnavailable",
                StormWorkerPoolPhase::Creating => "ReplicasProvisioning",
                StormWorkerPoolPhase::Pending => "AwaitingDeployment",
                StormWorkerPoolPhase::Failed => "ValidationFailed",
            },
            format!("{ready}/{desired} replicas ready"),
        )]),
    };
    persist_status(&client, &namespace, &name, &status).await?;

    let requeue = match phase {
        StormWorkerPoolPhase::Ready => Duration::from_secs(60),
        StormWorkerPoolPhase::Failed => Duration::from_secs(5 * 60),
        _ => Duration::from_secs(10),
    };
    Ok(Action::requeue(requeue))
}

async fn persist_status(
    client: &kube::Client,
    namespace: &str,
    name: &str,
    status: &StormWorkerPoolStatus,
) -> Result<()> {
    let api: Api<StormWorkerPool> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Merge(patch),
    )
    .await?;
    Ok(())
}

pub fn on_error(obj: &Arc<StormWorkerPool>, error: &Error, ctx: &Context<Deployment>) -> Action {
    crate::controller::error_policy(CONTROLLER_ID, obj, error, &ctx.metrics)
}

trait TopologyExt {
    async fn get_opt(&self, name: &str) -> Result<Option<StormTopology>>;
}

impl TopologyExt for Api<StormTopology> {
    async fn get_opt(&self, name: &str) -> Result<Option<StormTopology>> {
        match self.get(name).await {
            Ok(t) => Ok(Some(t)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Error::from(e)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pending_until_deployment_materializes() {
        assert_eq!(derive_phase(0, 0, &StormWorkerPoolPhase::Pending), StormWorkerPoolPhase::Pending);
    }

    #[test]
    fn creating_while_under_provisioned() {
        assert_eq!(derive_phase(1, 3, &StormWorkerPoolPhase::Pending), StormWorkerPoolPhase::Creating);
    }

    #[test]
    fn ready_once_fully_provisioned() {
        assert_eq!(derive_phase(3, 3, &StormWorkerPoolPhase::Creating), StormWorkerPoolPhase::Ready);
    }

    #[test]
    fn degrades_from_ready() {
        assert_eq!(derive_phase(2, 3, &StormWorkerPoolPhase::Ready), StormWorkerPoolPhase::Degraded);
    }
}
