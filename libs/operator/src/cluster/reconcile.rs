//! Desired-state loop for a single `StormCluster`: materializes the Nimbus,
//! Supervisor, optional UI and optional embedded Zookeeper workloads via
//! server-side apply, then derives `status.phase` from their readiness plus
//! a live probe through the Storm API client.

use crate::controller::{error_policy, Context};
use crate::error::{Error, Result};
use crate::telemetry;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, ResourceRequirements, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, LabelSelector, ObjectMeta, Time};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use storm_client::StormApiClient;
use storm_types::cluster::{StormCluster, StormClusterPhase, StormClusterSpec, StormClusterStatus};
use storm_types::common::DeploymentMode;
use tracing::{field, info, instrument, warn, Span};

pub const CONTROLLER_ID: &str = "stormcluster";
const FIELD_MANAGER: &str = "storm-operator";
const NIMBUS_PORT: i32 = 6627;
const UI_PORT: i32 = 8080;
const PROBE_DEADLINE: Duration = Duration::from_secs(5);

fn labels(cluster: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_owned(), "storm".to_owned()),
        ("app.kubernetes.io/instance".to_owned(), cluster.to_owned()),
        (
            "app.kubernetes.io/component".to_owned(),
            component.to_owned(),
        ),
        (
            "app.kubernetes.io/managed-by".to_owned(),
            "storm-operator".to_owned(),
        ),
    ])
}

fn owned_meta(cluster: &StormCluster, name: String, component: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: cluster.namespace(),
        labels: Some(labels(&cluster.name_any(), component)),
        owner_references: cluster.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

fn image_ref(cluster: &StormCluster) -> String {
    format!("{}:{}", cluster.spec.image.repository, cluster.spec.image.tag)
}

fn pod_template(
    cluster: &StormCluster,
    component: &str,
    command: Vec<String>,
    port: i32,
    resources: Option<ResourceRequirements>,
) -> PodTemplateSpec {
    let l = labels(&cluster.name_any(), component);
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(l),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: component.to_owned(),
                image: Some(image_ref(cluster)),
                image_pull_policy: Some(cluster.spec.image.pull_policy.clone()),
                command: Some(command),
                ports: Some(vec![ContainerPort {
                    container_port: port,
                    ..Default::default()
                }]),
                resources,
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

async fn apply<K>(api: &Api<K>, name: &str, obj: &K) -> Result<K>
where
    K: Resource + Clone + serde::Serialize + for<'de> serde::Deserialize<'de> + std::fmt::Debug,
    K::DynamicType: Default,
{
    let pp = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(name, &pp, &Patch::Apply(obj))
        .await
        .map_err(Error::from)
}

fn nimbus_name(cluster: &str) -> String {
    format!("{cluster}-nimbus")
}
fn supervisor_name(cluster: &str) -> String {
    format!("{cluster}-supervisor")
}
fn ui_name(cluster: &str) -> String {
    format!("{cluster}-ui")
}
fn zookeeper_name(cluster: &str) -> String {
    format!("{cluster}-zookeeper")
}

async fn apply_nimbus(client: kube::Client, cluster: &StormCluster, namespace: &str) -> Result<(i32, i32)> {
    let name = nimbus_name(&cluster.name_any());
    let replicas = cluster.spec.nimbus.replicas;
    let persisted = cluster
        .spec
        .nimbus
        .persistence
        .as_ref()
        .map(|p| p.enabled)
        .unwrap_or(false);
    let command = vec!["storm".to_owned(), "nimbus".to_owned()];
    let template = pod_template(cluster, "nimbus", command, NIMBUS_PORT, cluster.spec.nimbus.resources.clone());

    if replicas == 1 && !persisted {
        let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
        let deployment = Deployment {
            metadata: owned_meta(cluster, name.clone(), "nimbus"),
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                selector: LabelSelector {
                    match_labels: Some(labels(&cluster.name_any(), "nimbus")),
                    match_expressions: None,
                },
                template,
                ..Default::default()
            }),
            ..Default::default()
        };
        let applied = apply(&api, &name, &deployment).await?;
        let ready = applied
            .status
            .as_ref()
            .and_then(|s| s.available_replicas)
            .unwrap_or(0);
        apply_service(client, cluster, namespace, &name, "nimbus", NIMBUS_PORT).await?;
        return Ok((ready, replicas));
    }

    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let mut volume_claim_templates = None;
    if let Some(persistence) = &cluster.spec.nimbus.persistence {
        if persistence.enabled {
            volume_claim_templates = Some(vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some("data".to_owned()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
                    storage_class_name: persistence.storage_class_name.clone(),
                    resources: Some(k8s_openapi::api::core::v1::VolumeResourceRequirements {
                        requests: Some(BTreeMap::from([(
                            "storage".to_owned(),
                            Quantity(persistence.size.clone()),
                        )])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]);
        }
    }
    let statefulset = StatefulSet {
        metadata: owned_meta(cluster, name.clone(), "nimbus"),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: name.clone(),
            selector: LabelSelector {
                match_labels: Some(labels(&cluster.name_any(), "nimbus")),
                match_expressions: None,
            },
            template,
            volume_claim_templates,
            ..Default::default()
        }),
        ..Default::default()
    };
    let applied = apply(&api, &name, &statefulset).await?;
    let ready = applied.status.as_ref().map(|s| s.ready_replicas.unwrap_or(0)).unwrap_or(0);
    apply_service(client, cluster, namespace, &name, "nimbus", NIMBUS_PORT).await?;
    Ok((ready, replicas))
}

async fn apply_supervisor(client: kube::Client, cluster: &StormCluster, namespace: &str) -> Result<(i32, i32)> {
    let name = supervisor_name(&cluster.name_any());
    let replicas = cluster.spec.supervisor.replicas;
    let command = vec!["storm".to_owned(), "supervisor".to_owned()];
    let template = pod_template(cluster, "supervisor", command, 6700, cluster.spec.supervisor.resources.clone());
    let selector = LabelSelector {
        match_labels: Some(labels(&cluster.name_any(), "supervisor")),
        match_expressions: None,
    };

    match cluster.spec.supervisor.deployment_mode {
        DeploymentMode::Deployment => {
            let api: Api<Deployment> = Api::namespaced(client, namespace);
            let deployment = Deployment {
                metadata: owned_meta(cluster, name.clone(), "supervisor"),
                spec: Some(DeploymentSpec {
                    replicas: Some(replicas),
                    selector,
                    template,
                    ..Default::default()
                }),
                ..Default::default()
            };
            let applied = apply(&api, &name, &deployment).await?;
            let ready = applied
                .status
                .as_ref()
                .and_then(|s| s.available_replicas)
                .unwrap_or(0);
            Ok((ready, replicas))
        }
        DeploymentMode::DaemonSet => {
            let api: Api<DaemonSet> = Api::namespaced(client, namespace);
            let daemonset = DaemonSet {
                metadata: owned_meta(cluster, name.clone(), "supervisor"),
                spec: Some(DaemonSetSpec {
                    selector,
                    template,
                    ..Default::default()
                }),
                ..Default::default()
            };
            let applied = apply(&api, &name, &daemonset).await?;
            let status = applied.status.unwrap_or_default();
            Ok((status.number_ready, status.desired_number_scheduled))
        }
    }
}

async fn apply_ui(client: kube::Client, cluster: &StormCluster, namespace: &str) -> Result<Option<(i32, i32)>> {
    let Some(ui) = &cluster.spec.ui else {
        return Ok(None);
    };
    if !ui.enabled {
        return Ok(None);
    }
    let name = ui_name(&cluster.name_any());
    let command = vec!["storm".to_owned(), "ui".to_owned()];
    let template = pod_template(cluster, "ui", command, UI_PORT, None);
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deployment = Deployment {
        metadata: owned_meta(cluster, name.clone(), "ui"),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels(&cluster.name_any(), "ui")),
                match_expressions: None,
            },
            template,
            ..Default::default()
        }),
        ..Default::default()
    };
    let applied = apply(&api, &name, &deployment).await?;
    let ready = applied
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);

    let svc_api: Api<Service> = Api::namespaced(client, namespace);
    let service = Service {
        metadata: owned_meta(cluster, name.clone(), "ui"),
        spec: Some(ServiceSpec {
            type_: Some(ui.service_type.clone()),
            selector: Some(labels(&cluster.name_any(), "ui")),
            ports: Some(vec![ServicePort {
                port: UI_PORT,
                name: Some("http".to_owned()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    apply(&svc_api, &name, &service).await?;
    Ok(Some((ready, 1)))
}

async fn apply_zookeeper(client: kube::Client, cluster: &StormCluster, namespace: &str) -> Result<Option<(i32, i32)>> {
    let Some(zk) = &cluster.spec.zookeeper else {
        return Ok(None);
    };
    if !zk.enabled || !zk.external_servers.is_empty() {
        return Ok(None);
    }
    let name = zookeeper_name(&cluster.name_any());
    let command = vec!["zkServer.sh".to_owned(), "start-foreground".to_owned()];
    let template = pod_template(cluster, "zookeeper", command, 2181, None);
    let api: Api<StatefulSet> = Api::namespaced(client, namespace);
    let statefulset = StatefulSet {
        metadata: owned_meta(cluster, name.clone(), "zookeeper"),
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            service_name: name.clone(),
            selector: LabelSelector {
                match_labels: Some(labels(&cluster.name_any(), "zookeeper")),
                match_expressions: None,
            },
            template,
            ..Default::default()
        }),
        ..Default::default()
    };
    let applied = apply(&api, &name, &statefulset).await?;
    let ready = applied.status.as_ref().map(|s| s.ready_replicas.unwrap_or(0)).unwrap_or(0);
    Ok(Some((ready, 1)))
}

async fn apply_service(
    client: kube::Client,
    cluster: &StormCluster,
    namespace: &str,
    name: &str,
    component: &str,
    port: i32,
) -> Result<()> {
    let api: Api<Service> = Api::namespaced(client, namespace);
    let service = Service {
        metadata: owned_meta(cluster, name.to_owned(), component),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_owned()),
            selector: Some(labels(&cluster.name_any(), component)),
            ports: Some(vec![ServicePort {
                port,
                name: Some(component.to_owned()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    apply(&api, name, &service).await.map(|_| ())
}

fn condition(type_: &str, status: bool, reason: &str, message: String) -> Condition {
    Condition {
        type_: type_.to_owned(),
        status: if status { "True" } else { "False" }.to_owned(),
        reason: reason.to_owned(),
        message,
        last_transition_time: Time(chrono::Utc::now()),
        observed_generation: None,
    }
}

/// Validates invariants on a spec that no amount of requeuing will fix,
/// mirroring `topology::reconcile::validate_spec`. `None` means the spec is
/// valid.
fn validate_spec(spec: &StormClusterSpec) -> Option<String> {
    if let Some(zk) = &spec.zookeeper {
        if zk.enabled && !zk.external_servers.is_empty() {
            return Some(
                "zookeeper.enabled and zookeeper.externalServers are mutually exclusive".to_owned(),
            );
        }
    }
    if let Some(ui) = &spec.ui {
        if ui.auth.is_some() && !ui.enabled {
            return Some("ui.auth requires ui.enabled=true".to_owned());
        }
    }
    if spec.nimbus.replicas <= 0 {
        return Some("nimbus.replicas must be positive".to_owned());
    }
    if spec.supervisor.replicas <= 0 {
        return Some("supervisor.replicas must be positive".to_owned());
    }
    if spec.supervisor.worker_slots <= 0 {
        return Some("supervisor.workerSlots must be positive".to_owned());
    }
    None
}

/// Reduces the per-component readiness counts into `status.phase`, per the
/// rules in §4.3: Pending until everything exists, Creating while anything
/// under-provisions, Ready when all are up and the live probe succeeds,
/// Degraded when a previously-Ready cluster's probe starts failing, Failed
/// on a conflicting or otherwise permanently invalid spec.
fn derive_phase(
    components: &[(i32, i32)],
    previous_phase: &StormClusterPhase,
    probe_succeeded: Option<bool>,
    validation_error: Option<&str>,
) -> StormClusterPhase {
    if validation_error.is_some() {
        return StormClusterPhase::Failed;
    }
    let all_ready = components.iter().all(|(ready, desired)| ready >= desired);
    if !all_ready {
        return StormClusterPhase::Creating;
    }
    match probe_succeeded {
        Some(true) => StormClusterPhase::Ready,
        Some(false) => {
            if *previous_phase == StormClusterPhase::Ready {
                StormClusterPhase::Degraded
            } else {
                StormClusterPhase::Creating
            }
        }
        // No UI deployed: readiness of the declared workloads is the only
        // signal available, so consider the cluster Ready once they're up.
        None => StormClusterPhase::Ready,
    }
}

/// Thin wrapper enforcing `ctx.config.reconcile_timeout` around the actual
/// reconcile body, so a Nimbus/apiserver call that never returns can't wedge
/// the controller's worker forever.
pub async fn reconcile_cluster(cluster: Arc<StormCluster>, ctx: Arc<Context<Deployment>>) -> Result<Action> {
    let timeout = ctx.config.reconcile_timeout;
    match tokio::time::timeout(timeout, reconcile_cluster_inner(cluster, ctx)).await {
        Ok(result) => result,
        Err(_) => Err(Error::ReconcileTimeout),
    }
}

#[instrument(skip(ctx, cluster), fields(trace_id))]
async fn reconcile_cluster_inner(
    cluster: Arc<StormCluster>,
    ctx: Arc<Context<Deployment>>,
) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));

    let namespace = cluster.namespace().ok_or_else(|| {
        Error::UserInputError("StormCluster resource must be namespaced".to_owned())
    })?;
    let name = cluster.name_any();
    let _timer = ctx.metrics.count_and_measure(CONTROLLER_ID, &namespace, &name, &trace_id);
    let client = ctx.client.clone();

    info!(msg = "reconciling storm cluster", %namespace, %name);

    if let Some(msg) = validate_spec(&cluster.spec) {
        warn!(msg = "stormcluster spec failed validation", %namespace, %name, error = %msg);
        let status = StormClusterStatus {
            phase: StormClusterPhase::Failed,
            observed_generation: cluster.meta().generation,
            nimbus_endpoint: None,
            supervisor_endpoint: None,
            ui_endpoint: None,
            conditions: Some(vec![condition("Ready", false, "ValidationFailed", msg)]),
        };
        let api: Api<StormCluster> = Api::namespaced(client, &namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(patch))
            .await
            .map_err(Error::from)?;
        return Ok(Action::requeue(Duration::from_secs(5 * 60)));
    }

    let mut components = Vec::new();
    components.push(apply_nimbus(client.clone(), &cluster, &namespace).await?);
    components.push(apply_supervisor(client.clone(), &cluster, &namespace).await?);
    if let Some(ui_ready) = apply_ui(client.clone(), &cluster, &namespace).await? {
        components.push(ui_ready);
    }
    if let Some(zk_ready) = apply_zookeeper(client.clone(), &cluster, &namespace).await? {
        components.push(zk_ready);
    }

    let ui_enabled = cluster.spec.ui.as_ref().map(|u| u.enabled).unwrap_or(false);
    let probe_succeeded = if ui_enabled && components.iter().all(|(r, d)| r >= d) {
        let endpoint = format!("http://{}.{namespace}.svc.cluster.local:{UI_PORT}", ui_name(&name));
        let api_client = StormApiClient::new(endpoint).with_metrics(ctx.metrics.api.clone());
        match api_client.get_cluster_info(PROBE_DEADLINE).await {
            Ok(_) => Some(true),
            Err(e) => {
                warn!(msg = "cluster readiness probe failed", %namespace, %name, %e);
                Some(false)
            }
        }
    } else if ui_enabled {
        Some(false)
    } else {
        None
    };

    let previous_phase = cluster
        .status
        .as_ref()
        .map(|s| s.phase.clone())
        .unwrap_or_default();
    let phase = derive_phase(&components, &previous_phase, probe_succeeded, None);

    let ready_condition = condition(
        "Ready",
        phase == StormClusterPhase::Ready,
        match phase {
            StormClusterPhase::Ready => "AllComponentsReady",
            StormClusterPhase::Degraded => "ProbeFailing",
            StormClusterPhase::Creating => "ComponentsProvisioning",
            StormClusterPhase::Pending => "AwaitingComponents",
            StormClusterPhase::Failed => "ValidationFailed",
        },
        format!("{components:?}"),
    );

    let status = StormClusterStatus {
        phase: phase.clone(),
        observed_generation: cluster.meta().generation,
        nimbus_endpoint: Some(format!("{}.{namespace}.svc.cluster.local:{NIMBUS_PORT}", nimbus_name(&name))),
        supervisor_endpoint: Some(format!("{}.{namespace}.svc.cluster.local", supervisor_name(&name))),
        ui_endpoint: if ui_enabled {
            Some(format!("http://{}.{namespace}.svc.cluster.local:{UI_PORT}", ui_name(&name)))
        } else {
            None
        },
        conditions: Some(vec![ready_condition]),
    };

    let api: Api<StormCluster> = Api::namespaced(client, &namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(patch))
        .await
        .map_err(Error::from)?;

    let requeue = match phase {
        StormClusterPhase::Ready => Duration::from_secs(60),
        StormClusterPhase::Failed => Duration::from_secs(5 * 60),
        _ => Duration::from_secs(10),
    };
    Ok(Action::requeue(requeue))
}

pub fn on_error(obj: &Arc<StormCluster>, error: &Error, ctx: &Context<Deployment>) -> Action {
    error_policy(CONTROLLER_ID, obj, error, &ctx.metrics)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pending_until_components_exist() {
        let phase = derive_phase(&[(0, 1)], &StormClusterPhase::Pending, None, None);
        assert_eq!(phase, StormClusterPhase::Creating);
    }

    #[test]
    fn ready_when_all_components_up_and_no_ui_to_probe() {
        let phase = derive_phase(&[(1, 1), (3, 3)], &StormClusterPhase::Pending, None, None);
        assert_eq!(phase, StormClusterPhase::Ready);
    }

    #[test]
    fn ready_when_probe_succeeds() {
        let phase = derive_phase(&[(1, 1)], &StormClusterPhase::Pending, Some(true), None);
        assert_eq!(phase, StormClusterPhase::Ready);
    }

    #[test]
    fn degrades_from_ready_when_probe_starts_failing() {
        let phase = derive_phase(&[(1, 1)], &StormClusterPhase::Ready, Some(false), None);
        assert_eq!(phase, StormClusterPhase::Degraded);
    }

    #[test]
    fn stays_creating_when_probe_fails_before_first_ready() {
        let phase = derive_phase(&[(1, 1)], &StormClusterPhase::Creating, Some(false), None);
        assert_eq!(phase, StormClusterPhase::Creating);
    }

    #[test]
    fn failed_overrides_everything_else_when_validation_fails() {
        let phase = derive_phase(&[(1, 1)], &StormClusterPhase::Ready, Some(true), Some("bad config"));
        assert_eq!(phase, StormClusterPhase::Failed);
    }

    fn base_spec() -> StormClusterSpec {
        StormClusterSpec {
            nimbus: storm_types::cluster::NimbusSpec {
                replicas: 1,
                ..Default::default()
            },
            supervisor: storm_types::cluster::SupervisorSpec {
                replicas: 1,
                worker_slots: 4,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn rejects_conflicting_zookeeper_config() {
        let mut spec = base_spec();
        spec.zookeeper = Some(storm_types::cluster::ZookeeperSpec {
            enabled: true,
            external_servers: vec!["zk-0.example.test:2181".to_owned()],
            chroot_path: "/storm".to_owned(),
        });
        assert!(validate_spec(&spec).is_some());
    }

    #[test]
    fn rejects_ui_auth_without_ui_enabled() {
        let mut spec = base_spec();
        spec.ui = Some(storm_types::cluster::UiSpec {
            enabled: false,
            service_type: "ClusterIP".to_owned(),
            auth: Some(storm_types::cluster::AuthSpec {
                secret_name: "creds".to_owned(),
            }),
        });
        assert!(validate_spec(&spec).is_some());
    }

    #[test]
    fn accepts_default_spec() {
        assert!(validate_spec(&base_spec()).is_none());
    }
}
