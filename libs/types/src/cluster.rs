use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[cfg(feature = "schemars")]
use schemars::JsonSchema;

use crate::common::ImageSpec;

/// Specification of the desired state of an Apache Storm cluster: the
/// Nimbus/Supervisor/UI/Zookeeper workloads the cluster reconciler
/// materializes, plus cluster-wide Storm configuration.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[kube(
    group = "storm.apache.org",
    version = "v1beta1",
    kind = "StormCluster",
    plural = "stormclusters",
    singular = "stormcluster",
    shortname = "stc",
    namespaced,
    status = "StormClusterStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type == 'Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct StormClusterSpec {
    /// Container image coordinates shared by every workload the cluster reconciler creates.
    pub image: ImageSpec,

    /// Nimbus master daemon sizing and persistence.
    #[serde(default)]
    pub nimbus: NimbusSpec,

    /// Supervisor worker-host daemon sizing and slot count.
    #[serde(default)]
    pub supervisor: SupervisorSpec,

    /// Optional Storm UI deployment and service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiSpec>,

    /// Optional embedded or external Zookeeper ensemble.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zookeeper: Option<ZookeeperSpec>,

    /// Free-form `storm.yaml` configuration keys merged into every managed workload.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct NimbusSpec {
    #[serde(default = "default_nimbus_replicas")]
    pub replicas: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence: Option<PersistenceSpec>,
}

fn default_nimbus_replicas() -> i32 {
    1
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct PersistenceSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    #[serde(default = "default_storage_size")]
    pub size: String,
}

fn default_storage_size() -> String {
    "10Gi".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SupervisorSpec {
    #[serde(default = "default_supervisor_replicas")]
    pub replicas: i32,
    #[serde(default = "default_worker_slots")]
    pub worker_slots: i32,
    #[serde(default)]
    pub deployment_mode: crate::common::DeploymentMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

fn default_supervisor_replicas() -> i32 {
    1
}

fn default_worker_slots() -> i32 {
    4
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct UiSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSpec>,
}

fn default_service_type() -> String {
    "ClusterIP".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    pub secret_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ZookeeperSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub external_servers: Vec<String>,
    #[serde(default = "default_chroot_path")]
    pub chroot_path: String,
}

fn default_chroot_path() -> String {
    "/storm".to_string()
}

/// Most recently observed status of a `StormCluster`. Written exclusively via
/// the `/status` subresource by the cluster reconciler.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct StormClusterStatus {
    #[serde(default)]
    pub phase: StormClusterPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nimbus_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supervisor_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "PascalCase")]
pub enum StormClusterPhase {
    #[default]
    Pending,
    Creating,
    Ready,
    Degraded,
    Failed,
}
