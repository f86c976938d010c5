use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[cfg(feature = "schemars")]
use schemars::JsonSchema;

/// Specification of an optional dedicated worker deployment scaling unit for
/// a single `StormTopology`.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[kube(
    group = "storm.apache.org",
    version = "v1beta1",
    kind = "StormWorkerPool",
    plural = "stormworkerpools",
    singular = "stormworkerpool",
    shortname = "stwp",
    namespaced,
    status = "StormWorkerPoolStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct StormWorkerPoolSpec {
    /// Name of the `StormTopology` this pool serves, in the same namespace.
    pub topology_ref: String,

    /// Fixed replica count. Mutually exclusive with `autoscaling` in practice,
    /// though both may be set; `autoscaling`, when present, owns the replica count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Base pod template; the reconciler defaults missing resource requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplateSpec>,

    /// Contiguous range of worker slot ports exposed by each pod.
    #[serde(default)]
    pub port_range: PortRangeSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<AutoscalingSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct PortRangeSpec {
    #[serde(default = "default_port_range_start")]
    pub start: i32,
    #[serde(default = "default_port_range_count")]
    pub count: i32,
}

fn default_port_range_start() -> i32 {
    6700
}

fn default_port_range_count() -> i32 {
    4
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingSpec {
    #[serde(default = "default_min_replicas")]
    pub min_replicas: i32,
    pub max_replicas: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<i32>,
    #[serde(default)]
    pub custom_metrics: Vec<CustomMetricSpec>,
}

fn default_min_replicas() -> i32 {
    1
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct CustomMetricSpec {
    pub name: String,
    pub target_average_value: String,
}

/// Most recently observed status of a `StormWorkerPool`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct StormWorkerPoolStatus {
    #[serde(default)]
    pub phase: StormWorkerPoolPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "PascalCase")]
pub enum StormWorkerPoolPhase {
    #[default]
    Pending,
    Creating,
    Ready,
    Degraded,
    Failed,
}
