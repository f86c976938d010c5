use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[cfg(feature = "schemars")]
use schemars::JsonSchema;

use crate::common::{ChecksumSpec, JarSourceSpec};

/// Specification of a topology to submit to a referenced `StormCluster`'s Nimbus.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[kube(
    group = "storm.apache.org",
    version = "v1beta1",
    kind = "StormTopology",
    plural = "stormtopologies",
    singular = "stormtopology",
    shortname = "sto",
    namespaced,
    status = "StormTopologyStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterRef"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct StormTopologySpec {
    /// Name of the `StormCluster` this topology is submitted to, in the same namespace.
    pub cluster_ref: String,

    /// The name Nimbus will register the topology under. Defaults to the resource's own name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topology_name: Option<String>,

    /// Exactly one of `url`, `container`, `s3` must be populated.
    pub jar_source: JarSourceSpec,

    /// Fully-qualified class implementing the topology's `main`.
    pub main_class: String,

    /// Arguments passed to `mainClass`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Per-topology Storm configuration overrides, merged over the cluster's `config`.
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Expected checksum of the resolved JAR. When absent, no comparison is performed
    /// beyond the one computed during/after download.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ChecksumSpec>,

    /// When true, the topology is deactivated in Nimbus but its Kubernetes resource and
    /// Nimbus registration are retained.
    #[serde(default)]
    pub suspend: bool,

    /// Seconds to wait for Nimbus to acknowledge a kill before giving up and retrying.
    #[serde(default = "default_kill_wait_seconds")]
    pub kill_wait_seconds: i64,

    /// Interval between `GetTopology` polls while `Running`.
    #[serde(default = "default_reconcile_interval_seconds")]
    pub reconcile_interval_seconds: i64,

    /// Bound on how long JAR extraction may take before it is a permanent failure.
    #[serde(default = "default_extraction_timeout_seconds")]
    pub extraction_timeout_seconds: i64,
}

fn default_kill_wait_seconds() -> i64 {
    30
}

fn default_reconcile_interval_seconds() -> i64 {
    30
}

fn default_extraction_timeout_seconds() -> i64 {
    300
}

/// Most recently observed status of a `StormTopology`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct StormTopologyStatus {
    #[serde(default)]
    pub phase: StormTopologyPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_jar_checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<Time>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topology_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
    /// Consecutive reconcile attempts since the last successful phase advance,
    /// reset to 0 on any transition. Feeds the exponential backoff applied
    /// while waiting on an external precondition (e.g. the referenced cluster
    /// becoming Ready).
    #[serde(default)]
    pub retry_attempt: u32,
}

/// The topology lifecycle state machine. See the transition table in
/// the topology reconciler for the permitted edges.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "PascalCase")]
pub enum StormTopologyPhase {
    #[default]
    Pending,
    Validating,
    Downloading,
    Submitting,
    Running,
    Suspended,
    Updating,
    Killing,
    Killed,
    Failed,
}
