use serde::{Deserialize, Serialize};

/// `GET /api/v1/cluster/summary` response, trimmed to the fields the
/// metrics collector and cluster reconciler actually consume.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterSummary {
    #[serde(rename = "stormVersion")]
    pub storm_version: String,
    #[serde(rename = "supervisors")]
    pub supervisors: i64,
    #[serde(rename = "slotsTotal")]
    pub slots_total: i64,
    #[serde(rename = "slotsUsed")]
    pub slots_used: i64,
    #[serde(rename = "slotsFree")]
    pub slots_free: i64,
}

/// `GET /api/v1/topology/summary` response.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TopologySummaryList {
    #[serde(default)]
    pub topologies: Vec<TopologySummary>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopologySummary {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(rename = "uptimeSeconds")]
    pub uptime_seconds: i64,
    #[serde(rename = "numWorkers")]
    pub num_workers: i64,
    #[serde(rename = "numExecutors")]
    pub num_executors: i64,
    #[serde(rename = "numTasks")]
    pub num_tasks: i64,
}

/// `GET /api/v1/topology/{id}` response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopologyInfo {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(rename = "uptimeSeconds")]
    pub uptime_seconds: i64,
    #[serde(default, rename = "workers")]
    pub workers: i64,
    #[serde(default, rename = "executors")]
    pub executors: i64,
    #[serde(default, rename = "tasks")]
    pub tasks: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TopologyMetrics {
    #[serde(default)]
    pub workers: i64,
    #[serde(default)]
    pub executors: i64,
    #[serde(default)]
    pub tasks: i64,
    #[serde(default)]
    pub uptime_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitTopologyResponse {
    pub topology_id: String,
}
