//! Independent polling loop that publishes live Nimbus-observed cluster and
//! topology state as Prometheus gauges, separate from the reconcile loops
//! (which only touch the Storm REST API incidentally, while driving phase
//! transitions). Runs once per tick regardless of whether any `StormCluster`
//! changed, since Nimbus-side state (worker/executor counts, uptime) drifts
//! independently of the Kubernetes objects.

use crate::error::Error;
use crate::metrics::{ClusterInfoLabels, ClusterLabels, ClusterSlotLabels, Metrics, TopologyInfoLabels, TopologyLabels};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use storm_client::{Credentials, StormApiClient};
use storm_types::cluster::{StormCluster, StormClusterPhase};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

const DEADLINE: Duration = Duration::from_secs(10);

/// Runs until `shutdown` is cancelled, polling every `interval`.
pub async fn run(client: Client, metrics: Arc<Metrics>, shutdown: CancellationToken, interval: Duration) {
    let mut tick = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tick.tick() => {}
        }
        collect_once(&client, &metrics).await;
    }
}

#[instrument(skip(client, metrics))]
async fn collect_once(client: &Client, metrics: &Arc<Metrics>) {
    let clusters: Api<StormCluster> = Api::all(client.clone());
    let list = match clusters.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            warn!(msg = "failed to list storm clusters for metrics collection", %e);
            return;
        }
    };

    for cluster in list.items {
        if cluster.status.as_ref().map(|s| s.phase.clone()).unwrap_or_default() != StormClusterPhase::Ready {
            continue;
        }
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        if let Err(e) = collect_cluster(client, metrics, &cluster, &namespace, &name).await {
            warn!(msg = "skipping metrics collection for cluster this tick", %namespace, %name, %e);
        }
    }
}

async fn collect_cluster(
    client: &Client,
    metrics: &Arc<Metrics>,
    cluster: &StormCluster,
    namespace: &str,
    name: &str,
) -> Result<(), Error> {
    let Some(endpoint) = cluster.status.as_ref().and_then(|s| s.ui_endpoint.clone()) else {
        debug!(msg = "cluster has no storm rest endpoint, skipping", %namespace, %name);
        return Ok(());
    };

    let mut api_client = StormApiClient::new(format!("http://{endpoint}")).with_metrics(metrics.api.clone());
    if let Some(auth) = cluster.spec.ui.as_ref().and_then(|ui| ui.auth.as_ref()) {
        let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
        let secret = secrets.get(&auth.secret_name).await?;
        let data = secret.data.unwrap_or_default();
        let username = secret_key(&data, "username")?;
        let password = secret_key(&data, "password")?;
        api_client = api_client.with_credentials(Some(Credentials { username, password }));
    }

    let info = api_client.get_cluster_info(DEADLINE).await?;
    metrics
        .storm
        .cluster_info
        .get_or_create(&ClusterInfoLabels {
            cluster: name.to_owned(),
            namespace: namespace.to_owned(),
            version: info.storm_version.clone(),
        })
        .set(1);
    metrics
        .storm
        .cluster_supervisors_total
        .get_or_create(&ClusterLabels {
            cluster: name.to_owned(),
            namespace: namespace.to_owned(),
        })
        .set(info.supervisors);
    for (state, value) in [
        ("total", info.slots_total),
        ("used", info.slots_used),
        ("free", info.slots_free),
    ] {
        metrics
            .storm
            .cluster_slots_total
            .get_or_create(&ClusterSlotLabels {
                cluster: name.to_owned(),
                namespace: namespace.to_owned(),
                state,
            })
            .set(value);
    }

    let topologies = api_client.list_topologies(DEADLINE).await?;
    for summary in topologies.topologies {
        match api_client.get_topology(&summary.name, DEADLINE).await {
            Ok(topo_info) => record_topology(metrics, namespace, name, &summary.name, &topo_info),
            Err(e) => {
                warn!(msg = "failed to fetch topology detail during metrics collection", %namespace, cluster = %name, topology = %summary.name, %e);
            }
        }
    }

    Ok(())
}

fn record_topology(metrics: &Arc<Metrics>, namespace: &str, cluster: &str, topology: &str, info: &storm_client::model::TopologyInfo) {
    let labels = TopologyLabels {
        topology: topology.to_owned(),
        namespace: namespace.to_owned(),
    };
    metrics.storm.topology_workers_total.get_or_create(&labels).set(info.workers);
    metrics.storm.topology_executors_total.get_or_create(&labels).set(info.executors);
    metrics.storm.topology_tasks_total.get_or_create(&labels).set(info.tasks);
    metrics.storm.topology_uptime_seconds.get_or_create(&labels).set(info.uptime_seconds);
    metrics
        .storm
        .topology_info
        .get_or_create(&TopologyInfoLabels {
            topology: topology.to_owned(),
            namespace: namespace.to_owned(),
            cluster: cluster.to_owned(),
            status: "active",
        })
        .set(1);
}

fn secret_key(data: &BTreeMap<String, k8s_openapi::ByteString>, key: &str) -> Result<String, Error> {
    let bytes = data
        .get(key)
        .ok_or_else(|| Error::UserInputError(format!("secret is missing key {key}")))?;
    String::from_utf8(bytes.0.clone())
        .map_err(|e| Error::UserInputError(format!("secret key {key} is not valid utf-8: {e}")))
}
