use crate::cluster::reconcile::{self, CONTROLLER_ID};
use crate::controller::{scoped, ControllerId, State};
use crate::metrics;

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{ListParams, ResourceExt};
use kube::client::Client;
use kube::runtime::controller::{self, Controller};
use kube::runtime::reflector::{self, ReflectHandle};
use kube::runtime::{watcher, WatchStreamExt};
use storm_types::cluster::StormCluster;
use tracing::{debug, error, info};

pub const ID: ControllerId = CONTROLLER_ID;

const SUBSCRIBE_BUFFER_SIZE: usize = 256;
const RELOAD_BUFFER_SIZE: usize = 16;

/// Drives every `StormCluster` in the watched scope, triggering extra
/// reconciles when an owned `Deployment` changes underneath it.
pub async fn run(state: State, client: Client) {
    let config = state.config();
    let namespace = config.namespace.as_deref();
    let clusters = scoped::<StormCluster>(client.clone(), namespace);
    if let Err(e) = clusters.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let (deployment_store, writer) = reflector::store_shared(SUBSCRIBE_BUFFER_SIZE);
    let subscriber: ReflectHandle<Deployment> = writer
        .subscribe()
        .expect("subscribers can only be created from shared stores");

    let (reload_tx, reload_rx) = futures::channel::mpsc::channel(RELOAD_BUFFER_SIZE);
    let deployment = scoped::<Deployment>(client.clone(), namespace);
    let ctx = state.to_context(client, ID, deployment_store);

    let deployment_watch = watcher(
        deployment.clone(),
        watcher::Config::default().labels("app.kubernetes.io/managed-by=storm-operator"),
    )
    .default_backoff()
    .reflect_shared(writer)
    .for_each(|res| {
        let mut reload_tx_clone = reload_tx.clone();
        let ctx = ctx.clone();
        async move {
            match res {
                Ok(watcher::Event::Delete(d)) => {
                    debug!(msg = "deleted deployment", namespace = ?d.namespace(), name = d.name_any());
                    let _ignore = reload_tx_clone
                        .try_send(())
                        .map_err(|e| error!(msg = "failed to trigger reconcile on delete", %e));
                    ctx.metrics.triggered_inc(metrics::Action::Delete, "Deployment");
                }
                Ok(watcher::Event::Apply(d)) => {
                    debug!(msg = "applied deployment", namespace = ?d.namespace(), name = d.name_any());
                    ctx.metrics.triggered_inc(metrics::Action::Apply, "Deployment");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(msg = "unexpected error when watching resource", %e);
                    ctx.metrics.watch_operations_failed_inc();
                }
            }
        }
    });

    info!(msg = "starting stormcluster controller");
    let cluster_controller = Controller::new(clusters, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().debounce(config.reconcile_debounce))
        .owns_shared_stream(subscriber)
        .reconcile_all_on(reload_rx.map(|_| ()))
        .shutdown_on_signal()
        .run(
            reconcile::reconcile_cluster,
            |obj, error, ctx| reconcile::on_error(&obj, error, &ctx),
            ctx.clone(),
        )
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()));

    ctx.metrics.ready_set(1);
    tokio::select! {
        _ = cluster_controller => {},
        _ = deployment_watch => {}
    }
}
