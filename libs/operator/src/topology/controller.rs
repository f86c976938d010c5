use crate::controller::{scoped, ControllerId, State};
use crate::metrics;
use crate::topology::reconcile::{self, CONTROLLER_ID};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{ListParams, ResourceExt};
use kube::client::Client;
use kube::runtime::controller::{self, Controller};
use kube::runtime::reflector::{self, ReflectHandle};
use kube::runtime::{watcher, WatchStreamExt};
use storm_types::topology::StormTopology;
use tracing::{debug, error, info};

pub const ID: ControllerId = CONTROLLER_ID;

const SUBSCRIBE_BUFFER_SIZE: usize = 256;
const RELOAD_BUFFER_SIZE: usize = 16;

/// Drives every `StormTopology` in the watched scope. Reflects the jar
/// extraction `Job`s the operator owns so a completed or failed extraction
/// triggers an immediate reconcile instead of waiting for the topology's
/// own poll interval.
pub async fn run(state: State, client: Client) {
    let config = state.config();
    let namespace = config.namespace.as_deref();
    let topologies = scoped::<StormTopology>(client.clone(), namespace);
    if let Err(e) = topologies.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let (job_store, writer) = reflector::store_shared(SUBSCRIBE_BUFFER_SIZE);
    let subscriber: ReflectHandle<Job> = writer
        .subscribe()
        .expect("subscribers can only be created from shared stores");

    let (reload_tx, reload_rx) = futures::channel::mpsc::channel(RELOAD_BUFFER_SIZE);
    let jobs = scoped::<Job>(client.clone(), namespace);
    let ctx = state.to_context(client, ID, job_store);

    let job_watch = watcher(
        jobs.clone(),
        watcher::Config::default().labels("app.kubernetes.io/managed-by=storm-operator"),
    )
    .default_backoff()
    .reflect_shared(writer)
    .for_each(|res| {
        let mut reload_tx_clone = reload_tx.clone();
        let ctx = ctx.clone();
        async move {
            match res {
                Ok(watcher::Event::Apply(j)) => {
                    let complete = j
                        .status
                        .as_ref()
                        .and_then(|s| s.succeeded)
                        .unwrap_or(0)
                        > 0;
                    debug!(msg = "applied jar extraction job", namespace = ?j.namespace(), name = j.name_any(), complete);
                    if complete {
                        let _ignore = reload_tx_clone
                            .try_send(())
                            .map_err(|e| error!(msg = "failed to trigger reconcile on job completion", %e));
                    }
                    ctx.metrics.triggered_inc(metrics::Action::Apply, "Job");
                }
                Ok(watcher::Event::Delete(j)) => {
                    debug!(msg = "deleted jar extraction job", namespace = ?j.namespace(), name = j.name_any());
                    ctx.metrics.triggered_inc(metrics::Action::Delete, "Job");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(msg = "unexpected error when watching resource", %e);
                    ctx.metrics.watch_operations_failed_inc();
                }
            }
        }
    });

    info!(msg = "starting stormtopology controller");
    let topology_controller = Controller::new(topologies, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().debounce(config.reconcile_debounce))
        .owns_shared_stream(subscriber)
        .reconcile_all_on(reload_rx.map(|_| ()))
        .shutdown_on_signal()
        .run(
            reconcile::reconcile_topology,
            |obj, error, ctx| reconcile::on_error(&obj, error, &ctx),
            ctx.clone(),
        )
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()));

    ctx.metrics.ready_set(1);
    tokio::select! {
        _ = topology_controller => {},
        _ = job_watch => {}
    }
}
