use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use storm_operator::cluster;
use storm_operator::collector;
use storm_operator::controller::{OperatorConfig, State};
use storm_operator::leader::{self, LeaderElectionConfig, LeaderExit};
use storm_operator::metrics::Metrics;
use storm_operator::telemetry;
use storm_operator::topology;
use storm_operator::workerpool;
use storm_operator_k8s_util::client::new_client_with_metrics;
use storm_operator_k8s_util::shutdown::{shutdown_signal, signal_ready};

use std::path::PathBuf;
use std::time::Duration;

use clap::{crate_authors, crate_description, crate_version, Parser};
use kube::Client;
use kube::Config;
use prometheus_client::registry::Registry;
use tokio_util::sync::CancellationToken;

#[get("/metrics")]
async fn metrics(state: Data<State>, _req: HttpRequest) -> impl Responder {
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(state.metrics_text())
}

#[get("/healthz")]
async fn healthz(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/readyz")]
async fn readyz(state: Data<State>, _req: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json(state.diagnostics().await)
}

#[derive(Parser, Debug)]
#[command(
    name = "storm-operator",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Bind address for the `/metrics` endpoint.
    #[arg(long, default_value = "0.0.0.0:8080", env)]
    metrics_bind_address: String,

    /// Bind address for the `/healthz` and `/readyz` endpoints.
    #[arg(long, default_value = "0.0.0.0:8081", env)]
    health_probe_bind_address: String,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`. Example: "info,kube=debug,storm_operator=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint.
    ///
    /// This optional argument specifies the URL to which traces will be sent using
    /// OpenTelemetry. If not provided, tracing will be disabled.
    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    #[arg(short, long, default_value_t = 0.1, env)]
    sample_ratio: f64,

    /// Restricts every controller's watch/list to a single namespace.
    /// Unset watches cluster-wide.
    #[arg(long, env)]
    storm_namespace: Option<String>,

    /// Directory (or the root of a shared PVC mount) resolved topology jars
    /// are cached under.
    #[arg(long, default_value = "/var/lib/storm-operator/jar-cache", env)]
    jar_cache_dir: PathBuf,

    /// Deadline, in seconds, applied to every non-submission Nimbus REST
    /// call (`SubmitTopology` gets its own longer, fixed deadline since it
    /// uploads the jar itself).
    #[arg(long, default_value_t = 15, env)]
    nimbus_timeout_seconds: u64,

    /// Minimum interval, in seconds, between two reconciles of the same
    /// object triggered by unrelated watch events.
    #[arg(long, default_value_t = 1, env)]
    reconcile_interval: u64,

    /// Upper bound, in seconds, on a topology's declared
    /// `extractionTimeoutSeconds`; the smaller of the two is always used.
    #[arg(long, default_value_t = 600, env)]
    extraction_timeout: u64,

    /// How often the cluster-status collector polls every ready
    /// `StormCluster`'s Nimbus API for cluster/topology metrics.
    #[arg(long, default_value_t = 30, env)]
    collector_interval_seconds: u64,

    /// Run leader election before starting the controllers, so only one of
    /// several operator replicas reconciles at a time.
    #[arg(long, default_value_t = false, env)]
    leader_elect: bool,

    /// Name of the `coordination.k8s.io/v1` Lease used for leader election.
    #[arg(long, default_value = "storm-operator-leader", env)]
    lease_name: String,

    /// Namespace the leader-election Lease is created in.
    #[arg(long, default_value = "default", env = "POD_NAMESPACE")]
    lease_namespace: String,
}

async fn run_controllers(state: State, client: Client, collector_interval: Duration, shutdown: CancellationToken) {
    tokio::join!(
        cluster::run(state.clone(), client.clone()),
        topology::run(state.clone(), client.clone()),
        workerpool::run(state.clone(), client.clone()),
        collector::run(client, state.metrics(), shutdown, collector_interval),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();

    telemetry::init(
        &args.log_filter,
        args.log_format,
        args.tracing_url.as_deref(),
        args.sample_ratio,
    )
    .await?;

    let mut registry = Registry::with_prefix("storm");
    let config = Config::infer().await?;
    let client = new_client_with_metrics(config, &mut registry).await?;

    let operator_config = OperatorConfig {
        jar_cache_dir: args.jar_cache_dir.clone(),
        nimbus_timeout: Duration::from_secs(args.nimbus_timeout_seconds),
        namespace: args.storm_namespace.clone(),
        reconcile_debounce: Duration::from_secs(args.reconcile_interval),
        extraction_timeout_ceiling: Duration::from_secs(args.extraction_timeout),
        ..Default::default()
    };
    let state = State::with_metrics(operator_config, Metrics::new(registry));

    let collector_interval = Duration::from_secs(args.collector_interval_seconds);
    let shutdown = CancellationToken::new();

    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
    };

    let controllers = {
        let state = state.clone();
        let client = client.clone();
        let shutdown = shutdown.clone();
        let leader_elect = args.leader_elect;
        let lease_name = args.lease_name.clone();
        let lease_namespace = args.lease_namespace.clone();
        async move {
            if leader_elect {
                let lease = LeaderElectionConfig::from_env(lease_name, lease_namespace);
                let exit = leader::run_while_leader(client.clone(), lease, shutdown.clone(), move || {
                    let state = state.clone();
                    let client = client.clone();
                    let shutdown = shutdown.clone();
                    run_controllers(state, client, collector_interval, shutdown)
                })
                .await;
                if exit == LeaderExit::LeaseLost {
                    tracing::error!("lost leadership and will not attempt to reacquire it; exiting");
                    std::process::exit(2);
                }
            } else {
                run_controllers(state, client, collector_interval, shutdown).await;
            }
        }
    };

    signal_ready();
    let state_data = state.clone();
    let metrics_server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state_data.clone()))
            .wrap(middleware::Logger::default())
            .service(metrics)
    })
    .bind(args.metrics_bind_address.clone())?
    .shutdown_timeout(5);

    let health_server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/healthz"))
            .service(healthz)
            .service(readyz)
    })
    .bind(args.health_probe_bind_address.clone())?
    .shutdown_timeout(5);

    // All three controllers handle their own shutdown signal internally
    // (kube-runtime's `shutdown_on_signal`); the collector and the two
    // servers are driven off the same `CancellationToken` so everything
    // stops together.
    let (_, metrics_result, health_result, _) = tokio::join!(
        controllers,
        metrics_server.run(),
        health_server.run(),
        signal_task
    );
    metrics_result?;
    health_result?;
    Ok(())
}
