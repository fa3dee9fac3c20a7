//! portgate operator binary
//!
//! Runs three controllers over a shared runtime plus the deferred
//! Listener deletion queue. `--crd` prints the CRD manifests and exits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};
use kube::api::ListParams;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::{reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client, CustomResourceExt};
use tokio::sync::watch;
use tracing::{debug, info};

use portgate::cache::DependencyCache;
use portgate::cleanup::{DeletionQueue, KubeListenerDeleter};
use portgate::controller::{ingress, listener, log_reconcile_result, uptime};
use portgate::crd::{Ingress, Listener, MultiClusterEndpointSlice};
use portgate::events::KubeEventPublisher;
use portgate::filters::{
    EndpointsFilter, MultiClusterEndpointSliceFilter, PodFilter, ServiceFilter,
};
use portgate::metrics::Metrics;
use portgate::predicate;
use portgate::telemetry::{init_telemetry, TelemetryConfig};

/// Watch requests time out below the API server's own limit so dropped
/// connections are noticed quickly.
const WATCH_TIMEOUT_SECS: u32 = 25;

#[derive(Parser)]
#[command(name = "portgate", version, about = "Ingress to cloud load-balancer operator")]
struct Cli {
    /// Print the CRD manifests to stdout and exit
    #[arg(long)]
    crd: bool,

    /// OTLP endpoint for traces and metrics; defaults to
    /// $OTEL_EXPORTER_OTLP_ENDPOINT
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Periodic Listener resync interval in seconds; omit to reconcile on
    /// change only
    #[arg(long)]
    listener_resync_secs: Option<u64>,

    /// Deferred deletion sweep interval in seconds
    #[arg(long, default_value_t = 3)]
    deletion_sweep_secs: u64,

    /// Dependency-cache debug dump interval in seconds
    #[arg(long, default_value_t = 300)]
    cache_dump_secs: u64,

    /// Concurrent uptime-check reconciliations
    #[arg(long, default_value_t = 10)]
    uptime_concurrency: u16,
}

fn print_crds() -> anyhow::Result<()> {
    let crds = [
        serde_yaml::to_string(&Ingress::crd())?,
        serde_yaml::to_string(&Listener::crd())?,
        serde_yaml::to_string(&MultiClusterEndpointSlice::crd())?,
    ];
    println!("{}", crds.join("---\n"));
    Ok(())
}

fn watcher_config() -> watcher::Config {
    watcher::Config::default().timeout(WATCH_TIMEOUT_SECS)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        return print_crds();
    }

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    init_telemetry(TelemetryConfig {
        service_name: "portgate".to_string(),
        otlp_endpoint: cli
            .otlp_endpoint
            .or_else(|| std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()),
    })
    .context("telemetry initialization failed")?;

    info!(version = env!("CARGO_PKG_VERSION"), "portgate starting");

    let client = Client::try_default()
        .await
        .context("failed to build kubernetes client")?;
    let metrics = Arc::new(Metrics::new(&opentelemetry::global::meter("portgate")));
    let cache = Arc::new(DependencyCache::new());

    // Ingress controller: reflected trigger stream gated on significant
    // changes, plus dependent-resource watches mapped through the filters.
    let ingress_api: Api<Ingress> = Api::all(client.clone());
    let (ingress_reader, ingress_writer) = reflector::store();
    let ingress_stream = watcher(ingress_api.clone(), watcher_config())
        .default_backoff()
        .reflect(ingress_writer)
        .applied_objects()
        .predicate_filter(predicate::ingress_significant);

    let (service_reader, service_writer) = reflector::store();
    let service_stream = watcher(Api::<Service>::all(client.clone()), watcher_config())
        .default_backoff()
        .reflect(service_writer)
        .applied_objects();

    let ingress_ctx = Arc::new(
        ingress::Context::builder(
            Arc::new(ingress::KubeIngressApi::new(client.clone())),
            Arc::new(ingress::LogOnlyProcessor),
            cache.clone(),
            metrics.clone(),
        )
        .with_events(Arc::new(KubeEventPublisher::new(
            client.clone(),
            "portgate-ingress-controller",
        )))
        .build(),
    );

    // Warm the cache before dependent-resource events start flowing
    let initial = ingress_api
        .list(&ListParams::default())
        .await
        .context("initial ingress listing failed")?;
    ingress_ctx.prime(&initial.items);

    let service_filter = ServiceFilter::new(ingress_reader.clone(), metrics.clone());
    let endpoints_filter = EndpointsFilter::new(cache.clone(), metrics.clone());
    let slice_filter = MultiClusterEndpointSliceFilter::new(cache.clone(), metrics.clone());
    let pod_filter = PodFilter::new(cache.clone(), service_reader, metrics.clone());

    let ingress_controller = Controller::for_stream(ingress_stream, ingress_reader)
        .watches_stream(service_stream, move |service: Service| {
            service_filter.related(&service)
        })
        .watches(
            Api::<Endpoints>::all(client.clone()),
            watcher_config(),
            move |endpoints: Endpoints| endpoints_filter.related(&endpoints),
        )
        .watches(
            Api::<MultiClusterEndpointSlice>::all(client.clone()),
            watcher_config(),
            move |slice: MultiClusterEndpointSlice| slice_filter.related(&slice),
        )
        .watches(
            Api::<Pod>::all(client.clone()),
            watcher_config(),
            move |pod: Pod| pod_filter.related(&pod),
        )
        .shutdown_on_signal()
        .run(ingress::reconcile, ingress::error_policy, ingress_ctx)
        .for_each(log_reconcile_result::<Ingress>("ingress"));

    // Listener dispatch controller
    let listener_api: Api<Listener> = Api::all(client.clone());
    let (listener_reader, listener_writer) = reflector::store();
    let listener_stream = watcher(listener_api.clone(), watcher_config())
        .default_backoff()
        .reflect(listener_writer)
        .applied_objects()
        .predicate_filter(predicate::listener_significant);

    let workers = Arc::new(listener::ListenerWorkers::new(
        Arc::new(listener::LogOnlySyncHandler),
        metrics.clone(),
    ));
    let listener_ctx = Arc::new(listener::Context::new(
        workers,
        metrics.clone(),
        cli.listener_resync_secs.map(Duration::from_secs),
    ));

    let listener_controller = Controller::for_stream(listener_stream, listener_reader)
        .shutdown_on_signal()
        .run(listener::reconcile, listener::error_policy, listener_ctx)
        .for_each(log_reconcile_result::<Listener>("listener"));

    // Uptime-check controller; status writes are cheap so it runs wide
    let uptime_ctx = Arc::new(uptime::Context::new(
        Arc::new(uptime::KubeListenerApi::new(client.clone())),
        Arc::new(uptime::LogOnlyUptimeChecker),
        metrics.clone(),
    ));
    let uptime_controller = Controller::new(listener_api, watcher_config())
        .with_config(ControllerConfig::default().concurrency(cli.uptime_concurrency))
        .shutdown_on_signal()
        .run(uptime::reconcile, uptime::error_policy, uptime_ctx)
        .for_each(log_reconcile_result::<Listener>("uptime"));

    // Background loops
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let deletion_queue = Arc::new(DeletionQueue::new(
        Arc::new(KubeListenerDeleter::new(client.clone())),
        metrics.clone(),
        Duration::from_secs(cli.deletion_sweep_secs),
    ));
    let queue_task = {
        let queue = deletion_queue.clone();
        tokio::spawn(async move { queue.run(shutdown_rx).await })
    };

    let dump_task = {
        let cache = cache.clone();
        let interval = Duration::from_secs(cli.cache_dump_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip the immediate first tick
            loop {
                ticker.tick().await;
                match serde_json::to_string(&cache.dump()) {
                    Ok(dump) => debug!(cache = %dump, "dependency cache dump"),
                    Err(e) => debug!(error = %e, "dependency cache dump failed"),
                }
            }
        })
    };

    tokio::join!(ingress_controller, listener_controller, uptime_controller);

    info!("controllers stopped, draining deletion queue");
    dump_task.abort();
    let _ = shutdown_tx.send(true);
    queue_task.await.context("deletion queue task panicked")?;

    info!("portgate stopped");
    Ok(())
}
