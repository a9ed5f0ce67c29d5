//! Logging, tracing and metrics for the admin plane.
//!
//! `init_observability` installs a `tracing` subscriber filtered by
//! `RUST_LOG` (default `info`), adds OTLP span export when an exporter can be
//! built, and installs the Prometheus recorder. Every step runs once per
//! process; later calls return the same metrics handle.
use axum::http::HeaderMap;
use metrics::Unit;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::global;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static SUBSCRIBER: OnceLock<()> = OnceLock::new();
static PROPAGATOR: OnceLock<()> = OnceLock::new();
static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_observability(service_name: &str) -> PrometheusHandle {
    install_propagator();
    SUBSCRIBER.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let base = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());
        let installed = match otlp_provider(service_name) {
            Some(provider) => base
                .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("adminplane")))
                .try_init(),
            None => base.try_init(),
        };
        if installed.is_err() {
            tracing::debug!("tracing subscriber already installed");
        }
    });
    RECORDER
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("install metrics recorder");
            describe_metrics();
            handle
        })
        .clone()
}

fn install_propagator() {
    PROPAGATOR.get_or_init(|| global::set_text_map_propagator(TraceContextPropagator::new()));
}

/// OTLP span export over gRPC; `None` when no exporter can be built.
fn otlp_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .ok()?;
    let resource = Resource::builder_empty()
        .with_attributes([
            KeyValue::new("service.name", service_name.to_string()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build();
    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

fn describe_metrics() {
    metrics::describe_gauge!(
        "adminplane_permissions_total",
        Unit::Count,
        "Permission records after the last reconciliation"
    );
    metrics::describe_gauge!(
        "adminplane_menus_total",
        Unit::Count,
        "Menu rows after the last reconciliation"
    );
    metrics::describe_counter!(
        "adminplane_reconcile_row_failures_total",
        Unit::Count,
        "Rows skipped by the non-fatal reconciliation steps"
    );
    metrics::describe_counter!(
        "adminplane_policy_sync_failures_total",
        Unit::Count,
        "Policy engine updates that failed after a relational commit"
    );
    metrics::describe_counter!(
        "adminplane_policy_denials_total",
        Unit::Count,
        "Admin requests refused by the policy engine"
    );
}

/// Parent context carried by an inbound `traceparent` header, if any.
pub fn trace_context_from_headers(headers: &HeaderMap) -> Context {
    install_propagator();
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderCarrier(headers)))
}

struct HeaderCarrier<'a>(&'a HeaderMap);

impl Extractor for HeaderCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key)?.to_str().ok()
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Serve `/metrics` on its own listener until the task is aborted.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "metrics listening");
    metrics_server(handle, listener, std::future::pending()).await
}

async fn metrics_server<F>(
    handle: PrometheusHandle,
    listener: TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
