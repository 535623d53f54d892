//! ---
//! pde_section: "03-persistence-logging"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Metrics collection and export utilities."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
//! Prometheus registry shared by the engine, its `/metrics` exporter and the
//! metric families recorded by the daemon and the reconciliation loop.

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Serve `registry` in the text exposition format at `/metrics` on `addr`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new()
        .route("/metrics", get(render))
        .with_state(registry);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure metrics listener as non-blocking")?;
    let addr = listener
        .local_addr()
        .context("failed to read metrics listener address")?;
    let listener = TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        info!(address = %addr, "metrics exporter listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics exporter stopped with an error")
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task,
    })
}

async fn render(State(registry): State<SharedRegistry>) -> Response {
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&registry.gather()) {
        Ok(body) => ([(header::CONTENT_TYPE, encoder.format_type().to_owned())], body).into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await?
    }
}

/// Process-level metrics for `pded`.
#[derive(Clone, Debug)]
pub struct DaemonMetrics {
    starts: IntCounter,
    build_info: IntGaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts = IntCounter::with_opts(Opts::new(
            "pded_starts_total",
            "Times the daemon has started the engine",
        ))?;
        registry.register(Box::new(starts.clone()))?;

        let build_info = IntGaugeVec::new(
            Opts::new("pded_build_info", "Version and build profile of the running daemon"),
            &["version", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self { starts, build_info })
    }

    pub fn inc_start(&self) {
        self.starts.inc();
    }

    pub fn set_build_info(&self, version: &str, profile: &str) {
        self.build_info.with_label_values(&[version, profile]).set(1);
    }
}

/// Reconciliation, inventory and drift metrics.
#[derive(Clone, Debug)]
pub struct EngineMetrics {
    reconciliation_passes: IntCounterVec,
    rules_created: IntCounter,
    rules_deleted: IntCounterVec,
    registry_polls: IntCounterVec,
    live_systems: IntGauge,
    active_alarms: IntGauge,
    pings: IntCounterVec,
}

impl EngineMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let reconciliation_passes = IntCounterVec::new(
            Opts::new(
                "pde_reconciliation_passes_total",
                "Rule reconciliation passes by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(reconciliation_passes.clone()))?;

        let rules_created = IntCounter::with_opts(Opts::new(
            "pde_rules_created_total",
            "Orchestration rules created by the engine",
        ))?;
        registry.register(Box::new(rules_created.clone()))?;

        let rules_deleted = IntCounterVec::new(
            Opts::new(
                "pde_rules_deleted_total",
                "Orchestration rule deletions by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(rules_deleted.clone()))?;

        let registry_polls = IntCounterVec::new(
            Opts::new("pde_registry_polls_total", "Registry inventory polls by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(registry_polls.clone()))?;

        let live_systems = IntGauge::with_opts(Opts::new(
            "pde_live_systems",
            "Systems reported by the last successful registry poll",
        ))?;
        registry.register(Box::new(live_systems.clone()))?;

        let active_alarms = IntGauge::with_opts(Opts::new(
            "pde_active_alarms",
            "Alarms raised and not yet cleared",
        ))?;
        registry.register(Box::new(active_alarms.clone()))?;

        let pings = IntCounterVec::new(
            Opts::new("pde_pings_total", "Liveness pings by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(pings.clone()))?;

        Ok(Self {
            reconciliation_passes,
            rules_created,
            rules_deleted,
            registry_polls,
            live_systems,
            active_alarms,
            pings,
        })
    }

    pub fn record_reconciliation(&self, outcome: &str) {
        self.reconciliation_passes
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn add_rules_created(&self, count: usize) {
        self.rules_created.inc_by(count as u64);
    }

    pub fn record_rule_delete(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.rules_deleted.with_label_values(&[outcome]).inc();
    }

    pub fn record_registry_poll(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.registry_polls.with_label_values(&[outcome]).inc();
    }

    pub fn set_live_systems(&self, count: usize) {
        self.live_systems.set(count as i64);
    }

    pub fn set_active_alarms(&self, count: usize) {
        self.active_alarms.set(count as i64);
    }

    pub fn record_ping(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.pings.with_label_values(&[outcome]).inc();
    }
}

pub use prometheus;
