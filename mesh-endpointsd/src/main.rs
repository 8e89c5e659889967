//! Thin daemon shell: wires logging, readiness, and a health/metrics HTTP
//! surface around the endpoint assembly library. Does not implement an
//! xDS stream server; that is left to the control plane that embeds
//! `mesh-endpoints` as a library.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use clap::Parser;
use mesh_core::{drain, metrics, readiness, signal, telemetry, version};
use prometheus_client::registry::Registry;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
#[command(disable_version_flag = true)]
struct Args {
	/// Address the health/readiness/metrics server binds to.
	#[arg(long, value_name = "addr", default_value = "0.0.0.0:15020")]
	bind_addr: SocketAddr,

	/// Print version and exit.
	#[arg(long = "version")]
	print_version: bool,
}

#[derive(Clone)]
struct HealthState {
	ready: readiness::Ready,
}

async fn healthz() -> &'static str {
	"ok\n"
}

async fn readyz(State(state): State<HealthState>) -> Result<&'static str, (StatusCode, String)> {
	let pending = state.ready.pending();
	if pending.is_empty() {
		Ok("ready\n")
	} else {
		let mut names: Vec<_> = pending.into_iter().collect();
		names.sort();
		Err((StatusCode::SERVICE_UNAVAILABLE, format!("not ready, pending: {}\n", names.join(", "))))
	}
}

fn main() -> anyhow::Result<()> {
	let _log_flush = telemetry::setup_logging();
	let args = Args::parse();

	if args.print_version {
		println!("{}", version::BuildInfo::new());
		return Ok(());
	}

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
	info!("version: {}", version::BuildInfo::new());

	let shutdown = signal::Shutdown::new();
	let (drain_tx, drain_rx) = drain::new();

	let ready = readiness::Ready::new();
	let server_task = ready.register_task("health server");

	let mut registry = Registry::default();
	let sub_registry = metrics::sub_registry(&mut registry);
	// Registered so its counters show up on /metrics; a real embedder
	// passes this into the builder's push path to record outcomes.
	let _xds_metrics = mesh_xds::metrics::Metrics::new(sub_registry);

	let metrics_app = metrics::App::new(Arc::new(registry));
	let health_state = HealthState { ready: ready.clone() };

	let app = Router::new()
		.route("/healthz", get(healthz))
		.route("/healthz/ready", get(readyz))
		.with_state(health_state)
		.merge(metrics_app.router());

	let listener = tokio::net::TcpListener::bind(args.bind_addr).await?;
	let bound_addr = listener.local_addr()?;
	info!(address = %bound_addr, "health/metrics server listening");
	drop(server_task);

	tokio::spawn(drain::run_with_drain(
		"health-server".to_string(),
		drain_rx,
		Duration::from_secs(5),
		async move |sub_drain, _force_shutdown| {
			let result = axum::serve(listener, app)
				.with_graceful_shutdown(async move {
					let _blocker = sub_drain.wait_for_drain().await;
				})
				.await;
			if let Err(e) = result {
				tracing::warn!("health server exited: {e}");
			}
		},
	));

	shutdown.wait().await;
	info!("shutdown signal received, draining");
	drain_tx.start_drain_and_wait(drain::DrainMode::Graceful).await;
	Ok(())
}
