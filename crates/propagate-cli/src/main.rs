//! CLI entry point (spec §6). Grounded on `healer/src/main.rs`'s
//! `Cli`/`Commands` clap-derive shape and `healer/src/ci/server.rs`'s
//! minimal axum health server, wired against the `original_source`
//! `__main__.py` step sequence via `propagate_core::Orchestrator`.

mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use propagate_config::Config;
use propagate_core::ports::{AgentPort, GitHubPort};
use propagate_core::{BundleBuilder, Dispatcher, Guardrails, Orchestrator, Reconciler, RunMode, RunOutcome, ServiceMap, WavePropagator};
use propagate_notify::Notifier;
use propagate_scm::{AgentClient, GitHubClient};
use propagate_store::Store;
use propagate_types::UsageRequest;

#[derive(Parser)]
#[command(name = "propagate", about = "Contract-change propagation engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once against the current contract document.
    Run {
        /// Path to the latest pulled OpenAPI document.
        #[arg(long)]
        contract_path: PathBuf,

        /// Git ref the contract document was pulled from, recorded on the snapshot.
        #[arg(long)]
        source_ref: Option<String>,

        /// Path to the service map YAML.
        #[arg(long, default_value = "service-map.yaml")]
        service_map: PathBuf,

        /// Path to a JSON array of usage telemetry records (ingestion is external; this
        /// reads the last exported snapshot rather than querying a telemetry store directly).
        #[arg(long)]
        usage_path: Option<PathBuf>,

        /// Service name of the contract owner in the service map.
        #[arg(long, default_value = "api-core")]
        contract_owner: String,

        /// Simulate every dispatched job's outcome instead of calling the agent API.
        #[arg(long)]
        dry_run: bool,

        /// Dispatch waves but return immediately instead of polling for completion.
        #[arg(long)]
        no_wait: bool,

        /// Treat a missing baseline as an empty contract so the first run on a repo
        /// still exercises the full pipeline rather than only storing a baseline.
        #[arg(long)]
        ci: bool,
    },
    /// Reconcile every job the store reports as needing a status check.
    Reconcile {
        /// Path to the service map YAML, used to resolve `pr-opened` webhook target services.
        #[arg(long, default_value = "service-map.yaml")]
        service_map: PathBuf,

        /// Service name of the contract owner in the service map.
        #[arg(long, default_value = "api-core")]
        contract_owner: String,
    },
    /// Serve the `/health` and `/status` HTTP endpoints for the background reconcile loop.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,

        /// Seconds between reconciliation sweeps.
        #[arg(long, default_value = "45")]
        interval: u64,

        /// Path to the service map YAML, used to resolve `pr-opened` webhook target services.
        #[arg(long, default_value = "service-map.yaml")]
        service_map: PathBuf,

        /// Service name of the contract owner in the service map.
        #[arg(long, default_value = "api-core")]
        contract_owner: String,
    },
}

struct Wiring {
    config: Config,
    store: Store,
    agent: Arc<dyn AgentPort>,
    github: Arc<dyn GitHubPort>,
}

async fn wire() -> anyhow::Result<Wiring> {
    let config = Config::from_env()?;
    let store = Store::connect(&config.database_url).await?;
    let agent: Arc<dyn AgentPort> = Arc::new(AgentClient::new(config.agent_api_base.clone(), config.agent_api_key.clone()));
    let github: Arc<dyn GitHubPort> = Arc::new(GitHubClient::new(config.github_token.as_deref()));
    Ok(Wiring { config, store, agent, github })
}

fn load_usage(path: Option<&std::path::Path>) -> anyhow::Result<Vec<UsageRequest>> {
    match path {
        None => Ok(Vec::new()),
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&raw)?)
        }
    }
}

/// The contract owner's own repository, used as `source_repo` on the
/// `pr-opened` webhook (spec §6) — falls back to the bare service name if
/// the service map has no entry for it (e.g. a minimal test fixture).
fn source_repo_for(service_map: &ServiceMap, contract_owner: &str) -> String {
    service_map.services.get(contract_owner).map(|info| info.repository.clone()).unwrap_or_else(|| contract_owner.to_string())
}

fn build_reconciler(wiring: &Wiring, guardrails: Arc<Guardrails>, store: Arc<Store>, service_map: &ServiceMap, contract_owner: &str, notifier: Arc<Notifier>) -> Reconciler {
    Reconciler::new(
        store.clone(),
        store.clone(),
        wiring.agent.clone(),
        wiring.github.clone(),
        guardrails,
        wiring.config.ci_unknown_max_attempts,
    )
    .with_notifications(notifier, store, source_repo_for(service_map, contract_owner), service_map.service_by_repo())
}

async fn run_once(
    contract_path: PathBuf,
    source_ref: Option<String>,
    service_map_path: PathBuf,
    usage_path: Option<PathBuf>,
    contract_owner: String,
    mode: RunMode,
) -> anyhow::Result<RunOutcome> {
    let wiring = wire().await?;
    let service_map = ServiceMap::load(&service_map_path)?;
    let guardrails = Arc::new(Guardrails::new(wiring.config.guardrails.clone()));
    let store = Arc::new(wiring.store);
    let usage = load_usage(usage_path.as_deref())?;
    let notifier = Arc::new(Notifier::from_config(&wiring.config));
    if !notifier.has_sink() {
        tracing::debug!("no notification webhook configured, running without one");
    }

    let dispatcher = Dispatcher::new(store.clone(), store.clone(), wiring.agent.clone(), guardrails.clone());
    let reconciler = build_reconciler(&wiring, guardrails, store.clone(), &service_map, &contract_owner, notifier.clone());
    let wave_propagator = WavePropagator::new(wiring.github.clone(), wiring.agent.clone());

    let orchestrator = Orchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        service_map,
        usage,
        contract_owner,
        BundleBuilder::new(),
        dispatcher,
        reconciler,
        wave_propagator,
        wiring.config.poll_interval,
        wiring.config.wave_timeout,
        wiring.config.dry_run_seed,
    )
    .with_notifier(notifier);

    let contract_raw = std::fs::read_to_string(&contract_path)?;

    Ok(orchestrator.run(&contract_raw, source_ref, mode).await?)
}

async fn reconcile_once(service_map_path: PathBuf, contract_owner: String) -> anyhow::Result<usize> {
    let wiring = wire().await?;
    let service_map = ServiceMap::load(&service_map_path)?;
    let guardrails = Arc::new(Guardrails::new(wiring.config.guardrails.clone()));
    let store = Arc::new(wiring.store);
    let notifier = Arc::new(Notifier::from_config(&wiring.config));
    let reconciler = build_reconciler(&wiring, guardrails, store, &service_map, &contract_owner, notifier);
    let jobs = reconciler.reconcile_all().await;
    Ok(jobs.len())
}

async fn serve(addr: String, interval: Duration, service_map_path: PathBuf, contract_owner: String) -> anyhow::Result<()> {
    let wiring = wire().await?;
    let service_map = ServiceMap::load(&service_map_path)?;
    let guardrails = Arc::new(Guardrails::new(wiring.config.guardrails.clone()));
    let store = Arc::new(wiring.store);
    let notifier = Arc::new(Notifier::from_config(&wiring.config));
    let reconciler = Arc::new(build_reconciler(&wiring, guardrails, store, &service_map, &contract_owner, notifier));

    let state = Arc::new(server::ServerState::new(reconciler.clone()));
    {
        let state = state.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let jobs = state.reconciler.reconcile_all().await;
                state.record_sweep(jobs.len());
            }
        });
    }

    server::run_server(state, &addr).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_usage_without_path_is_empty() {
        let usage = load_usage(None).unwrap();
        assert!(usage.is_empty());
    }

    #[test]
    fn load_usage_parses_json_array() {
        let dir = std::env::temp_dir().join(format!("propagate-cli-test-{}", std::process::id()));
        std::fs::write(&dir, r#"[{"ts":"2026-01-01T00:00:00Z","caller_service":"billing-service","method":"POST","route_template":"/api/v1/sessions","status_code":201,"duration_ms":40}]"#).unwrap();
        let usage = load_usage(Some(&dir)).unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].caller_service, "billing-service");
        std::fs::remove_file(&dir).unwrap();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { contract_path, source_ref, service_map, usage_path, contract_owner, dry_run, no_wait, ci } => {
            let mode = RunMode { dry_run, no_wait, ci_empty_baseline: ci };
            let outcome = run_once(contract_path, source_ref, service_map, usage_path, contract_owner, mode).await?;
            tracing::info!(outcome = ?outcome, "run complete");
            std::process::exit(outcome.exit_code());
        }
        Commands::Reconcile { service_map, contract_owner } => {
            let count = reconcile_once(service_map, contract_owner).await?;
            tracing::info!(reconciled = count, "reconciliation sweep complete");
        }
        Commands::Serve { addr, interval, service_map, contract_owner } => {
            serve(addr, Duration::from_secs(interval), service_map, contract_owner).await?;
        }
    }

    Ok(())
}
