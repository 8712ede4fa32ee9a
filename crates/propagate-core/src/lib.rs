//! The contract-change propagation pipeline: differ, classifier, service
//! map, impact resolver, dependency graph, bundle builder, guardrails,
//! dispatcher, status reconciler, wave-context propagator, orchestrator.

pub mod bundle;
pub mod classifier;
pub mod differ;
pub mod dispatcher;
pub mod graph;
pub mod guardrails;
pub mod impact;
pub mod orchestrator;
pub mod ports;
pub mod reconciler;
pub mod service_map;
pub mod wave;

pub use bundle::BundleBuilder;
pub use classifier::classify;
pub use differ::{diff_contracts, load_contract};
pub use dispatcher::Dispatcher;
pub use graph::topological_waves;
pub use guardrails::Guardrails;
pub use impact::resolve_impact;
pub use orchestrator::{Orchestrator, RunMode, RunOutcome};
pub use ports::{AgentPort, GitHubPort};
pub use reconciler::Reconciler;
pub use service_map::ServiceMap;
pub use wave::WavePropagator;
