//! Dependency graph / wave scheduler (spec §4.6).
//!
//! The original Python `topological_sort()` in
//! `original_source/propagate/dependency_graph.py` computes the reverse
//! (leaf-first) order of spec §4.6's explicit root-first wave semantics,
//! and is never called from `__main__.py` in the captured history — dead,
//! unreconciled code. This implements spec's algorithm directly: root-first
//! Kahn's algorithm, peeling nodes whose dependencies have all already been
//! scheduled in earlier waves.

use std::collections::{BTreeMap, BTreeSet};

use crate::service_map::ServiceMap;

#[derive(Debug, thiserror::Error)]
#[error("circular dependency among services: {0:?}")]
pub struct CircularDependencyError(pub Vec<String>);

/// Build the node/edge set: every service in the map plus the contract
/// owner node, with `A -> B` iff `A` declares a dependency on `B`.
fn build_edges(service_map: &ServiceMap, contract_owner: &str) -> BTreeMap<String, BTreeSet<String>> {
    let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    edges.entry(contract_owner.to_string()).or_default();

    for (name, info) in &service_map.services {
        let deps: BTreeSet<String> = info.depends_on.iter().cloned().collect();
        for dep in &deps {
            edges.entry(dep.clone()).or_default();
        }
        edges.entry(name.clone()).or_default().extend(deps);
    }
    edges
}

/// Returns waves of service names; wave 0 holds every node with no
/// unresolved dependency, each subsequent wave holds everything whose
/// dependencies were all scheduled in earlier waves.
pub fn topological_waves(service_map: &ServiceMap, contract_owner: &str) -> Result<Vec<Vec<String>>, CircularDependencyError> {
    let edges = build_edges(service_map, contract_owner);
    let mut remaining: BTreeMap<String, BTreeSet<String>> = edges.clone();
    let mut waves = Vec::new();
    let mut scheduled: BTreeSet<String> = BTreeSet::new();

    while scheduled.len() < edges.len() {
        let ready: Vec<String> = remaining
            .iter()
            .filter(|(name, deps)| !scheduled.contains(*name) && deps.is_empty())
            .map(|(name, _)| name.clone())
            .collect();

        if ready.is_empty() {
            let unresolved: Vec<String> = edges.keys().filter(|n| !scheduled.contains(*n)).cloned().collect();
            return Err(CircularDependencyError(unresolved));
        }

        let mut wave = ready;
        wave.sort();
        for name in &wave {
            scheduled.insert(name.clone());
        }
        for deps in remaining.values_mut() {
            for name in &wave {
                deps.remove(name);
            }
        }
        waves.push(wave);
    }

    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_map::ServiceInfo;

    fn map_with(deps: &[(&str, &[&str])]) -> ServiceMap {
        let mut services = BTreeMap::new();
        for (name, depends_on) in deps {
            services.insert(
                name.to_string(),
                ServiceInfo {
                    repository: format!("org/{name}"),
                    language: None,
                    client_paths: vec![],
                    test_paths: vec![],
                    frontend_paths: vec![],
                    depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
                    include_in_top_callers: false,
                },
            );
        }
        ServiceMap { services }
    }

    #[test]
    fn wave_ordering_matches_spec_scenario() {
        let service_map = map_with(&[
            ("a", &["root"]),
            ("b", &["root"]),
            ("c", &["a"]),
            ("d", &["a", "b"]),
            ("e", &["c", "d"]),
        ]);
        let waves = topological_waves(&service_map, "root").unwrap();
        assert_eq!(
            waves,
            vec![
                vec!["root".to_string()],
                vec!["a".to_string(), "b".to_string()],
                vec!["c".to_string(), "d".to_string()],
                vec!["e".to_string()],
            ]
        );
    }

    #[test]
    fn detects_cycle() {
        let service_map = map_with(&[("a", &["b"]), ("b", &["a"])]);
        let err = topological_waves(&service_map, "root").unwrap_err();
        assert!(err.0.contains(&"a".to_string()));
        assert!(err.0.contains(&"b".to_string()));
    }
}
