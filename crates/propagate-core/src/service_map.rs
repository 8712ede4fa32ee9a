//! Static service map (spec §4.4). Grounded on
//! `original_source/propagate/service_map.py`'s YAML-file-backed
//! `ServiceInfo` shape and default path resolution.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceInfo {
    pub repository: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub client_paths: Vec<String>,
    #[serde(default)]
    pub test_paths: Vec<String>,
    #[serde(default)]
    pub frontend_paths: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub include_in_top_callers: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceMap {
    pub services: BTreeMap<String, ServiceInfo>,
}

#[derive(Debug, Deserialize)]
struct RawServiceMap {
    #[serde(default)]
    services: BTreeMap<String, ServiceInfo>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceMapError {
    #[error("could not read service map file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("could not parse service map YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl ServiceMap {
    pub fn load(path: &Path) -> Result<Self, ServiceMapError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ServiceMapError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ServiceMapError> {
        let parsed: RawServiceMap = serde_yaml::from_str(raw)?;
        Ok(Self { services: parsed.services })
    }

    /// Services that declare the contract owner (or any other service) as
    /// a dependency — the map is the authoritative source of "who depends
    /// on the contract owner" (spec §4.4 invariant).
    pub fn dependents_of(&self, service: &str) -> Vec<String> {
        self.services
            .iter()
            .filter(|(_, info)| info.depends_on.iter().any(|d| d == service))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Reverse lookup from repository URL back to service name, for
    /// components (e.g. webhook delivery) that only carry `target_repo`.
    pub fn service_by_repo(&self) -> std::collections::HashMap<String, String> {
        self.services.iter().map(|(name, info)| (info.repository.clone(), name.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_services_and_dependents() {
        let yaml = r#"
services:
  billing-service:
    repository: "org/billing-service"
    depends_on: ["api-core"]
    client_paths: ["src/clients/"]
  dashboard-service:
    repository: "org/dashboard-service"
    depends_on: ["api-core"]
"#;
        let map = ServiceMap::parse(yaml).unwrap();
        assert_eq!(map.services.len(), 2);
        let dependents = map.dependents_of("api-core");
        assert_eq!(dependents.len(), 2);
    }
}
