//! Guardrails (spec §4.8). Grounded on
//! `original_source/propagate/guardrails.py` for the exact default
//! protected-path list, env var names, and default values — those now live
//! on `propagate_config::GuardrailConfig`, constructed once at startup and
//! passed by reference (spec §9's "dynamic config" note).

use propagate_config::GuardrailConfig;

/// Wraps the loaded `GuardrailConfig` with the two operations spec §4.8
/// names. Both the dispatcher and the reconciler consult `validate_paths`;
/// any match at any stage forces the job into `needs_human`.
#[derive(Debug, Clone)]
pub struct Guardrails {
    config: GuardrailConfig,
}

impl Guardrails {
    pub fn new(config: GuardrailConfig) -> Self {
        Self { config }
    }

    pub fn max_parallel(&self) -> usize {
        self.config.max_parallel
    }

    pub fn has_protected_paths(&self) -> bool {
        !self.config.protected_paths.is_empty()
    }

    /// Returns one human-readable violation reason per path that starts
    /// with a protected prefix. An empty list means the paths are allowed.
    pub fn validate_paths(&self, paths: &[String]) -> Vec<String> {
        let mut violations = Vec::new();
        for path in paths {
            if let Some(prefix) = self.config.protected_paths.iter().find(|prefix| path.starts_with(prefix.as_str())) {
                violations.push(format!("Guardrail violation: \"{path}\" matches protected prefix \"{prefix}\""));
            }
        }
        violations
    }

    /// `allowed = auto_merge ∧ (ci_passed ∨ ¬ci_required)` (spec §4.8).
    pub fn check_can_merge(&self, ci_passed: bool) -> (bool, String) {
        if !self.config.auto_merge {
            return (false, "auto-merge is disabled".to_string());
        }
        if ci_passed {
            return (true, "CI passed".to_string());
        }
        if !self.config.ci_required {
            return (true, "CI not required".to_string());
        }
        (false, "CI required and not passed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guardrails() -> Guardrails {
        Guardrails::new(GuardrailConfig::default())
    }

    #[test]
    fn flags_protected_path() {
        let g = guardrails();
        let violations = g.validate_paths(&["infra/terraform/main.tf".to_string()]);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].starts_with("Guardrail violation"));
    }

    #[test]
    fn allows_unrelated_paths() {
        let g = guardrails();
        let violations = g.validate_paths(&["src/clients/api_core.rs".to_string()]);
        assert!(violations.is_empty());
    }

    #[test]
    fn merge_requires_auto_merge_and_ci() {
        let mut cfg = GuardrailConfig::default();
        cfg.auto_merge = true;
        cfg.ci_required = true;
        let g = Guardrails::new(cfg);
        assert_eq!(g.check_can_merge(true), (true, "CI passed".to_string()));
        assert!(!g.check_can_merge(false).0);
    }

    #[test]
    fn merge_disabled_without_auto_merge() {
        let g = guardrails();
        assert!(!g.check_can_merge(true).0);
    }
}
