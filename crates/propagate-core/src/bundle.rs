//! Bundle builder (spec §4.7). Grounded on `healer/src/ci/spawner.rs`'s
//! Handlebars-with-generic-fallback prompt rendering and UTF-8-safe
//! truncation helper.

use std::collections::BTreeSet;

use handlebars::Handlebars;
use propagate_types::{ClassifiedChange, ImpactRecord, RepoFixBundle};
use sha2::{Digest, Sha256};

use crate::service_map::ServiceInfo;

const MAX_PROMPT_BYTES: usize = 10_000;

/// Renders remediation prompts via Handlebars when a template is
/// registered for a service, falling back to a generic deterministic brief
/// otherwise — mirroring `CodeRunSpawner::render_prompt`'s
/// template-or-generic split.
pub struct BundleBuilder {
    templates: Handlebars<'static>,
}

impl Default for BundleBuilder {
    fn default() -> Self {
        let mut templates = Handlebars::new();
        templates.set_strict_mode(false);
        Self { templates }
    }
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_template(&mut self, name: &str, content: &str) -> Result<(), handlebars::TemplateError> {
        self.templates.register_template_string(name, content)
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.templates.get_template(name).is_some()
    }

    fn render_prompt(
        &self,
        target_service: &str,
        classified: &ClassifiedChange,
        affected_routes: &[String],
        call_count_7d: u64,
        client_paths: &[String],
        test_paths: &[String],
        frontend_paths: &[String],
    ) -> String {
        if self.has_template(target_service) {
            let data = serde_json::json!({
                "target_service": target_service,
                "change_summary": classified.summary,
                "is_breaking": classified.is_breaking,
                "severity": classified.severity.as_str(),
                "affected_routes": affected_routes,
                "call_count_7d": call_count_7d,
                "client_paths": client_paths,
                "test_paths": test_paths,
                "frontend_paths": frontend_paths,
            });
            if let Ok(rendered) = self.templates.render(target_service, &data) {
                return truncate_utf8_safe(&rendered, MAX_PROMPT_BYTES);
            }
        }
        build_generic_prompt(target_service, classified, affected_routes, call_count_7d, client_paths, test_paths, frontend_paths)
    }

    /// Build one bundle for `target_service`, given the impact records that
    /// touch it and the classified change driving this run.
    pub fn build(
        &self,
        target_service: &str,
        service_info: &ServiceInfo,
        impacts: &[&ImpactRecord],
        classified: &ClassifiedChange,
    ) -> RepoFixBundle {
        let affected_routes: Vec<String> = {
            let mut routes: BTreeSet<String> = impacts
                .iter()
                .map(|r| format!("{} {}", r.method.to_uppercase(), r.route_template))
                .collect();
            routes.extend(classified.changed_routes.iter().cloned());
            routes.into_iter().collect()
        };
        let call_count_7d: u64 = impacts.iter().map(|r| r.calls_last_7d).sum();

        let mut client_paths = service_info.client_paths.clone();
        client_paths.sort();
        let mut test_paths = service_info.test_paths.clone();
        test_paths.sort();
        let mut frontend_paths = service_info.frontend_paths.clone();
        frontend_paths.sort();

        let prompt = self.render_prompt(
            target_service,
            classified,
            &affected_routes,
            call_count_7d,
            &client_paths,
            &test_paths,
            &frontend_paths,
        );

        let bundle_hash = compute_bundle_hash(
            target_service,
            &service_info.repository,
            &affected_routes,
            &client_paths,
            &test_paths,
            &frontend_paths,
            &classified.summary,
        );

        RepoFixBundle {
            target_repo: service_info.repository.clone(),
            target_service: target_service.to_string(),
            change_summary: classified.summary.clone(),
            breaking_changes: classified.field_details.clone(),
            affected_routes,
            call_count_7d,
            client_paths,
            test_paths,
            frontend_paths,
            prompt,
            bundle_hash,
        }
    }
}

/// First 16 hex chars of SHA-256 over the canonicalized concatenation of
/// `target_service + target_repo + sorted(affected_routes) +
/// sorted(client ∪ test ∪ frontend paths) + change_summary`.
fn compute_bundle_hash(
    target_service: &str,
    target_repo: &str,
    affected_routes: &[String],
    client_paths: &[String],
    test_paths: &[String],
    frontend_paths: &[String],
    change_summary: &str,
) -> String {
    let mut all_paths: BTreeSet<String> = BTreeSet::new();
    all_paths.extend(client_paths.iter().cloned());
    all_paths.extend(test_paths.iter().cloned());
    all_paths.extend(frontend_paths.iter().cloned());

    let mut sorted_routes = affected_routes.to_vec();
    sorted_routes.sort();

    let canonical = format!(
        "{target_service}{target_repo}{}{}{change_summary}",
        sorted_routes.join(","),
        all_paths.into_iter().collect::<Vec<_>>().join(","),
    );

    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn build_generic_prompt(
    target_service: &str,
    classified: &ClassifiedChange,
    affected_routes: &[String],
    call_count_7d: u64,
    client_paths: &[String],
    test_paths: &[String],
    frontend_paths: &[String],
) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    let _ = writeln!(out, "# Contract change remediation for {target_service}");
    let _ = writeln!(out);
    let _ = writeln!(out, "## Summary");
    let _ = writeln!(out, "{}", classified.summary);
    let _ = writeln!(out, "Severity: {}", classified.severity.as_str());
    let _ = writeln!(out, "Breaking: {}", classified.is_breaking);
    let _ = writeln!(out);
    let _ = writeln!(out, "## Affected endpoints ({call_count_7d} calls/7d)");
    for route in affected_routes {
        let _ = writeln!(out, "- {route}");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "## Known file locations");
    if !client_paths.is_empty() {
        let _ = writeln!(out, "Client code: {}", client_paths.join(", "));
    }
    if !test_paths.is_empty() {
        let _ = writeln!(out, "Tests: {}", test_paths.join(", "));
    }
    if !frontend_paths.is_empty() {
        let _ = writeln!(out, "Frontend: {}", frontend_paths.join(", "));
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "## Success criteria");
    let _ = writeln!(out, "- Update every client callsite touching the affected endpoints above.");
    let _ = writeln!(out, "- Update or add tests covering the changed request/response shape.");
    let _ = writeln!(out, "- Open a pull request; do not touch any protected infrastructure path.");

    truncate_utf8_safe(&out, MAX_PROMPT_BYTES)
}

/// Truncate to at most `max_bytes`, walking back to the nearest UTF-8
/// character boundary rather than splitting a multi-byte codepoint.
fn truncate_utf8_safe(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use propagate_types::{impact::Confidence, Severity};

    fn service_info() -> ServiceInfo {
        ServiceInfo {
            repository: "org/billing-service".to_string(),
            language: Some("rust".to_string()),
            client_paths: vec!["src/clients/api_core.rs".to_string()],
            test_paths: vec!["tests/api_core_test.rs".to_string()],
            frontend_paths: vec![],
            depends_on: vec!["api-core".to_string()],
            include_in_top_callers: true,
        }
    }

    fn classified() -> ClassifiedChange {
        ClassifiedChange {
            is_breaking: true,
            severity: Severity::Critical,
            summary: "New required field(s): priority".to_string(),
            changed_routes: vec!["POST /api/v1/sessions".to_string()],
            field_details: vec![],
        }
    }

    #[test]
    fn bundle_hash_is_stable_for_identical_inputs() {
        let builder = BundleBuilder::new();
        let info = service_info();
        let classified = classified();
        let impact = ImpactRecord {
            change_id: 1,
            caller_service: "billing-service".to_string(),
            method: "post".to_string(),
            route_template: "/api/v1/sessions".to_string(),
            calls_last_7d: 312,
            confidence: Confidence::High,
            declared_only: false,
        };
        let bundle_a = builder.build("billing-service", &info, &[&impact], &classified);
        let bundle_b = builder.build("billing-service", &info, &[&impact], &classified);
        assert_eq!(bundle_a.bundle_hash, bundle_b.bundle_hash);
        assert_eq!(bundle_a.bundle_hash.len(), 16);
    }

    #[test]
    fn bundle_hash_changes_with_input() {
        let builder = BundleBuilder::new();
        let info = service_info();
        let mut classified_b = classified();
        classified_b.summary = "different summary".to_string();
        let bundle_a = builder.build("billing-service", &info, &[], &classified());
        let bundle_b = builder.build("billing-service", &info, &[], &classified_b);
        assert_ne!(bundle_a.bundle_hash, bundle_b.bundle_hash);
    }

    #[test]
    fn truncates_at_char_boundary() {
        let s = "a".repeat(5) + "\u{1F600}"; // multi-byte emoji at the end
        let truncated = truncate_utf8_safe(&s, 6);
        assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
    }
}
