//! Impact resolver (spec §4.5). Grounded on
//! `original_source/propagate/impact.py`'s telemetry-union query shape
//! (7-day window, caller/route/method grouping, `caller_service != "unknown"`
//! filter). The `declared_only` placeholder synthesis for zero-telemetry
//! declared dependents has no original-source precedent and is implemented
//! fresh from spec §4.5.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use propagate_types::impact::Confidence;
use propagate_types::{ImpactRecord, UsageRequest};

use crate::service_map::ServiceMap;

fn split_route(route: &str) -> Option<(String, String)> {
    let mut parts = route.splitn(2, ' ');
    let method = parts.next()?.to_lowercase();
    let path = parts.next()?.to_string();
    Some((method, path))
}

/// `changed_routes` is the classified change's `"METHOD path"` list.
/// `usage` is the full usage log; filtering to the trailing 7-day window
/// happens here rather than at the caller, matching the original's
/// `cutoff = now - 7 days` SQL predicate.
pub fn resolve_impact(
    change_id: i64,
    changed_routes: &[String],
    service_map: &ServiceMap,
    usage: &[UsageRequest],
    now: DateTime<Utc>,
    contract_owner: &str,
) -> Vec<ImpactRecord> {
    let cutoff = now - Duration::days(7);
    let routes: Vec<(String, String)> = changed_routes.iter().filter_map(|r| split_route(r)).collect();
    let route_set: BTreeSet<(String, String)> = routes.iter().cloned().collect();

    // Step 1: telemetry groupings, keyed by (caller, method, route).
    let mut grouped: BTreeMap<(String, String, String), u64> = BTreeMap::new();
    for entry in usage {
        if entry.ts < cutoff {
            continue;
        }
        if entry.caller_service == "unknown" || entry.caller_service.is_empty() {
            continue;
        }
        let method = entry.method.to_lowercase();
        if !route_set.contains(&(method.clone(), entry.route_template.clone())) {
            continue;
        }
        *grouped
            .entry((entry.caller_service.clone(), method, entry.route_template.clone()))
            .or_insert(0) += 1;
    }

    let mut records: Vec<ImpactRecord> = grouped
        .into_iter()
        .map(|((caller_service, method, route_template), calls)| ImpactRecord {
            change_id,
            caller_service,
            method,
            route_template,
            calls_last_7d: calls,
            confidence: Confidence::High,
            declared_only: false,
        })
        .collect();

    let callers_with_telemetry: BTreeSet<String> = records.iter().map(|r| r.caller_service.clone()).collect();

    // Step 2: every declared dependent not present in any telemetry
    // grouping gets a zero-call placeholder using the first changed route.
    let Some((placeholder_method, placeholder_path)) = routes.first().cloned() else {
        return records;
    };

    for dependent in service_map.dependents_of(contract_owner) {
        if !callers_with_telemetry.contains(&dependent) {
            records.push(ImpactRecord {
                change_id,
                caller_service: dependent,
                method: placeholder_method.clone(),
                route_template: placeholder_path.clone(),
                calls_last_7d: 0,
                confidence: Confidence::High,
                declared_only: true,
            });
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(caller: &str, method: &str, route: &str, days_ago: i64) -> UsageRequest {
        UsageRequest {
            ts: Utc::now() - Duration::days(days_ago),
            caller_service: caller.to_string(),
            method: method.to_string(),
            route_template: route.to_string(),
            status_code: 200,
            duration_ms: 10,
        }
    }

    #[test]
    fn impact_union_matches_scenario() {
        let yaml = r#"
services:
  billing-service:
    repository: "org/billing-service"
    depends_on: ["api-core"]
  dashboard-service:
    repository: "org/dashboard-service"
    depends_on: ["api-core"]
"#;
        let service_map = ServiceMap::parse(yaml).unwrap();
        let mut calls = Vec::new();
        for _ in 0..312 {
            calls.push(usage("billing-service", "post", "/api/v1/sessions", 1));
        }
        for _ in 0..44 {
            calls.push(usage("notification-service", "post", "/api/v1/sessions", 1));
        }

        let records = resolve_impact(
            1,
            &["POST /api/v1/sessions".to_string()],
            &service_map,
            &calls,
            Utc::now(),
            "api-core",
        );
        assert_eq!(records.len(), 3);

        let billing = records.iter().find(|r| r.caller_service == "billing-service").unwrap();
        assert_eq!(billing.calls_last_7d, 312);
        assert!(!billing.declared_only);

        let notification = records.iter().find(|r| r.caller_service == "notification-service").unwrap();
        assert_eq!(notification.calls_last_7d, 44);

        let dashboard = records.iter().find(|r| r.caller_service == "dashboard-service").unwrap();
        assert_eq!(dashboard.calls_last_7d, 0);
        assert!(dashboard.declared_only);
    }

    #[test]
    fn unknown_caller_is_dropped() {
        let service_map = ServiceMap::default();
        let calls = vec![usage("unknown", "get", "/a", 1)];
        let records = resolve_impact(1, &["GET /a".to_string()], &service_map, &calls, Utc::now(), "api-core");
        assert!(records.is_empty());
    }

    #[test]
    fn stale_telemetry_outside_window_is_excluded() {
        let service_map = ServiceMap::default();
        let calls = vec![usage("billing-service", "get", "/a", 10)];
        let records = resolve_impact(1, &["GET /a".to_string()], &service_map, &calls, Utc::now(), "api-core");
        assert!(records.is_empty());
    }
}
