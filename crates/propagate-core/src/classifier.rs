//! Breaking-change classifier (spec §4.3). Grounded on
//! `original_source/propagate/classifier.py` for the summary-phrase
//! ordering and `changed_routes` formatting; the breaking set itself
//! follows spec.md's broader definition (every kind except
//! `operation_added`, `nested_field_added`, and non-narrowing parameter
//! changes), not the narrower set the original used.

use std::collections::BTreeSet;

use propagate_types::{ClassifiedChange, ContractDiff, DiffKind, Severity};

fn severity_for(kind: DiffKind) -> Severity {
    match kind {
        DiffKind::FieldAddedRequired | DiffKind::FieldOptionalToRequired | DiffKind::ResponseStructureChanged => Severity::Critical,
        DiffKind::FieldRemoved | DiffKind::NestedFieldRemoved | DiffKind::EnumValuesRemoved => Severity::High,
        DiffKind::FieldTypeChanged | DiffKind::NestedFieldTypeChanged | DiffKind::ArrayItemTypeChanged => Severity::Medium,
        _ => Severity::Low,
    }
}

fn category_phrase(kind: DiffKind, fields: &[String]) -> Option<String> {
    if fields.is_empty() {
        return None;
    }
    let list = fields.join(", ");
    let phrase = match kind {
        DiffKind::FieldAddedRequired => format!("New required field(s): {list}"),
        DiffKind::FieldOptionalToRequired => format!("Field(s) now required: {list}"),
        DiffKind::ResponseStructureChanged => format!("Response structure changed: {list}"),
        DiffKind::FieldRemoved => format!("Removed field(s): {list}"),
        DiffKind::NestedFieldRemoved => format!("Removed nested field(s): {list}"),
        DiffKind::EnumValuesRemoved => format!("Removed enum value(s): {list}"),
        DiffKind::FieldTypeChanged => format!("Field type changed: {list}"),
        DiffKind::NestedFieldTypeChanged => format!("Nested field type changed: {list}"),
        DiffKind::ArrayItemTypeChanged => format!("Array item type changed: {list}"),
        _ => return None,
    };
    Some(phrase)
}

/// Fixed category order the summary concatenates in, matching the severity
/// ladder's precedence (spec §4.3).
const CATEGORY_ORDER: &[DiffKind] = &[
    DiffKind::FieldAddedRequired,
    DiffKind::FieldOptionalToRequired,
    DiffKind::ResponseStructureChanged,
    DiffKind::FieldRemoved,
    DiffKind::NestedFieldRemoved,
    DiffKind::EnumValuesRemoved,
    DiffKind::FieldTypeChanged,
    DiffKind::NestedFieldTypeChanged,
    DiffKind::ArrayItemTypeChanged,
];

fn field_name_from_pointer(pointer: &str) -> String {
    pointer.rsplit('.').next().unwrap_or(pointer).trim_end_matches("[]").to_string()
}

pub fn classify(diffs: &[ContractDiff]) -> ClassifiedChange {
    let is_breaking = diffs.iter().any(|d| d.diff_kind.is_breaking());

    let severity = diffs
        .iter()
        .filter(|d| d.diff_kind.is_breaking())
        .map(|d| severity_for(d.diff_kind))
        .fold(Severity::Low, Severity::worst_of);

    let mut changed_routes: BTreeSet<String> = diffs.iter().map(ContractDiff::route).collect();
    let changed_routes: Vec<String> = changed_routes.drain(..).collect();

    let mut phrases = Vec::new();
    for &kind in CATEGORY_ORDER {
        let fields: Vec<String> = diffs
            .iter()
            .filter(|d| d.diff_kind == kind)
            .map(|d| field_name_from_pointer(&d.field_pointer))
            .collect();
        if let Some(phrase) = category_phrase(kind, &fields) {
            phrases.push(phrase);
        }
    }

    let summary = if phrases.is_empty() {
        "Non-breaking changes detected".to_string()
    } else {
        phrases.join("; ")
    };

    let mut field_details: Vec<String> = diffs
        .iter()
        .map(|d| format!("{} {}: {:?}", d.route(), d.field_pointer, d.diff_kind))
        .collect();
    field_details.sort();
    field_details.dedup();

    ClassifiedChange {
        is_breaking,
        severity,
        summary,
        changed_routes,
        field_details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaking_required_field_is_critical() {
        let diffs = vec![ContractDiff::new(
            "/api/v1/sessions",
            "post",
            "requestBody.priority",
            None,
            Some("priority".to_string()),
            DiffKind::FieldAddedRequired,
        )];
        let classified = classify(&diffs);
        assert!(classified.is_breaking);
        assert_eq!(classified.severity, Severity::Critical);
        assert!(classified.summary.contains("priority"));
        assert_eq!(classified.changed_routes, vec!["POST /api/v1/sessions".to_string()]);
    }

    #[test]
    fn non_breaking_emits_fixed_phrase() {
        let diffs = vec![ContractDiff::new("/a", "get", "", None, None, DiffKind::OperationAdded)];
        let classified = classify(&diffs);
        assert!(!classified.is_breaking);
        assert_eq!(classified.summary, "Non-breaking changes detected");
    }

    #[test]
    fn severity_matches_max_of_per_diff_severity() {
        let diffs = vec![
            ContractDiff::new("/a", "get", "x", None, None, DiffKind::FieldTypeChanged),
            ContractDiff::new("/a", "get", "y", None, None, DiffKind::FieldRemoved),
        ];
        let classified = classify(&diffs);
        assert_eq!(classified.severity, Severity::High);
    }
}
