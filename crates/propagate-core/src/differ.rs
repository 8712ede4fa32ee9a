//! Contract differ (spec §4.2). Parses documents as a raw `serde_json::Value`
//! tree (mirroring the original's `load_contract`) but resolves `$ref`s
//! through `propagate_types::schema::{Schema, RefResolver}` — a pointer ->
//! node map walked with a visited-set (spec §9) — rather than recursing on
//! the `Value` tree itself with a depth cap. Field-level diffing then walks
//! the resolved, `$ref`-free `Schema` tree.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use propagate_types::schema::{CycleDetected, RefResolver, Schema};
use propagate_types::{ContractDiff, DiffKind};
use serde_json::Value;

const HTTP_METHODS: &[&str] = &["get", "post", "put", "patch", "delete", "options", "head"];

#[derive(Debug, thiserror::Error)]
pub enum DifferError {
    #[error("contract document is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("contract document is missing a top-level \"paths\" object")]
    MissingPaths,
}

pub fn load_contract(raw: &str) -> Result<Value, DifferError> {
    let value: Value = serde_json::from_str(raw)?;
    if value.get("paths").and_then(Value::as_object).is_none() {
        return Err(DifferError::MissingPaths);
    }
    Ok(value)
}

/// Converts a raw JSON schema node into the tagged `Schema` representation.
/// `$ref` nodes become `Schema::Ref` and are left unresolved here;
/// resolution happens once, via `RefResolver`, at the body's entry point.
fn json_to_schema(node: &Value) -> Schema {
    if let Some(pointer) = node.get("$ref").and_then(Value::as_str) {
        return Schema::Ref { pointer: pointer.to_string() };
    }
    match node.get("type").and_then(Value::as_str) {
        Some("object") => Schema::Object {
            properties: object_properties(node),
            required: required_fields(node),
        },
        Some("array") => Schema::Array {
            items: Box::new(node.get("items").map(json_to_schema).unwrap_or_else(|| Schema::scalar("unknown"))),
        },
        Some(type_name) => Schema::Scalar {
            type_name: type_name.to_string(),
            enum_values: enum_values(node),
        },
        None if node.get("properties").is_some() => Schema::Object {
            properties: object_properties(node),
            required: required_fields(node),
        },
        None => Schema::scalar("unknown"),
    }
}

fn object_properties(node: &Value) -> BTreeMap<String, Schema> {
    node.get("properties")
        .and_then(Value::as_object)
        .map(|props| props.iter().map(|(k, v)| (k.clone(), json_to_schema(v))).collect())
        .unwrap_or_default()
}

fn required_fields(node: &Value) -> Vec<String> {
    node.get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn enum_values(node: &Value) -> Vec<String> {
    node.get("enum")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())).collect())
        .unwrap_or_default()
}

/// Builds the `$ref` target map from `components.schemas`, keyed both by bare
/// name (`"Widget"`) and by full pointer, matching how `RefResolver` looks
/// pointers up.
fn build_components(doc: &Value) -> BTreeMap<String, Schema> {
    doc.get("components")
        .and_then(|c| c.get("schemas"))
        .and_then(Value::as_object)
        .map(|schemas| schemas.iter().map(|(name, node)| (name.clone(), json_to_schema(node))).collect())
        .unwrap_or_default()
}

fn request_body_node<'a>(operation: &'a Value) -> Option<&'a Value> {
    operation.get("requestBody")?.get("content")?.get("application/json")?.get("schema")
}

fn response_node<'a>(operation: &'a Value, status: &str) -> Option<&'a Value> {
    operation.get("responses")?.get(status)?.get("content")?.get("application/json")?.get("schema")
}

/// Resolves a raw schema node to its fully `$ref`-free `Schema` form.
fn resolve(components: &BTreeMap<String, Schema>, node: &Value) -> Result<Schema, CycleDetected> {
    RefResolver::new(components).resolve(&json_to_schema(node))
}

fn schema_type_tag(schema: &Schema) -> Option<String> {
    match schema {
        Schema::Scalar { type_name, .. } => Some(type_name.clone()),
        Schema::Object { .. } => Some("object".to_string()),
        Schema::Array { .. } => Some("array".to_string()),
        Schema::Ref { .. } => None,
    }
}

fn schema_enum_values(schema: &Schema) -> Option<BTreeSet<String>> {
    match schema {
        Schema::Scalar { enum_values, .. } if !enum_values.is_empty() => Some(enum_values.iter().cloned().collect()),
        _ => None,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Request,
    Response,
}

/// Records a diagnostic diff in place of a body that failed to resolve due
/// to a cyclic `$ref` (spec §9) instead of recursing forever.
fn push_cycle_diagnostic(path: &str, method: &str, pointer: &str, cycle: &CycleDetected, out: &mut Vec<ContractDiff>) {
    tracing::warn!(pointer = %cycle.0, path, method, body = pointer, "cyclic $ref in contract schema, recording diagnostic diff");
    out.push(ContractDiff::new(path, method, pointer, None, None, DiffKind::NestedFieldTypeChanged));
}

/// Recursively diffs two resolved schemas' field sets. `depth == 0` is the
/// request/response body itself; `depth >= 1` is a nested object reached
/// through it, which emits `nested_*` diff kinds instead of the top-level
/// ones.
#[allow(clippy::too_many_arguments)]
fn diff_schema_fields(
    old_schema: &Schema,
    new_schema: &Schema,
    path: &str,
    method: &str,
    pointer_prefix: &str,
    depth: usize,
    body_kind: BodyKind,
    out: &mut Vec<ContractDiff>,
) {
    if let (Schema::Array { items: old_items }, Schema::Array { items: new_items }) = (old_schema, new_schema) {
        let old_item_type = schema_type_tag(old_items);
        let new_item_type = schema_type_tag(new_items);
        if let (Some(old_t), Some(new_t)) = (&old_item_type, &new_item_type) {
            if old_t != new_t {
                out.push(ContractDiff::new(
                    path,
                    method,
                    format!("{pointer_prefix}[]"),
                    Some(old_t.clone()),
                    Some(new_t.clone()),
                    DiffKind::ArrayItemTypeChanged,
                ));
            }
        }
        diff_schema_fields(old_items, new_items, path, method, &format!("{pointer_prefix}[]"), depth.max(1), body_kind, out);
        return;
    }

    let (Schema::Object { properties: old_props, required: old_required }, Schema::Object { properties: new_props, required: new_required }) =
        (old_schema, new_schema)
    else {
        return;
    };

    let old_required: BTreeSet<&String> = old_required.iter().collect();
    let new_required: BTreeSet<&String> = new_required.iter().collect();

    let mut field_names: BTreeSet<&String> = old_props.keys().collect();
    field_names.extend(new_props.keys());

    for name in field_names {
        let old_field = old_props.get(name);
        let new_field = new_props.get(name);
        let pointer = format!("{pointer_prefix}.{name}");

        match (old_field, new_field) {
            (None, Some(new_f)) => {
                if depth == 0 {
                    match body_kind {
                        BodyKind::Request => {
                            if new_required.contains(name) {
                                out.push(ContractDiff::new(path, method, pointer, None, Some(name.clone()), DiffKind::FieldAddedRequired));
                            }
                        }
                        BodyKind::Response => {
                            if schema_type_tag(new_f).as_deref() == Some("object") {
                                out.push(ContractDiff::new(path, method, pointer, None, Some(name.clone()), DiffKind::ResponseStructureChanged));
                            }
                        }
                    }
                } else {
                    out.push(ContractDiff::new(path, method, pointer, None, Some(name.clone()), DiffKind::NestedFieldAdded));
                }
            }
            (Some(_), None) => {
                let kind = if depth == 0 { DiffKind::FieldRemoved } else { DiffKind::NestedFieldRemoved };
                out.push(ContractDiff::new(path, method, pointer, Some(name.clone()), None, kind));
            }
            (Some(old_f), Some(new_f)) => {
                if depth == 0 && body_kind == BodyKind::Request && !old_required.contains(name) && new_required.contains(name) {
                    out.push(ContractDiff::new(path, method, pointer.clone(), None, Some(name.clone()), DiffKind::FieldOptionalToRequired));
                }

                let old_t = schema_type_tag(old_f);
                let new_t = schema_type_tag(new_f);
                if let (Some(old_t), Some(new_t)) = (&old_t, &new_t) {
                    if old_t != new_t {
                        let kind = if depth == 0 { DiffKind::FieldTypeChanged } else { DiffKind::NestedFieldTypeChanged };
                        out.push(ContractDiff::new(path, method, pointer.clone(), Some(old_t.clone()), Some(new_t.clone()), kind));
                    }
                }

                if depth == 0 {
                    if let (Some(old_enum), Some(new_enum)) = (schema_enum_values(old_f), schema_enum_values(new_f)) {
                        if !old_enum.is_empty() && !new_enum.is_empty() && new_enum.is_subset(&old_enum) && new_enum != old_enum {
                            out.push(ContractDiff::new(
                                path,
                                method,
                                pointer.clone(),
                                Some(format!("{old_enum:?}")),
                                Some(format!("{new_enum:?}")),
                                DiffKind::EnumValuesRemoved,
                            ));
                        }
                    }
                }

                diff_schema_fields(old_f, new_f, path, method, &pointer, depth + 1, body_kind, out);
            }
            (None, None) => unreachable!(),
        }
    }
}

fn diff_operation(
    old_components: &BTreeMap<String, Schema>,
    new_components: &BTreeMap<String, Schema>,
    path: &str,
    method: &str,
    old_op: &Value,
    new_op: &Value,
    out: &mut Vec<ContractDiff>,
) {
    // Request body field diffing.
    if let (Some(old_node), Some(new_node)) = (request_body_node(old_op), request_body_node(new_op)) {
        match (resolve(old_components, old_node), resolve(new_components, new_node)) {
            (Ok(old_schema), Ok(new_schema)) => {
                diff_schema_fields(&old_schema, &new_schema, path, method, "requestBody", 0, BodyKind::Request, out);
            }
            (Err(cycle), _) | (_, Err(cycle)) => push_cycle_diagnostic(path, method, "requestBody", &cycle, out),
        }
    }

    // Response diffing, per status code (spec §11.1: keyed by status code).
    if let (Some(old_responses), Some(new_responses)) = (old_op.get("responses").and_then(Value::as_object), new_op.get("responses").and_then(Value::as_object)) {
        let mut statuses: BTreeSet<String> = old_responses.keys().cloned().collect();
        statuses.extend(new_responses.keys().cloned());

        for status in statuses {
            let (Some(old_node), Some(new_node)) = (response_node(old_op, &status), response_node(new_op, &status)) else {
                continue;
            };
            let pointer_prefix = format!("responses.{status}");
            match (resolve(old_components, old_node), resolve(new_components, new_node)) {
                (Ok(old_schema), Ok(new_schema)) => {
                    diff_schema_fields(&old_schema, &new_schema, path, method, &pointer_prefix, 0, BodyKind::Response, out);
                }
                (Err(cycle), _) | (_, Err(cycle)) => push_cycle_diagnostic(path, method, &pointer_prefix, &cycle, out),
            }
        }
    }

    // Parameters, keyed by (name, location).
    let old_params = old_op.get("parameters").and_then(Value::as_array).cloned().unwrap_or_default();
    let new_params = new_op.get("parameters").and_then(Value::as_array).cloned().unwrap_or_default();
    let key = |p: &Value| -> (String, String) {
        (
            p.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            p.get("in").and_then(Value::as_str).unwrap_or_default().to_string(),
        )
    };
    let mut keys: BTreeSet<(String, String)> = old_params.iter().map(key).collect();
    keys.extend(new_params.iter().map(key));
    for (name, location) in keys {
        let old_p = old_params.iter().find(|p| key(p) == (name.clone(), location.clone()));
        let new_p = new_params.iter().find(|p| key(p) == (name.clone(), location.clone()));
        let pointer = format!("parameters.{location}.{name}");
        match (old_p, new_p) {
            (None, Some(p)) if p.get("required").and_then(Value::as_bool).unwrap_or(false) => {
                out.push(ContractDiff::new(path, method, pointer, None, Some(name.clone()), DiffKind::ParameterAddedRequired));
            }
            (Some(_), None) => {
                out.push(ContractDiff::new(path, method, pointer, Some(name.clone()), None, DiffKind::ParameterRemoved));
            }
            (Some(old_p), Some(new_p)) => {
                let old_t = old_p.get("schema").and_then(|s| s.get("type")).and_then(Value::as_str);
                let new_t = new_p.get("schema").and_then(|s| s.get("type")).and_then(Value::as_str);
                if let (Some(old_t), Some(new_t)) = (old_t, new_t) {
                    if old_t != new_t {
                        out.push(ContractDiff::new(
                            path,
                            method,
                            pointer,
                            Some(old_t.to_string()),
                            Some(new_t.to_string()),
                            DiffKind::ParameterTypeChanged,
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    // Content-type set.
    let content_types = |op: &Value| -> BTreeSet<String> {
        op.get("requestBody")
            .and_then(|b| b.get("content"))
            .and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    };
    let old_ct = content_types(old_op);
    let new_ct = content_types(new_op);
    if old_ct != new_ct {
        out.push(ContractDiff::new(path, method, "requestBody.content", None, None, DiffKind::ContentTypeChanged));
    }

    // Security scheme set.
    let security_names = |op: &Value| -> BTreeSet<String> {
        op.get("security")
            .and_then(Value::as_array)
            .map(|reqs| reqs.iter().filter_map(|r| r.as_object()).flat_map(|m| m.keys().cloned()).collect())
            .unwrap_or_default()
    };
    if security_names(old_op) != security_names(new_op) {
        out.push(ContractDiff::new(path, method, "security", None, None, DiffKind::SecurityChanged));
    }
}

/// Diff two parsed contract documents. Deterministic and order-stable: sort
/// by path, then method, then field pointer (spec §4.2).
pub fn diff_contracts(old: &Value, new: &Value) -> Vec<ContractDiff> {
    let empty = serde_json::Map::new();
    let old_paths = old.get("paths").and_then(Value::as_object).unwrap_or(&empty);
    let new_paths = new.get("paths").and_then(Value::as_object).unwrap_or(&empty);

    let old_components = build_components(old);
    let new_components = build_components(new);

    let mut all_paths: BTreeSet<String> = old_paths.keys().cloned().collect();
    all_paths.extend(new_paths.keys().cloned());

    let mut diffs = Vec::new();

    for path in &all_paths {
        let old_methods = old_paths.get(path).and_then(Value::as_object);
        let new_methods = new_paths.get(path).and_then(Value::as_object);

        let mut all_methods: BTreeSet<String> = BTreeSet::new();
        if let Some(m) = old_methods {
            all_methods.extend(m.keys().filter(|k| HTTP_METHODS.contains(&k.as_str())).cloned());
        }
        if let Some(m) = new_methods {
            all_methods.extend(m.keys().filter(|k| HTTP_METHODS.contains(&k.as_str())).cloned());
        }

        for method in &all_methods {
            let old_op = old_methods.and_then(|m| m.get(method));
            let new_op = new_methods.and_then(|m| m.get(method));

            match (old_op, new_op) {
                (None, Some(_)) => diffs.push(ContractDiff::new(path, method, "", None, None, DiffKind::OperationAdded)),
                (Some(_), None) => diffs.push(ContractDiff::new(path, method, "", None, None, DiffKind::OperationRemoved)),
                (Some(old_op), Some(new_op)) => diff_operation(&old_components, &new_components, path, method, old_op, new_op, &mut diffs),
                (None, None) => unreachable!(),
            }
        }
    }

    diffs.sort_by(|a, b| (&a.path, &a.http_method, &a.field_pointer).cmp(&(&b.path, &b.http_method, &b.field_pointer)));
    diffs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diffing_identical_documents_yields_no_diffs() {
        let doc = serde_json::json!({
            "paths": {
                "/a": {"get": {"responses": {"200": {}}}}
            }
        });
        assert!(diff_contracts(&doc, &doc).is_empty());
    }

    #[test]
    fn detects_new_required_field() {
        let old = serde_json::json!({
            "paths": {
                "/api/v1/sessions": {
                    "post": {
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": {"team_id": {"type": "string"}, "agent_name": {"type": "string"}},
                                        "required": ["team_id"]
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });
        let new = serde_json::json!({
            "paths": {
                "/api/v1/sessions": {
                    "post": {
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": {"team_id": {"type": "string"}, "agent_name": {"type": "string"}, "priority": {"type": "string"}},
                                        "required": ["team_id", "priority"]
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });
        let diffs = diff_contracts(&old, &new);
        assert!(diffs.iter().any(|d| d.diff_kind == DiffKind::FieldAddedRequired && d.field_pointer.contains("priority")));
    }

    #[test]
    fn detects_operation_added_and_removed() {
        let old = serde_json::json!({"paths": {"/a": {"get": {}}}});
        let new = serde_json::json!({"paths": {"/a": {"get": {}, "post": {}}}});
        let diffs = diff_contracts(&old, &new);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].diff_kind, DiffKind::OperationAdded);
        assert_eq!(diffs[0].http_method, "post");
    }

    fn response_doc(schema: Value) -> Value {
        serde_json::json!({
            "paths": {
                "/api/v1/sessions": {
                    "get": {
                        "responses": {
                            "200": {
                                "content": {
                                    "application/json": { "schema": schema }
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn detects_response_field_removed() {
        let old = response_doc(serde_json::json!({
            "type": "object",
            "properties": {"id": {"type": "string"}, "legacy_status": {"type": "string"}}
        }));
        let new = response_doc(serde_json::json!({
            "type": "object",
            "properties": {"id": {"type": "string"}}
        }));
        let diffs = diff_contracts(&old, &new);
        assert!(diffs
            .iter()
            .any(|d| d.diff_kind == DiffKind::FieldRemoved && d.field_pointer.contains("legacy_status")));
    }

    #[test]
    fn detects_response_enum_narrowing() {
        let old = response_doc(serde_json::json!({
            "type": "object",
            "properties": {"status": {"type": "string", "enum": ["pending", "active", "archived"]}}
        }));
        let new = response_doc(serde_json::json!({
            "type": "object",
            "properties": {"status": {"type": "string", "enum": ["pending", "active"]}}
        }));
        let diffs = diff_contracts(&old, &new);
        assert!(diffs
            .iter()
            .any(|d| d.diff_kind == DiffKind::EnumValuesRemoved && d.field_pointer.contains("status")));
    }

    #[test]
    fn response_enum_widening_is_not_flagged() {
        let old = response_doc(serde_json::json!({
            "type": "object",
            "properties": {"status": {"type": "string", "enum": ["pending", "active"]}}
        }));
        let new = response_doc(serde_json::json!({
            "type": "object",
            "properties": {"status": {"type": "string", "enum": ["pending", "active", "archived"]}}
        }));
        let diffs = diff_contracts(&old, &new);
        assert!(!diffs.iter().any(|d| d.diff_kind == DiffKind::EnumValuesRemoved));
    }

    #[test]
    fn cyclic_ref_yields_diagnostic_instead_of_looping() {
        let old = serde_json::json!({
            "paths": {
                "/a": {
                    "get": {
                        "responses": {
                            "200": {
                                "content": {
                                    "application/json": { "schema": {"$ref": "#/components/schemas/Node"} }
                                }
                            }
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Node": {"$ref": "#/components/schemas/Node"}
                }
            }
        });
        let diffs = diff_contracts(&old, &old);
        assert!(diffs.iter().any(|d| d.diff_kind == DiffKind::NestedFieldTypeChanged && d.field_pointer == "responses.200"));
    }
}
