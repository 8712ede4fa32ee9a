use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A contract schema node, represented as a tagged variant rather than
/// leaning on call-stack recursion to walk arbitrarily nested/cyclic
/// `$ref` graphs.
///
/// Reference resolution happens before diffing via an explicit
/// pointer -> node map with a visited-set, never through implicit recursion
/// on the raw document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Schema {
    Scalar {
        #[serde(rename = "type")]
        type_name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        enum_values: Vec<String>,
    },
    Object {
        #[serde(default)]
        properties: BTreeMap<String, Schema>,
        #[serde(default)]
        required: Vec<String>,
    },
    Array {
        items: Box<Schema>,
    },
    /// An unresolved `#/...` pointer. Resolved away before the differ runs;
    /// surviving one at diff time means the document had a dangling or
    /// cyclic reference.
    Ref {
        pointer: String,
    },
}

impl Schema {
    pub fn scalar(type_name: impl Into<String>) -> Self {
        Schema::Scalar {
            type_name: type_name.into(),
            enum_values: Vec::new(),
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Schema::Object { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Schema::Array { .. })
    }
}

/// Resolves `#/`-prefixed pointers within a document's component map,
/// tracking visited pointers to terminate on cycles instead of recursing
/// unbounded on the call stack.
pub struct RefResolver<'a> {
    components: &'a BTreeMap<String, Schema>,
}

/// Reference pointers form a cycle that the caller's depth bound could not
/// otherwise detect.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cyclic $ref detected: {0}")]
pub struct CycleDetected(pub String);

impl<'a> RefResolver<'a> {
    pub fn new(components: &'a BTreeMap<String, Schema>) -> Self {
        Self { components }
    }

    /// Resolve `schema` transitively, following `Ref` nodes until a
    /// non-`Ref` node is reached. Returns `CycleDetected` if a pointer is
    /// revisited before resolving to a concrete node.
    pub fn resolve(&self, schema: &Schema) -> Result<Schema, CycleDetected> {
        let mut visited = std::collections::BTreeSet::new();
        self.resolve_inner(schema, &mut visited)
    }

    fn resolve_inner(
        &self,
        schema: &Schema,
        visited: &mut std::collections::BTreeSet<String>,
    ) -> Result<Schema, CycleDetected> {
        match schema {
            Schema::Ref { pointer } => {
                if !visited.insert(pointer.clone()) {
                    return Err(CycleDetected(pointer.clone()));
                }
                let name = pointer.trim_start_matches("#/").rsplit('/').next().unwrap_or(pointer);
                let target = self
                    .components
                    .get(name)
                    .or_else(|| self.components.get(pointer.as_str()))
                    .cloned()
                    .unwrap_or_else(|| Schema::scalar("unknown"));
                self.resolve_inner(&target, visited)
            }
            Schema::Object { properties, required } => {
                let mut resolved = BTreeMap::new();
                for (k, v) in properties {
                    resolved.insert(k.clone(), self.resolve_inner(v, visited)?);
                }
                Ok(Schema::Object {
                    properties: resolved,
                    required: required.clone(),
                })
            }
            Schema::Array { items } => Ok(Schema::Array {
                items: Box::new(self.resolve_inner(items, visited)?),
            }),
            other => Ok(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_simple_ref() {
        let mut components = BTreeMap::new();
        components.insert("Widget".to_string(), Schema::scalar("string"));
        let resolver = RefResolver::new(&components);
        let resolved = resolver
            .resolve(&Schema::Ref {
                pointer: "#/components/schemas/Widget".to_string(),
            })
            .unwrap();
        assert_eq!(resolved, Schema::scalar("string"));
    }

    #[test]
    fn detects_cycle() {
        let mut components = BTreeMap::new();
        components.insert(
            "A".to_string(),
            Schema::Ref {
                pointer: "#/components/schemas/A".to_string(),
            },
        );
        let resolver = RefResolver::new(&components);
        let err = resolver
            .resolve(&Schema::Ref {
                pointer: "#/components/schemas/A".to_string(),
            })
            .unwrap_err();
        assert_eq!(err.0, "#/components/schemas/A");
    }
}
