use serde::{Deserialize, Serialize};

/// The closed set of diff kinds the differ can emit (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    OperationAdded,
    OperationRemoved,
    FieldAddedRequired,
    FieldOptionalToRequired,
    FieldRemoved,
    FieldTypeChanged,
    EnumValuesRemoved,
    NestedFieldRemoved,
    NestedFieldAdded,
    NestedFieldTypeChanged,
    ArrayItemTypeChanged,
    ParameterAddedRequired,
    ParameterRemoved,
    ParameterTypeChanged,
    ContentTypeChanged,
    SecurityChanged,
    ResponseStructureChanged,
}

impl DiffKind {
    /// Every kind except `operation_added`, `nested_field_added`, and
    /// non-narrowing parameter changes is breaking (spec §4.3).
    pub fn is_breaking(self) -> bool {
        !matches!(self, DiffKind::OperationAdded | DiffKind::NestedFieldAdded)
    }
}

/// An ephemeral, in-memory record of one contract difference. Never
/// persisted — the classifier consumes a `Vec<ContractDiff>` and distills it
/// into a `ClassifiedChange`, which is what gets stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDiff {
    pub path: String,
    pub http_method: String,
    pub field_pointer: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub diff_kind: DiffKind,
}

impl ContractDiff {
    pub fn new(
        path: impl Into<String>,
        http_method: impl Into<String>,
        field_pointer: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
        diff_kind: DiffKind,
    ) -> Self {
        Self {
            path: path.into(),
            http_method: http_method.into(),
            field_pointer: field_pointer.into(),
            old_value,
            new_value,
            diff_kind,
        }
    }

    pub fn route(&self) -> String {
        format!("{} {}", self.http_method.to_uppercase(), self.path)
    }
}
