// # Template Module
//
// Variable model for document templates:
//
// - **TemplateVariableSet**: simple and section variable names detected in a template
// - **VariableValues**: user-entered values, one tagged value per variable name
// - **validate_for_fill**: required-field checks run before a merge
//
// Values are resolved against the variable set once (`reconcile`), so every
// later consumer sees a `VariableValue::Simple` or `VariableValue::Section`
// rather than inspecting JSON shapes at runtime.

mod validation;
mod values;
mod variables;

use thiserror::Error;

pub use validation::{validate_for_fill, FieldErrors};
pub use values::{SectionInstance, TableRow, VariableValue, VariableValues};
pub use variables::{RawVariableSet, TemplateVariableSet, VariableKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error(
        "Malformed detection result: total_count is {total_count} but {simple} simple and {sections} section variables were listed"
    )]
    MalformedDetectionResult {
        total_count: i64,
        simple: usize,
        sections: usize,
    },
    #[error("Variable '{0}' is listed more than once")]
    DuplicateVariable(String),
    #[error("Variable '{0}' is not part of this template")]
    UnknownVariable(String),
    /// `expected` is the kind the edit operation requires
    #[error("Variable '{name}' holds a value of the wrong kind (expected {expected})")]
    KindMismatch { name: String, expected: VariableKind },
    #[error("Section '{section}' has no instance at index {index}")]
    InstanceOutOfRange { section: String, index: usize },
    #[error("Section '{section}' instance {instance} has no row at index {index}")]
    RowOutOfRange {
        section: String,
        instance: usize,
        index: usize,
    },
    #[error("Section '{0}' must keep at least one instance")]
    LastInstance(String),
    #[error("Section '{section}' instance {instance} must keep at least one row")]
    LastRow { section: String, instance: usize },
}
