use super::values::{VariableValue, VariableValues};
use super::variables::TemplateVariableSet;
use std::collections::BTreeMap;

/// Variable name -> error message. Empty means the form is valid.
pub type FieldErrors = BTreeMap<String, String>;

/// Check that values are ready to merge.
///
/// Every simple variable needs a non-blank value. Section variables are
/// accepted as entered, empty rows included.
pub fn validate_for_fill(set: &TemplateVariableSet, values: &VariableValues) -> FieldErrors {
    let mut errors = FieldErrors::new();

    for name in set.simple() {
        match values.get(name) {
            Some(VariableValue::Simple(value)) if !value.trim().is_empty() => {}
            Some(VariableValue::Section(_)) => {
                errors.insert(name.clone(), format!("{} must be a single value", name));
            }
            _ => {
                errors.insert(name.clone(), format!("{} is required", name));
            }
        }
    }

    for name in set.sections() {
        if !matches!(values.get(name), Some(VariableValue::Section(_))) {
            errors.insert(name.clone(), format!("{} is missing its section entries", name));
        }
    }

    errors
}
