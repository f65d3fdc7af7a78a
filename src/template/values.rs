use super::variables::{TemplateVariableSet, VariableKind};
use super::TemplateError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One key/value row of a section instance table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// One repetition of a section variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionInstance {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub table_rows: Vec<TableRow>,
}

impl Default for SectionInstance {
    /// A new instance always carries one empty row
    fn default() -> Self {
        Self {
            title: String::new(),
            table_rows: vec![TableRow::default()],
        }
    }
}

/// Value of a single variable.
///
/// Untagged on the wire: a JSON string is a simple value, a JSON array is a
/// list of section instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Simple(String),
    Section(Vec<SectionInstance>),
}

impl VariableValue {
    pub fn kind(&self) -> VariableKind {
        match self {
            VariableValue::Simple(_) => VariableKind::Simple,
            VariableValue::Section(_) => VariableKind::Section,
        }
    }

    fn default_for(kind: VariableKind) -> Self {
        match kind {
            VariableKind::Simple => VariableValue::Simple(String::new()),
            VariableKind::Section => VariableValue::Section(vec![SectionInstance::default()]),
        }
    }
}

/// User-entered values keyed by variable name.
///
/// Section edits never mutate a shared collection: each edit builds a new
/// instance list and swaps it in, so a clone taken before an edit (an undo
/// snapshot) is unaffected by it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableValues {
    entries: BTreeMap<String, VariableValue>,
}

impl VariableValues {
    /// Pure function of the variable set; calling it twice yields equal maps.
    pub fn initialize(set: &TemplateVariableSet) -> Self {
        let entries = set
            .iter()
            .map(|(name, kind)| (name.to_string(), VariableValue::default_for(kind)))
            .collect();
        Self { entries }
    }

    /// Resolve stored values against a variable set.
    ///
    /// Missing names get default values, names outside the set are dropped,
    /// and empty sections or rowless instances are padded back to their
    /// minimum shape. A value whose kind disagrees with the set is reset to
    /// that kind's default; every other value is kept. Returns the names
    /// that were reset.
    pub fn reconcile(&mut self, set: &TemplateVariableSet) -> Vec<String> {
        self.entries.retain(|name, _| set.kind_of(name).is_some());

        let mut reset = Vec::new();
        for (name, kind) in set.iter() {
            let entry = self
                .entries
                .entry(name.to_string())
                .or_insert_with(|| VariableValue::default_for(kind));

            if entry.kind() != kind {
                *entry = VariableValue::default_for(kind);
                reset.push(name.to_string());
            }

            if let VariableValue::Section(instances) = entry {
                if instances.is_empty() {
                    instances.push(SectionInstance::default());
                }
                for instance in instances.iter_mut() {
                    if instance.table_rows.is_empty() {
                        instance.table_rows.push(TableRow::default());
                    }
                }
            }
        }

        reset
    }

    pub fn get(&self, name: &str) -> Option<&VariableValue> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VariableValue)> {
        self.entries.iter()
    }

    pub fn simple(&self, name: &str) -> Option<&str> {
        match self.entries.get(name) {
            Some(VariableValue::Simple(value)) => Some(value),
            _ => None,
        }
    }

    pub fn section(&self, name: &str) -> Option<&[SectionInstance]> {
        match self.entries.get(name) {
            Some(VariableValue::Section(instances)) => Some(instances),
            _ => None,
        }
    }

    pub fn set_simple(&mut self, name: &str, value: impl Into<String>) -> Result<(), TemplateError> {
        match self.entries.get_mut(name) {
            Some(VariableValue::Simple(current)) => {
                *current = value.into();
                Ok(())
            }
            Some(VariableValue::Section(_)) => Err(TemplateError::KindMismatch {
                name: name.to_string(),
                expected: VariableKind::Simple,
            }),
            None => Err(TemplateError::UnknownVariable(name.to_string())),
        }
    }

    pub fn add_section_instance(&mut self, section: &str) -> Result<usize, TemplateError> {
        let mut next = self.section_for_edit(section)?;
        next.push(SectionInstance::default());
        let index = next.len() - 1;
        self.replace_section(section, next);
        Ok(index)
    }

    /// Removing the last remaining instance is refused.
    pub fn remove_section_instance(
        &mut self,
        section: &str,
        index: usize,
    ) -> Result<SectionInstance, TemplateError> {
        let mut next = self.section_for_edit(section)?;
        if index >= next.len() {
            return Err(TemplateError::InstanceOutOfRange {
                section: section.to_string(),
                index,
            });
        }
        if next.len() == 1 {
            return Err(TemplateError::LastInstance(section.to_string()));
        }
        let removed = next.remove(index);
        self.replace_section(section, next);
        Ok(removed)
    }

    pub fn can_remove_section_instance(&self, section: &str) -> bool {
        self.section(section).map(|s| s.len() > 1).unwrap_or(false)
    }

    pub fn set_section_title(
        &mut self,
        section: &str,
        instance: usize,
        title: impl Into<String>,
    ) -> Result<(), TemplateError> {
        let title = title.into();
        self.edit_instance(section, instance, |inst| {
            inst.title = title;
            Ok(())
        })
    }

    pub fn add_table_row(&mut self, section: &str, instance: usize) -> Result<usize, TemplateError> {
        let mut index = 0;
        self.edit_instance(section, instance, |inst| {
            inst.table_rows.push(TableRow::default());
            index = inst.table_rows.len() - 1;
            Ok(())
        })?;
        Ok(index)
    }

    /// Removing the last remaining row of an instance is refused.
    pub fn remove_table_row(
        &mut self,
        section: &str,
        instance: usize,
        row: usize,
    ) -> Result<TableRow, TemplateError> {
        let mut removed = None;
        self.edit_instance(section, instance, |inst| {
            if row >= inst.table_rows.len() {
                return Err(TemplateError::RowOutOfRange {
                    section: section.to_string(),
                    instance,
                    index: row,
                });
            }
            if inst.table_rows.len() == 1 {
                return Err(TemplateError::LastRow {
                    section: section.to_string(),
                    instance,
                });
            }
            removed = Some(inst.table_rows.remove(row));
            Ok(())
        })?;
        Ok(removed.unwrap_or_default())
    }

    pub fn set_table_row(
        &mut self,
        section: &str,
        instance: usize,
        row: usize,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), TemplateError> {
        let (key, value) = (key.into(), value.into());
        self.edit_instance(section, instance, |inst| match inst.table_rows.get_mut(row) {
            Some(target) => {
                *target = TableRow { key, value };
                Ok(())
            }
            None => Err(TemplateError::RowOutOfRange {
                section: section.to_string(),
                instance,
                index: row,
            }),
        })
    }

    /// Copy of a section's instances to edit and swap back in
    fn section_for_edit(&self, section: &str) -> Result<Vec<SectionInstance>, TemplateError> {
        match self.entries.get(section) {
            Some(VariableValue::Section(instances)) => Ok(instances.clone()),
            Some(VariableValue::Simple(_)) => Err(TemplateError::KindMismatch {
                name: section.to_string(),
                expected: VariableKind::Section,
            }),
            None => Err(TemplateError::UnknownVariable(section.to_string())),
        }
    }

    fn edit_instance<F>(&mut self, section: &str, instance: usize, edit: F) -> Result<(), TemplateError>
    where
        F: FnOnce(&mut SectionInstance) -> Result<(), TemplateError>,
    {
        let mut next = self.section_for_edit(section)?;
        let target = next
            .get_mut(instance)
            .ok_or_else(|| TemplateError::InstanceOutOfRange {
                section: section.to_string(),
                index: instance,
            })?;
        edit(target)?;
        self.replace_section(section, next);
        Ok(())
    }

    fn replace_section(&mut self, section: &str, instances: Vec<SectionInstance>) {
        self.entries
            .insert(section.to_string(), VariableValue::Section(instances));
    }
}
