use super::values::VariableValues;
use super::TemplateError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Which collection a variable name belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    Simple,
    Section,
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableKind::Simple => write!(f, "simple value"),
            VariableKind::Section => write!(f, "section"),
        }
    }
}

/// Variable set as it appears on the wire (detector and template service)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawVariableSet {
    #[serde(default)]
    pub simple: Vec<String>,
    #[serde(default)]
    pub sections: Vec<String>,
    pub total_count: i64,
}

/// Variables detected in a template.
///
/// Construction always checks `total_count == simple.len() + sections.len()`
/// and that each name appears once across both collections. Deserialization
/// goes through the same checks, so a set read back from the stage store or
/// the template service is as trustworthy as one built from a fresh detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawVariableSet", into = "RawVariableSet")]
pub struct TemplateVariableSet {
    simple: Vec<String>,
    sections: Vec<String>,
}

impl TemplateVariableSet {
    pub fn from_detection(raw: RawVariableSet) -> Result<Self, TemplateError> {
        let listed = raw.simple.len() + raw.sections.len();
        if raw.total_count < 0 || raw.total_count as usize != listed {
            return Err(TemplateError::MalformedDetectionResult {
                total_count: raw.total_count,
                simple: raw.simple.len(),
                sections: raw.sections.len(),
            });
        }

        let mut seen = HashSet::new();
        for name in raw.simple.iter().chain(raw.sections.iter()) {
            if !seen.insert(name.as_str()) {
                return Err(TemplateError::DuplicateVariable(name.clone()));
            }
        }

        Ok(Self {
            simple: raw.simple,
            sections: raw.sections,
        })
    }

    pub fn simple(&self) -> &[String] {
        &self.simple
    }

    pub fn sections(&self) -> &[String] {
        &self.sections
    }

    pub fn total_count(&self) -> usize {
        self.simple.len() + self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_count() == 0
    }

    pub fn kind_of(&self, name: &str) -> Option<VariableKind> {
        if self.simple.iter().any(|n| n == name) {
            Some(VariableKind::Simple)
        } else if self.sections.iter().any(|n| n == name) {
            Some(VariableKind::Section)
        } else {
            None
        }
    }

    /// All names with their kind, simple variables first, each in detection order
    pub fn iter(&self) -> impl Iterator<Item = (&str, VariableKind)> {
        self.simple
            .iter()
            .map(|n| (n.as_str(), VariableKind::Simple))
            .chain(
                self.sections
                    .iter()
                    .map(|n| (n.as_str(), VariableKind::Section)),
            )
    }

    /// Fresh values for this set: empty strings and one default section instance each
    pub fn initial_values(&self) -> VariableValues {
        VariableValues::initialize(self)
    }
}

impl TryFrom<RawVariableSet> for TemplateVariableSet {
    type Error = TemplateError;

    fn try_from(raw: RawVariableSet) -> Result<Self, Self::Error> {
        Self::from_detection(raw)
    }
}

impl From<TemplateVariableSet> for RawVariableSet {
    fn from(set: TemplateVariableSet) -> Self {
        let total_count = set.total_count() as i64;
        RawVariableSet {
            simple: set.simple,
            sections: set.sections,
            total_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(simple: &[&str], sections: &[&str], total_count: i64) -> RawVariableSet {
        RawVariableSet {
            simple: simple.iter().map(|s| s.to_string()).collect(),
            sections: sections.iter().map(|s| s.to_string()).collect(),
            total_count,
        }
    }

    #[test]
    fn test_total_count_mismatch_is_malformed() {
        for total in [-1, 0, 1, 2, 4, 10] {
            let err = TemplateVariableSet::from_detection(raw(&["a", "b"], &["c"], total))
                .unwrap_err();
            assert!(matches!(
                err,
                TemplateError::MalformedDetectionResult { simple: 2, sections: 1, .. }
            ));
        }
        assert!(TemplateVariableSet::from_detection(raw(&["a", "b"], &["c"], 3)).is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = TemplateVariableSet::from_detection(raw(&["a"], &["a"], 2)).unwrap_err();
        assert_eq!(err, TemplateError::DuplicateVariable("a".to_string()));
    }

    #[test]
    fn test_order_and_kinds_preserved() {
        let set =
            TemplateVariableSet::from_detection(raw(&["client", "date"], &["items"], 3)).unwrap();
        let names: Vec<_> = set.iter().collect();
        assert_eq!(
            names,
            vec![
                ("client", VariableKind::Simple),
                ("date", VariableKind::Simple),
                ("items", VariableKind::Section),
            ]
        );
        assert_eq!(set.kind_of("items"), Some(VariableKind::Section));
        assert_eq!(set.kind_of("missing"), None);
    }

    #[test]
    fn test_deserialize_checks_invariant() {
        let bad = r#"{"simple":["a"],"sections":[],"total_count":2}"#;
        assert!(serde_json::from_str::<TemplateVariableSet>(bad).is_err());

        let good = r#"{"simple":["a"],"sections":["s"],"total_count":2}"#;
        let set: TemplateVariableSet = serde_json::from_str(good).unwrap();
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["total_count"], 2);
    }
}
