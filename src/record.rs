//! Schema-agnostic record container.
//!
//! Every replicated record is handled as an untyped payload: object metadata
//! plus a map of named sections. Only two sections are meaningful to the
//! engine, `spec` and `status`, and both are accessed through typed helpers
//! so the reconciliation logic never needs per-type code.
//!
//! ```text
//! Record
//! ├── metadata: ObjectMeta   # name, namespace, labels, finalizers, ...
//! └── sections: Map          # { "spec": {...}, "status": {...}, ... }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::SystemTime;
use thiserror::Error;

/// A named top-level section of a record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Spec,
    Status,
}

impl Section {
    /// The payload key for this section.
    pub fn key(&self) -> &'static str {
        match self {
            Section::Spec => "spec",
            Section::Status => "status",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Errors from typed section access.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SectionError {
    /// The section is not present in the payload.
    #[error("section `{section}` absent from {name}")]
    Absent { section: Section, name: String },

    /// The section is present but is not a nested map.
    #[error("section `{section}` of {name} is not an object")]
    NotAnObject { section: Section, name: String },
}

/// Object metadata shared by every record type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub finalizers: Vec<String>,
    /// Opaque version string for optimistic concurrency. `None` on records
    /// that have not been persisted yet.
    #[serde(default)]
    pub resource_version: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    /// Set by the store once deletion has been requested while finalizers
    /// are still present.
    #[serde(default)]
    pub deletion_timestamp: Option<SystemTime>,
}

/// A generic record: metadata plus untyped nested-map sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub sections: Map<String, Value>,
}

impl Record {
    /// Create an empty record with the given namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                ..Default::default()
            },
            sections: Map::new(),
        }
    }

    /// Builder-style helper to set a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    /// Builder-style helper to set the `spec` section.
    pub fn with_spec(mut self, spec: Value) -> Self {
        self.sections.insert(Section::Spec.key().to_string(), spec);
        self
    }

    /// Builder-style helper to set the `status` section.
    pub fn with_status(mut self, status: Value) -> Self {
        self.sections.insert(Section::Status.key().to_string(), status);
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.metadata.labels
    }

    /// Whether deletion has been requested for this record.
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Raw access to a section, if present.
    pub fn section(&self, section: Section) -> Option<&Value> {
        self.sections.get(section.key())
    }

    /// Typed access to a section as a nested map.
    pub fn section_map(&self, section: Section) -> Result<&Map<String, Value>, SectionError> {
        match self.section(section) {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(SectionError::NotAnObject {
                section,
                name: self.metadata.name.clone(),
            }),
            None => Err(SectionError::Absent {
                section,
                name: self.metadata.name.clone(),
            }),
        }
    }

    pub fn spec(&self) -> Result<&Map<String, Value>, SectionError> {
        self.section_map(Section::Spec)
    }

    pub fn status(&self) -> Result<&Map<String, Value>, SectionError> {
        self.section_map(Section::Status)
    }

    /// Replace a section, or remove it when `value` is `None`.
    pub fn set_section(&mut self, section: Section, value: Option<Value>) {
        match value {
            Some(v) => {
                self.sections.insert(section.key().to_string(), v);
            }
            None => {
                self.sections.remove(section.key());
            }
        }
    }

    /// Copy `section` from `other` into `self`, removing it if `other` lacks it.
    pub fn copy_section_from(&mut self, other: &Record, section: Section) {
        self.set_section(section, other.section(section).cloned());
    }

    /// Deep structural equality of one section across two records.
    ///
    /// Two absent sections are equal; an absent section never equals a
    /// present one, even if the present one is empty.
    pub fn section_eq(&self, other: &Record, section: Section) -> bool {
        self.section(section) == other.section(section)
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata.finalizers.iter().any(|f| f == finalizer)
    }

    /// Add a finalizer. Returns `false` if it was already present.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.metadata.finalizers.push(finalizer.to_string());
        true
    }

    /// Remove a finalizer. Returns `false` if it was not present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.metadata.finalizers.len();
        self.metadata.finalizers.retain(|f| f != finalizer);
        before != self.metadata.finalizers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_section_access() {
        let record = Record::new("ns", "a").with_spec(json!({"replicas": 3}));
        assert_eq!(record.spec().unwrap().get("replicas"), Some(&json!(3)));
        assert_eq!(
            record.status().unwrap_err(),
            SectionError::Absent {
                section: Section::Status,
                name: "a".to_string()
            }
        );
    }

    #[test]
    fn test_section_not_an_object() {
        let record = Record::new("ns", "a").with_spec(json!("scalar"));
        assert!(matches!(
            record.spec(),
            Err(SectionError::NotAnObject { section: Section::Spec, .. })
        ));
    }

    #[test]
    fn test_section_eq_is_deep() {
        let a = Record::new("ns", "a").with_spec(json!({"x": {"y": [1, 2, {"z": true}]}}));
        let b = Record::new("other", "b").with_spec(json!({"x": {"y": [1, 2, {"z": true}]}}));
        let c = Record::new("ns", "a").with_spec(json!({"x": {"y": [1, 2, {"z": false}]}}));
        assert!(a.section_eq(&b, Section::Spec));
        assert!(!a.section_eq(&c, Section::Spec));
    }

    #[test]
    fn test_absent_vs_empty_not_equal() {
        let absent = Record::new("ns", "a");
        let empty = Record::new("ns", "a").with_status(json!({}));
        assert!(absent.section_eq(&Record::new("ns", "b"), Section::Status));
        assert!(!absent.section_eq(&empty, Section::Status));
    }

    #[test]
    fn test_copy_section_removes_when_absent() {
        let mut target = Record::new("ns", "a").with_status(json!({"phase": "Ready"}));
        let source = Record::new("ns", "a");
        target.copy_section_from(&source, Section::Status);
        assert!(target.section(Section::Status).is_none());
    }

    #[test]
    fn test_finalizers() {
        let mut record = Record::new("ns", "a");
        assert!(record.add_finalizer("f"));
        assert!(!record.add_finalizer("f"));
        assert!(record.has_finalizer("f"));
        assert!(record.remove_finalizer("f"));
        assert!(!record.remove_finalizer("f"));
        assert!(record.metadata.finalizers.is_empty());
    }

    #[test]
    fn test_json_shape() {
        let record = Record::new("ns", "a")
            .with_label("k", "v")
            .with_spec(json!({"a": 1}))
            .with_status(json!({"b": 2}));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["metadata"]["name"], json!("a"));
        assert_eq!(value["spec"]["a"], json!(1));
        assert_eq!(value["status"]["b"], json!(2));

        let parsed: Record = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }
}
