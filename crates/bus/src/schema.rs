//! Record schema descriptions and backward-compatibility checks.
//!
//! A consumer built against `old` must keep working when producers switch
//! to `new`. Adding optional or defaulted fields is fine; everything that
//! could break an existing reader is a violation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    Map,
    List,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

impl FieldSchema {
    pub fn required(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn breaks_old_readers(&self) -> bool {
        self.required && self.default.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub name: String,
    pub version: u16,
    pub fields: Vec<FieldSchema>,
}

impl RecordSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Schema of the raw event record as published on `kurier.events.raw`.
    pub fn raw_event() -> Self {
        use FieldType::*;
        Self {
            name: "RawEvent".into(),
            version: 1,
            fields: vec![
                FieldSchema::required("eventId", String),
                FieldSchema::required("sourceEntityId", String),
                FieldSchema::required("eventType", String),
                FieldSchema::optional("attributes", Map).with_default(Value::Object(Default::default())),
                FieldSchema::required("timestamp", Timestamp),
                FieldSchema::optional("origin", String).with_default(Value::String(std::string::String::new())),
            ],
        }
    }

    /// Schema of the enriched event record on `kurier.events.enriched`.
    pub fn enriched_event() -> Self {
        use FieldType::*;
        Self {
            name: "EnrichedEvent".into(),
            version: 1,
            fields: vec![
                FieldSchema::required("eventId", String),
                FieldSchema::required("sourceEntityId", String),
                FieldSchema::required("eventType", String),
                FieldSchema::required("segment", String),
                FieldSchema::required("normalizedAttributes", Map),
                FieldSchema::required("derived", Map),
                FieldSchema::required("sourceTimestamp", Timestamp),
                FieldSchema::required("processingTimestamp", Timestamp),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compatibility {
    pub compatible: bool,
    pub violations: Vec<String>,
}

/// Check that `new` can replace `old` without breaking existing consumers.
pub fn check_compatibility(old: &RecordSchema, new: &RecordSchema) -> Compatibility {
    let mut violations = Vec::new();

    let removed: Vec<&FieldSchema> = old
        .fields
        .iter()
        .filter(|f| new.field(&f.name).is_none())
        .collect();
    let added: Vec<&FieldSchema> = new
        .fields
        .iter()
        .filter(|f| old.field(&f.name).is_none())
        .collect();

    for old_field in &old.fields {
        if let Some(new_field) = new.field(&old_field.name) {
            if new_field.field_type != old_field.field_type {
                violations.push(format!(
                    "field '{}' changed type from {:?} to {:?}",
                    old_field.name, old_field.field_type, new_field.field_type
                ));
            }
            if new_field.breaks_old_readers() && !old_field.required {
                violations.push(format!(
                    "field '{}' became required without a default",
                    old_field.name
                ));
            }
        }
    }

    let mut renamed_targets = Vec::new();
    for old_field in &removed {
        let rename = added.iter().find(|a| {
            a.field_type == old_field.field_type && !renamed_targets.contains(&a.name)
        });
        match rename {
            Some(target) => {
                renamed_targets.push(target.name.clone());
                violations.push(format!(
                    "field '{}' appears renamed to '{}'",
                    old_field.name, target.name
                ));
            }
            None if old_field.required => {
                violations.push(format!("required field '{}' was removed", old_field.name));
            }
            None => {}
        }
    }

    for new_field in &added {
        if renamed_targets.contains(&new_field.name) {
            continue;
        }
        if new_field.breaks_old_readers() {
            violations.push(format!(
                "added required field '{}' has no default",
                new_field.name
            ));
        }
    }

    Compatibility {
        compatible: violations.is_empty(),
        violations,
    }
}
