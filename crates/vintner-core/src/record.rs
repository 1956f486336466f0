use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CoreError, Result};

/// Free-form annotations attached to a record (review flags, price ranges, ...).
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Opaque, stable identifier of a catalog record.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A catalog item as scraped from a third-party source.
///
/// A missing id or a missing or null name deserializes as empty so that `validate`
/// rejects that one record instead of the whole batch failing to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub id: RecordId,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,

    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    /// Provenance, usually the origin domain.
    #[serde(default)]
    pub source: String,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl Record {
    pub fn new(id: impl Into<RecordId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            brand: None,
            category: None,
            price: None,
            source: String::new(),
            created_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Checks the record-level invariants: non-empty id and name, sane price.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "record named {:?} has an empty identifier",
                self.name
            )));
        }
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "record {} has an empty name",
                self.id
            )));
        }
        if let Some(price) = self.price {
            if !price.is_finite() || price < 0.0 {
                return Err(CoreError::Validation(format!(
                    "record {} has an invalid price {price}",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// The price when it can take part in price statistics (present and positive).
    pub fn usable_price(&self) -> Option<f64> {
        self.price.filter(|price| price.is_finite() && *price > 0.0)
    }

    /// Brand with surrounding whitespace removed, `None` when blank.
    pub fn brand_str(&self) -> Option<&str> {
        self.brand
            .as_deref()
            .map(str::trim)
            .filter(|brand| !brand.is_empty())
    }

    /// Category with surrounding whitespace removed, `None` when blank.
    pub fn category_str(&self) -> Option<&str> {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|category| !category.is_empty())
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_blank_name() {
        let record = Record::new("r1", "   ");
        let err = record.validate().unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(err.to_string().contains("r1"));
    }

    #[test]
    fn validate_rejects_negative_price() {
        let record = Record::new("r2", "Buffalo Trace").with_price(-1.0);
        assert!(record.validate().is_err());
    }

    #[test]
    fn validate_accepts_minimal_record() {
        let record = Record::new("r3", "Eagle Rare 10 Year");
        assert!(record.validate().is_ok());
    }

    #[test]
    fn usable_price_ignores_zero() {
        assert_eq!(Record::new("a", "x").with_price(0.0).usable_price(), None);
        assert_eq!(
            Record::new("b", "x").with_price(29.99).usable_price(),
            Some(29.99)
        );
    }

    #[test]
    fn deserializes_type_alias_and_defaults() {
        let json = r#"{
            "id": "spirit-1",
            "name": "Blanton's Single Barrel",
            "type": "Bourbon",
            "created_at": "2024-03-01T12:00:00Z"
        }"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, RecordId::from("spirit-1"));
        assert_eq!(record.category_str(), Some("Bourbon"));
        assert_eq!(record.brand_str(), None);
        assert!(record.metadata.is_empty());
        assert!(record.source.is_empty());
    }

    #[test]
    fn nameless_entries_still_parse_and_fail_validation() {
        let json = r#"[
            {"id": "ok", "name": "Weller Special Reserve", "created_at": "2024-03-01T12:00:00Z"},
            {"id": "missing", "price": 24.99},
            {"id": "null", "name": null}
        ]"#;
        let records: Vec<Record> = serde_json::from_str(json).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].validate().is_ok());
        assert_eq!(records[1].name, "");
        assert!(matches!(records[1].validate(), Err(CoreError::Validation(_))));
        assert!(records[2].validate().is_err());
    }
}
