//! Field model shared by the normalizer, the orchestrator and the evaluator.
//!
//! A record is an ordered mapping of field name to a scalar [`FieldValue`].
//! An absent key and a key holding [`FieldValue::Null`] mean different things:
//! absent means "the source said nothing", `Null` means "looked, found nothing
//! usable". The normalizer relies on that distinction to stay idempotent.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

// ================================
// Field names
// ================================

pub const PRODUCT_LINE: &str = "product_line";
pub const ORIGIN_PORT_CODE: &str = "origin_port_code";
pub const ORIGIN_PORT_NAME: &str = "origin_port_name";
pub const DESTINATION_PORT_CODE: &str = "destination_port_code";
pub const DESTINATION_PORT_NAME: &str = "destination_port_name";
pub const INCOTERM: &str = "incoterm";
pub const CARGO_WEIGHT_KG: &str = "cargo_weight_kg";
pub const CARGO_CBM: &str = "cargo_cbm";
pub const IS_DANGEROUS: &str = "is_dangerous";

/// Canonical output fields, in report order.
pub const CANONICAL_FIELDS: [&str; 9] = [
    PRODUCT_LINE,
    ORIGIN_PORT_CODE,
    ORIGIN_PORT_NAME,
    DESTINATION_PORT_CODE,
    DESTINATION_PORT_NAME,
    INCOTERM,
    CARGO_WEIGHT_KG,
    CARGO_CBM,
    IS_DANGEROUS,
];

// Auxiliary input keys. The normalizer consumes them.
pub const CARGO_WEIGHT: &str = "cargo_weight";
pub const CARGO_WEIGHT_UNIT: &str = "cargo_weight_unit";
pub const CARGO: &str = "cargo";
pub const ROUTES: &str = "routes";
pub const TRANSSHIPMENT_PORT: &str = "transshipment_port";
pub const VIA_PORT: &str = "via_port";
pub const FINAL_DESTINATION_PORT_NAME: &str = "final_destination_port_name";
pub const FINAL_DESTINATION_PORT_CODE: &str = "final_destination_port_code";
pub const CARGO_ITEMS: &str = "cargo_items";

// ================================
// Values
// ================================

/// A single scalar value extracted for a field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Convert a JSON value. Arrays and objects are not scalars and yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

// ================================
// Records
// ================================

/// One cargo line item as reported by the model.
pub type LineItem = BTreeMap<String, FieldValue>;

/// Field mapping produced for one email.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    values: BTreeMap<String, FieldValue>,
    items: Vec<LineItem>,
}

/// Ground truth uses the same shape as extraction output.
pub type GroundTruthRecord = ExtractedFields;

impl ExtractedFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// The record written for an email whose extraction failed.
    pub fn null_record() -> Self {
        let mut fields = Self::new();
        fields.fill_missing_with_null();
        fields
    }

    /// Builder-style setter, mostly for tests and fixtures.
    pub fn with(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_item(mut self, item: LineItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<FieldValue>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.values.remove(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_text)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(FieldValue::as_number)
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(FieldValue::as_bool)
    }

    /// True when the key is absent or holds `Null`.
    pub fn is_empty_field(&self, key: &str) -> bool {
        self.get(key).map_or(true, FieldValue::is_null)
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn take_items(&mut self) -> Vec<LineItem> {
        std::mem::take(&mut self.items)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.items.is_empty()
    }

    /// Set every canonical field that is still absent. `is_dangerous` defaults
    /// to `false`, everything else to `Null`.
    pub fn fill_missing_with_null(&mut self) {
        for field in CANONICAL_FIELDS {
            if !self.contains(field) {
                let value = if field == IS_DANGEROUS {
                    FieldValue::Bool(false)
                } else {
                    FieldValue::Null
                };
                self.set(field, value);
            }
        }
    }

    /// Lenient conversion from a JSON object.
    ///
    /// Keys whose values are not scalars become `Null` and are reported back so
    /// the caller can log them. `cargo_items` is read as a list of line items.
    pub fn from_json_object(object: &Map<String, Value>) -> (Self, Vec<String>) {
        let mut fields = Self::new();
        let mut rejected = Vec::new();

        for (key, value) in object {
            if key == CARGO_ITEMS {
                match value {
                    Value::Array(items) => {
                        for item in items {
                            match item.as_object() {
                                Some(obj) => fields.items.push(scalar_map(obj)),
                                None => rejected.push(format!("{CARGO_ITEMS}[]")),
                            }
                        }
                    }
                    Value::Null => {}
                    _ => rejected.push(key.clone()),
                }
                continue;
            }
            match FieldValue::from_json(value) {
                Some(v) => fields.set(key, v),
                None => {
                    rejected.push(key.clone());
                    fields.set(key, FieldValue::Null);
                }
            }
        }

        (fields, rejected)
    }

    pub fn to_json(&self) -> Value {
        let mut map: Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        if !self.items.is_empty() {
            let items = self
                .items
                .iter()
                .map(|item| {
                    Value::Object(item.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
                })
                .collect();
            map.insert(CARGO_ITEMS.to_string(), Value::Array(items));
        }
        Value::Object(map)
    }
}

fn scalar_map(object: &Map<String, Value>) -> LineItem {
    object
        .iter()
        .filter_map(|(k, v)| FieldValue::from_json(v).map(|v| (k.clone(), v)))
        .collect()
}

impl Serialize for ExtractedFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ExtractedFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let object = value
            .as_object()
            .ok_or_else(|| D::Error::custom("expected a JSON object of fields"))?;
        Ok(Self::from_json_object(object).0)
    }
}

/// A record keyed by email id, as stored in output and ground-truth files.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedFields {
    pub id: String,
    pub fields: ExtractedFields,
}

impl Serialize for KeyedFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut value = self.fields.to_json();
        if let Value::Object(map) = &mut value {
            map.insert("id".to_string(), Value::String(self.id.clone()));
        }
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for KeyedFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let mut object = match value {
            Value::Object(map) => map,
            _ => return Err(D::Error::custom("expected a JSON object with an \"id\"")),
        };
        let id = object
            .remove("id")
            .and_then(id_text)
            .ok_or_else(|| D::Error::custom("record is missing a string \"id\""))?;
        Ok(Self {
            id,
            fields: ExtractedFields::from_json_object(&object).0,
        })
    }
}

/// Email ids appear both as strings and as bare numbers.
fn id_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    id_text(Value::deserialize(deserializer)?)
        .ok_or_else(|| D::Error::custom("\"id\" must be a string or a number"))
}

// ================================
// Inputs and enumerations
// ================================

/// One input email. Extra keys in the input file are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

impl EmailRecord {
    pub fn new(id: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductLine {
    #[serde(rename = "pl_sea_import_lcl")]
    SeaImportLcl,
    #[serde(rename = "pl_sea_export_lcl")]
    SeaExportLcl,
}

impl ProductLine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SeaImportLcl => "pl_sea_import_lcl",
            Self::SeaExportLcl => "pl_sea_export_lcl",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pl_sea_import_lcl" => Some(Self::SeaImportLcl),
            "pl_sea_export_lcl" => Some(Self::SeaExportLcl),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Incoterm {
    Fob,
    Cif,
    Cfr,
    Exw,
    Ddp,
    Dap,
    Fca,
    Cpt,
    Cip,
    Dpu,
    Ddu,
    Fas,
    Dat,
}

impl Incoterm {
    pub const ALL: [Incoterm; 13] = [
        Self::Fob,
        Self::Cif,
        Self::Cfr,
        Self::Exw,
        Self::Ddp,
        Self::Dap,
        Self::Fca,
        Self::Cpt,
        Self::Cip,
        Self::Dpu,
        Self::Ddu,
        Self::Fas,
        Self::Dat,
    ];

    /// Used when the email names no incoterm at all.
    pub const DEFAULT: Incoterm = Self::Fob;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fob => "FOB",
            Self::Cif => "CIF",
            Self::Cfr => "CFR",
            Self::Exw => "EXW",
            Self::Ddp => "DDP",
            Self::Dap => "DAP",
            Self::Fca => "FCA",
            Self::Cpt => "CPT",
            Self::Cip => "CIP",
            Self::Dpu => "DPU",
            Self::Ddu => "DDU",
            Self::Fas => "FAS",
            Self::Dat => "DAT",
        }
    }

    /// Case-insensitive match on the exact token.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        Self::ALL
            .into_iter()
            .find(|term| term.as_str().eq_ignore_ascii_case(token))
    }
}

impl fmt::Display for Incoterm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
