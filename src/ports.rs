//! Port code table: code → canonical name with passthrough, plus the reverse
//! name → code lookup and India detection.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use tracing::debug;

use crate::fields::{ExtractedFields, ProductLine, DESTINATION_PORT_CODE, ORIGIN_PORT_CODE};

/// Locode country prefix for India.
pub const INDIA_PREFIX: &str = "IN";

/// One row of the reference file. `name` may list several names split by `/`.
#[derive(Debug, Clone, Deserialize)]
pub struct PortEntry {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
}

/// Accepted layouts of the reference file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PortTableFile {
    List(Vec<PortEntry>),
    Map(BTreeMap<String, String>),
}

impl PortTableFile {
    pub fn into_entries(self) -> Vec<PortEntry> {
        match self {
            Self::List(entries) => entries,
            Self::Map(map) => map
                .into_iter()
                .map(|(code, name)| PortEntry { code, name })
                .collect(),
        }
    }
}

/// Immutable lookup table, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct PortCodeTable {
    by_code: HashMap<String, String>,
    /// Upper-cased name → every code listed under it, in file order.
    by_name: HashMap<String, Vec<String>>,
}

impl PortCodeTable {
    pub fn from_entries(entries: impl IntoIterator<Item = PortEntry>) -> Self {
        let mut table = Self::default();

        for entry in entries {
            let code = entry.code.trim();
            let names: Vec<&str> = entry
                .name
                .split('/')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .collect();
            if code.is_empty() || names.is_empty() {
                continue;
            }

            // First name of the first entry for a code is canonical.
            table
                .by_code
                .entry(code.to_string())
                .or_insert_with(|| names[0].to_string());

            for name in names {
                let codes = table.by_name.entry(name.to_uppercase()).or_default();
                if !codes.iter().any(|c| c == code) {
                    codes.push(code.to_string());
                }
            }
        }

        table
    }

    /// Canonical name for `code`, or `code` itself when unknown.
    /// Keys are case-sensitive; callers upper-case codes first.
    pub fn resolve(&self, code: &str) -> String {
        self.name_for(code)
            .map(str::to_string)
            .unwrap_or_else(|| code.to_string())
    }

    pub fn name_for(&self, code: &str) -> Option<&str> {
        self.by_code.get(code).map(String::as_str)
    }

    pub fn codes_for_name(&self, name: &str) -> &[String] {
        self.by_name
            .get(&name.trim().to_uppercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Best code for a port name. With several candidates, a code starting with
    /// `country_prefix` wins; otherwise the first listed code. For a combined
    /// `"A / B"` name only the first port is looked up.
    pub fn code_for_name(&self, name: &str, country_prefix: Option<&str>) -> Option<String> {
        let primary = name.split('/').next().unwrap_or(name).trim();
        let codes = self.codes_for_name(primary);

        match codes {
            [] => None,
            [only] => Some(only.clone()),
            [first, ..] => {
                if let Some(prefix) = country_prefix {
                    let prefix = prefix.to_uppercase();
                    if let Some(matching) = codes.iter().find(|c| c.starts_with(&prefix)) {
                        debug!(
                            "Multiple codes for '{}': {:?}. Selected '{}' (matches {} prefix)",
                            primary, codes, matching, prefix
                        );
                        return Some(matching.clone());
                    }
                }
                debug!("Multiple codes for '{}': {:?}. Using first: '{}'", primary, codes, first);
                Some(first.clone())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    pub fn name_count(&self) -> usize {
        self.by_name.len()
    }
}

/// A locode starting with `IN` is an Indian port.
pub fn is_indian_code(code: &str) -> bool {
    code.trim()
        .get(..INDIA_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(INDIA_PREFIX))
}

/// Product line implied by which side of the shipment is in India.
/// An Indian destination means import; otherwise an Indian origin means export.
pub fn india_side(fields: &ExtractedFields) -> Option<ProductLine> {
    let indian = |key: &str| fields.text(key).is_some_and(is_indian_code);

    if indian(DESTINATION_PORT_CODE) {
        Some(ProductLine::SeaImportLcl)
    } else if indian(ORIGIN_PORT_CODE) {
        Some(ProductLine::SeaExportLcl)
    } else {
        None
    }
}
