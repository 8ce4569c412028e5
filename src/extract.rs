//! Extraction orchestrator: one model call per email, then normalization and
//! port enrichment.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{ExtractionError, ModelError};
use crate::fields::*;
use crate::model::ExtractionModel;
use crate::normalize::{
    detect_incoterm, detect_route_legs, normalize, normalize_port_code, normalize_port_name,
};
use crate::ports::{india_side, PortCodeTable, INDIA_PREFIX};
use crate::prompt::{system_prompt, user_prompt, DEFAULT_INSTRUCTIONS};

/// Result of a batch run. Every input email has a record, failed ones
/// null-filled.
#[derive(Debug)]
pub struct BatchOutcome {
    pub records: Vec<KeyedFields>,
    pub errors: Vec<ExtractionError>,
}

pub struct Extractor<M> {
    model: M,
    ports: Arc<PortCodeTable>,
    system_prompt: String,
}

impl<M: ExtractionModel> Extractor<M> {
    pub fn new(model: M, ports: Arc<PortCodeTable>) -> Self {
        Self {
            model,
            ports,
            system_prompt: system_prompt(DEFAULT_INSTRUCTIONS),
        }
    }

    /// Replace the built-in instructions.
    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.system_prompt = system_prompt(instructions);
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Extract, normalize and enrich one email.
    ///
    /// Fields that fail to parse become null; the record is still returned.
    /// Only an unreachable model or a reply that is not a JSON object fail.
    pub async fn process(&self, email: &EmailRecord) -> Result<ExtractedFields, ExtractionError> {
        let reply = self
            .model
            .complete(&self.system_prompt, &user_prompt(email))
            .await
            .map_err(|source| classify_model_error(&email.id, source))?;

        let object = match &reply {
            Value::Object(object) => object,
            other => {
                return Err(ExtractionError::MalformedResponse {
                    email_id: email.id.clone(),
                    reason: format!("expected a JSON object, got {}", json_kind(other)),
                })
            }
        };

        let (mut raw, rejected) = ExtractedFields::from_json_object(object);
        if !rejected.is_empty() {
            warn!("Unparseable fields for {}: {:?}", email.id, rejected);
        }
        raw.remove("id");
        debug!("Raw fields for {}: {}", email.id, raw.to_json());

        prepare_from_email(&mut raw, email, &self.ports);
        let mut fields = normalize(raw);
        self.enrich(&mut fields);
        fields.fill_missing_with_null();
        Ok(fields)
    }

    /// Process emails with up to `concurrency` model calls in flight. Input
    /// order is kept and no failure stops the batch.
    pub async fn process_batch(
        &self,
        emails: &[EmailRecord],
        concurrency: usize,
        progress: &ProgressBar,
    ) -> BatchOutcome {
        let results: Vec<(String, Result<ExtractedFields, ExtractionError>)> = stream::iter(emails)
            .map(|email| async move {
                let result = self.process(email).await;
                progress.inc(1);
                (email.id.clone(), result)
            })
            .buffered(concurrency.max(1))
            .collect()
            .await;

        let mut outcome = BatchOutcome {
            records: Vec::with_capacity(results.len()),
            errors: Vec::new(),
        };
        for (id, result) in results {
            let fields = match result {
                Ok(fields) => fields,
                Err(e) => {
                    error!("❌ {e}");
                    outcome.errors.push(e);
                    ExtractedFields::null_record()
                }
            };
            outcome.records.push(KeyedFields { id, fields });
        }
        outcome
    }

    /// Port names from codes, product line from India detection, then codes
    /// from names with a country preference.
    fn enrich(&self, fields: &mut ExtractedFields) {
        for (code_key, name_key) in [
            (ORIGIN_PORT_CODE, ORIGIN_PORT_NAME),
            (DESTINATION_PORT_CODE, DESTINATION_PORT_NAME),
        ] {
            if !fields.is_empty_field(name_key) {
                continue;
            }
            // unknown codes leave the name empty rather than echoing the code
            let name = fields
                .text(code_key)
                .and_then(|code| self.ports.name_for(code))
                .map(normalize_port_name);
            if let Some(name) = name {
                fields.set(name_key, name);
            }
        }

        if fields.is_empty_field(PRODUCT_LINE) {
            if let Some(line) = india_side(fields) {
                fields.set(PRODUCT_LINE, line.as_str());
            }
        }

        let product_line = fields.text(PRODUCT_LINE).and_then(ProductLine::parse);
        let origin_prefix = (product_line == Some(ProductLine::SeaExportLcl)).then_some(INDIA_PREFIX);
        let destination_prefix =
            (product_line == Some(ProductLine::SeaImportLcl)).then_some(INDIA_PREFIX);

        for (name_key, code_key, prefix) in [
            (ORIGIN_PORT_NAME, ORIGIN_PORT_CODE, origin_prefix),
            (DESTINATION_PORT_NAME, DESTINATION_PORT_CODE, destination_prefix),
        ] {
            let Some(name) = fields.text(name_key) else {
                continue;
            };
            debug!("Looking up {code_key} for: {name} (country_preference: {prefix:?})");
            if let Some(code) = self.ports.code_for_name(name, prefix) {
                fields.set(code_key, code);
            }
        }

        if fields.is_empty_field(PRODUCT_LINE) {
            if let Some(line) = india_side(fields) {
                fields.set(PRODUCT_LINE, line.as_str());
            }
        }
    }
}

/// Form labels that look like three-letter location codes.
const FORM_LABELS: [&str; 6] = ["POL", "POD", "POR", "FPD", "ETA", "ETD"];

/// A route endpoint taken from free text counts only if the port table knows
/// it, or it is a bare three-letter location code such as `"JED"` (with an
/// optional `ICD`/`CFS` qualifier).
fn looks_like_port(endpoint: &str, ports: &PortCodeTable) -> bool {
    if ports.name_for(&normalize_port_code(endpoint)).is_some()
        || ports.code_for_name(&normalize_port_name(endpoint), None).is_some()
    {
        return true;
    }
    let tokens: Vec<&str> = endpoint
        .split_whitespace()
        .filter(|t| !matches!(*t, "ICD" | "CFS"))
        .collect();
    match tokens.as_slice() {
        [code] => {
            code.len() == 3
                && code.chars().all(|c| c.is_ascii_uppercase())
                && !FORM_LABELS.contains(code)
                && Incoterm::parse(code).is_none()
        }
        _ => false,
    }
}

/// Hints taken from the email text itself, applied before normalization.
///
/// A null incoterm is replaced by the one term the email names, or dropped so
/// the default applies. Arrow-marked multi-leg routes in the text become the
/// `routes` key when every endpoint looks like a port and the model did not
/// already combine the ports.
fn prepare_from_email(raw: &mut ExtractedFields, email: &EmailRecord, ports: &PortCodeTable) {
    if raw.get(INCOTERM) == Some(&FieldValue::Null) {
        match detect_incoterm(&email.body).or_else(|| detect_incoterm(&email.subject)) {
            Some(term) => raw.set(INCOTERM, term.as_str()),
            None => {
                raw.remove(INCOTERM);
            }
        }
    }

    if raw.contains(ROUTES) || raw.text(ORIGIN_PORT_NAME).is_some_and(|n| n.contains('/')) {
        return;
    }
    let mut legs = detect_route_legs(&email.body);
    if legs.len() < 2 {
        legs = detect_route_legs(&email.subject);
    }
    if legs.len() < 2 {
        return;
    }
    if !legs
        .iter()
        .all(|(origin, destination)| looks_like_port(origin, ports) && looks_like_port(destination, ports))
    {
        debug!("Ignoring arrow lines in {} that do not name ports: {:?}", email.id, legs);
        return;
    }
    let routes = legs
        .iter()
        .map(|(origin, destination)| format!("{origin}->{destination}"))
        .collect::<Vec<_>>()
        .join("; ");
    raw.set(ROUTES, routes);
}

fn classify_model_error(email_id: &str, source: ModelError) -> ExtractionError {
    if source.is_unavailable() {
        ExtractionError::ModelUnavailable {
            email_id: email_id.to_string(),
            source,
        }
    } else {
        ExtractionError::MalformedResponse {
            email_id: email_id.to_string(),
            reason: source.to_string(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
