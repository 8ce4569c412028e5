//! Deterministic post-processing of model output.
//!
//! [`normalize`] is total and idempotent: auxiliary keys (unit tags, free-form
//! cargo, routes, line items, transshipment hints) are consumed on the first
//! pass, and every canonical field is rewritten into a form the same rule maps
//! to itself.

use std::sync::LazyLock;

use regex::Regex;

use crate::fields::*;

pub const LBS_TO_KG: f64 = 0.453592;
pub const TONNE_TO_KG: f64 = 1000.0;
/// One revenue ton is one cubic meter or 1000 kg.
pub const KG_PER_REVENUE_TON: f64 = 1000.0;

/// Tokens kept upper case in port names.
const PORT_ACRONYMS: [&str; 6] = ["ICD", "CFS", "CY", "UAE", "USA", "UK"];

/// Values the model uses for "not known yet".
const PLACEHOLDERS: [&str; 10] = [
    "tbd",
    "tbc",
    "n/a",
    "na",
    "to be confirmed",
    "to be determined",
    "unknown",
    "none",
    "null",
    "-",
];

const NUMBER: &str = r"(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?|\.\d+)";
const UNIT: &str = r"(kilograms?|kilos?|kgs?|pounds?|lbs?|metric\s+tonnes?|metric\s+tons?|tonnes?|tons?|mt|t|cubic\s+met(?:er|re)s?|cbm|m3|revenue\s+tons?|r/t|rt)";

static QUANTITY_EXACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^\s*{NUMBER}\s*(?:{UNIT}\.?)?\s*$")).expect("static regex")
});

static QUANTITY_ANY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i){NUMBER}\s*{UNIT}\b")).expect("static regex")
});

static ROUTE_DELIMITER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[;|\n]").expect("static regex"));

static LEG_ARROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(?:->|→|=>)\s*").expect("static regex"));

static LEG_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+to\s+").expect("static regex"));

// ================================
// Units
// ================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Kilogram,
    Pound,
    Tonne,
    CubicMeter,
    RevenueTon,
}

impl Unit {
    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim().trim_end_matches('.').to_lowercase();
        let tag = tag.split_whitespace().collect::<Vec<_>>().join(" ");
        let unit = match tag.as_str() {
            "kg" | "kgs" | "kilo" | "kilos" | "kilogram" | "kilograms" => Self::Kilogram,
            "lb" | "lbs" | "pound" | "pounds" => Self::Pound,
            "t" | "mt" | "ton" | "tons" | "tonne" | "tonnes" | "metric ton" | "metric tons"
            | "metric tonne" | "metric tonnes" => Self::Tonne,
            "cbm" | "m3" | "m³" | "cubic meter" | "cubic meters" | "cubic metre"
            | "cubic metres" => Self::CubicMeter,
            "rt" | "r/t" | "revenue ton" | "revenue tons" => Self::RevenueTon,
            _ => return None,
        };
        Some(unit)
    }

    pub fn is_weight(&self) -> bool {
        matches!(self, Self::Kilogram | Self::Pound | Self::Tonne)
    }
}

/// A number with an optional unit tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub amount: f64,
    pub unit: Option<Unit>,
}

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok().filter(|n| n.is_finite())
}

fn quantity_from_captures(caps: &regex::Captures<'_>) -> Option<Quantity> {
    let amount = parse_amount(caps.get(1)?.as_str())?;
    let unit = match caps.get(2) {
        Some(tag) => Some(Unit::parse(tag.as_str())?),
        None => None,
    };
    Some(Quantity { amount, unit })
}

/// Parse a value that is exactly one quantity, e.g. `"1,800 KGS"` or `"2.4 RT"`.
pub fn parse_quantity(text: &str) -> Option<Quantity> {
    let text = text.replace('³', "3");
    QUANTITY_EXACT
        .captures(&text)
        .and_then(|caps| quantity_from_captures(&caps))
}

/// Every unit-tagged quantity in free text, in order.
pub fn find_quantities(text: &str) -> Vec<Quantity> {
    let text = text.replace('³', "3");
    QUANTITY_ANY
        .captures_iter(&text)
        .filter_map(|caps| quantity_from_captures(&caps))
        .collect()
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Convert a weight to kilograms, rounded to 2 decimals.
/// Returns `None` for volume units.
pub fn weight_to_kg(amount: f64, unit: Unit) -> Option<f64> {
    let kg = match unit {
        Unit::Kilogram => amount,
        Unit::Pound => amount * LBS_TO_KG,
        Unit::Tonne => amount * TONNE_TO_KG,
        Unit::CubicMeter | Unit::RevenueTon => return None,
    };
    Some(round2(kg))
}

// ================================
// Normalizer
// ================================

/// Apply every normalization rule to one record.
pub fn normalize(mut fields: ExtractedFields) -> ExtractedFields {
    clear_placeholders(&mut fields);
    select_line_items(&mut fields);
    convert_tagged_weight(&mut fields);
    absorb_free_form_cargo(&mut fields);
    coerce_weight(&mut fields);
    coerce_volume(&mut fields);
    resolve_transshipment(&mut fields);
    aggregate_routes(&mut fields);
    normalize_port_fields(&mut fields);
    normalize_incoterm(&mut fields);
    normalize_product_line(&mut fields);
    coerce_dangerous(&mut fields);
    // Rewritten names can land on a placeholder ("None;" -> "None").
    clear_placeholders(&mut fields);
    fields
}

fn is_placeholder(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || PLACEHOLDERS.iter().any(|p| p.eq_ignore_ascii_case(text))
}

/// "TBD", "N/A" and blank text mean null. The incoterm keeps blank text so its
/// own default applies.
fn clear_placeholders(fields: &mut ExtractedFields) {
    for key in CANONICAL_FIELDS {
        let blank = fields.text(key).is_some_and(is_placeholder);
        if blank && !(key == INCOTERM && fields.text(key).is_some_and(|t| t.trim().is_empty())) {
            fields.set(key, FieldValue::Null);
        }
    }
}

/// Store a quantity into the canonical weight/volume fields. Targets that
/// already hold a number are left alone.
fn absorb_quantity(fields: &mut ExtractedFields, quantity: Quantity) {
    let mut fill = |key: &str, value: f64| {
        if fields.number(key).is_none() {
            fields.set(key, round2(value));
        }
    };
    match quantity.unit {
        Some(Unit::RevenueTon) => {
            fill(CARGO_CBM, quantity.amount);
            fill(CARGO_WEIGHT_KG, quantity.amount * KG_PER_REVENUE_TON);
        }
        Some(Unit::CubicMeter) => fill(CARGO_CBM, quantity.amount),
        Some(unit) => {
            if let Some(kg) = weight_to_kg(quantity.amount, unit) {
                fill(CARGO_WEIGHT_KG, kg);
            }
        }
        None => {}
    }
}

fn parse_flag(value: &FieldValue) -> Option<bool> {
    match value {
        FieldValue::Bool(b) => Some(*b),
        FieldValue::Number(n) if *n == 1.0 => Some(true),
        FieldValue::Number(n) if *n == 0.0 => Some(false),
        FieldValue::Text(t) => match t.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

const WEIGHT_KEYS: [&str; 3] = [CARGO_WEIGHT_KG, CARGO_WEIGHT, CARGO_WEIGHT_UNIT];

/// Multi-item shipments keep one item's quantities. With dangerous goods the
/// first item replaces any aggregate; otherwise it only fills gaps.
fn select_line_items(fields: &mut ExtractedFields) {
    let items = fields.take_items();
    let Some(first) = items.first() else {
        return;
    };

    let dangerous_item = items
        .iter()
        .any(|item| item.get(IS_DANGEROUS).and_then(parse_flag) == Some(true));
    let dangerous =
        dangerous_item || fields.get(IS_DANGEROUS).and_then(parse_flag) == Some(true);

    if items.len() > 1 && dangerous {
        for key in WEIGHT_KEYS.iter().chain(&[CARGO_CBM, CARGO]) {
            fields.remove(key);
        }
        for key in WEIGHT_KEYS.iter().chain(&[CARGO_CBM, CARGO]) {
            if let Some(value) = first.get(*key) {
                fields.set(key, value.clone());
            }
        }
    } else {
        let has_weight =
            !fields.is_empty_field(CARGO_WEIGHT_KG) || !fields.is_empty_field(CARGO_WEIGHT);
        let has_volume = !fields.is_empty_field(CARGO_CBM);
        if !has_weight {
            for key in WEIGHT_KEYS {
                if let Some(value) = first.get(key) {
                    fields.set(key, value.clone());
                }
            }
        }
        if !has_volume {
            if let Some(value) = first.get(CARGO_CBM) {
                fields.set(CARGO_CBM, value.clone());
            }
        }
        if !has_weight && !has_volume && !fields.contains(CARGO) {
            if let Some(value) = first.get(CARGO) {
                fields.set(CARGO, value.clone());
            }
        }
    }

    if dangerous_item {
        fields.set(IS_DANGEROUS, true);
    }
}

/// `cargo_weight` + `cargo_weight_unit` → `cargo_weight_kg`. Only an explicit
/// tag converts; an untagged number is taken as kilograms.
fn convert_tagged_weight(fields: &mut ExtractedFields) {
    let unit_tag = fields.remove(CARGO_WEIGHT_UNIT);
    let Some(raw) = fields.remove(CARGO_WEIGHT) else {
        return;
    };
    if !fields.is_empty_field(CARGO_WEIGHT_KG) {
        return;
    }

    let tagged = unit_tag.as_ref().and_then(FieldValue::as_text).and_then(Unit::parse);
    let quantity = match &raw {
        FieldValue::Number(n) => Some(Quantity {
            amount: *n,
            unit: tagged,
        }),
        FieldValue::Text(t) => parse_quantity(t).map(|q| Quantity {
            unit: q.unit.or(tagged),
            ..q
        }),
        _ => None,
    };

    match quantity {
        Some(Quantity { amount, unit: None }) => fields.set(CARGO_WEIGHT_KG, round2(amount)),
        Some(q) => absorb_quantity(fields, q),
        None => fields.set(CARGO_WEIGHT_KG, raw),
    }
}

/// `cargo` free text like `"2.4 RT"` or `"1800 KGS / 3.8 CBM"`.
fn absorb_free_form_cargo(fields: &mut ExtractedFields) {
    let Some(FieldValue::Text(text)) = fields.remove(CARGO) else {
        return;
    };
    for quantity in find_quantities(&text) {
        absorb_quantity(fields, quantity);
    }
}

fn coerce_weight(fields: &mut ExtractedFields) {
    let Some(text) = fields.text(CARGO_WEIGHT_KG).map(str::to_string) else {
        return;
    };

    let quantity = parse_quantity(&text).or_else(|| {
        find_quantities(&text)
            .into_iter()
            .find(|q| q.unit.is_some_and(|u| u.is_weight() || u == Unit::RevenueTon))
    });

    match quantity {
        Some(Quantity { amount, unit: None }) => fields.set(CARGO_WEIGHT_KG, round2(amount)),
        Some(Quantity {
            amount,
            unit: Some(Unit::RevenueTon),
        }) => {
            fields.remove(CARGO_WEIGHT_KG);
            absorb_quantity(
                fields,
                Quantity {
                    amount,
                    unit: Some(Unit::RevenueTon),
                },
            );
        }
        Some(Quantity {
            amount,
            unit: Some(unit),
        }) => {
            if let Some(kg) = weight_to_kg(amount, unit) {
                fields.set(CARGO_WEIGHT_KG, kg);
            }
        }
        None => {}
    }
}

fn coerce_volume(fields: &mut ExtractedFields) {
    let Some(text) = fields.text(CARGO_CBM).map(str::to_string) else {
        return;
    };

    let quantity = parse_quantity(&text).or_else(|| {
        find_quantities(&text)
            .into_iter()
            .find(|q| matches!(q.unit, Some(Unit::CubicMeter | Unit::RevenueTon)))
    });

    match quantity {
        Some(Quantity {
            amount,
            unit: None | Some(Unit::CubicMeter),
        }) => fields.set(CARGO_CBM, round2(amount)),
        Some(q @ Quantity {
            unit: Some(Unit::RevenueTon),
            ..
        }) => {
            fields.remove(CARGO_CBM);
            absorb_quantity(fields, q);
        }
        _ => {}
    }
}

/// The final destination wins over a transshipment port. Via ports are not
/// tracked.
fn resolve_transshipment(fields: &mut ExtractedFields) {
    fields.remove(TRANSSHIPMENT_PORT);
    fields.remove(VIA_PORT);

    for (hint, target) in [
        (FINAL_DESTINATION_PORT_NAME, DESTINATION_PORT_NAME),
        (FINAL_DESTINATION_PORT_CODE, DESTINATION_PORT_CODE),
    ] {
        if let Some(value) = fields.remove(hint) {
            if !value.is_null() {
                fields.set(target, value);
            }
        }
    }
}

fn aggregate_routes(fields: &mut ExtractedFields) {
    let Some(FieldValue::Text(text)) = fields.remove(ROUTES) else {
        return;
    };
    let legs = parse_routes(&text);
    if legs.is_empty() {
        return;
    }

    let (origins, destinations): (Vec<_>, Vec<_>) = legs.into_iter().unzip();
    fields.set(ORIGIN_PORT_NAME, origins.join(" / "));
    fields.set(DESTINATION_PORT_NAME, destinations.join(" / "));
}

fn normalize_port_fields(fields: &mut ExtractedFields) {
    for key in [ORIGIN_PORT_NAME, DESTINATION_PORT_NAME] {
        if let Some(name) = fields.text(key) {
            let name = normalize_port_name(name);
            let value = if name.is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(name)
            };
            fields.set(key, value);
        }
    }
    for key in [ORIGIN_PORT_CODE, DESTINATION_PORT_CODE] {
        if let Some(code) = fields.text(key) {
            let code = normalize_port_code(code);
            let value = if code.is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(code)
            };
            fields.set(key, value);
        }
    }
}

/// Absent or blank → `"FOB"`; a known term → canonical; anything else → null.
fn normalize_incoterm(fields: &mut ExtractedFields) {
    let value = match fields.get(INCOTERM) {
        None => FieldValue::text(Incoterm::DEFAULT.as_str()),
        Some(FieldValue::Text(t)) if t.trim().is_empty() => {
            FieldValue::text(Incoterm::DEFAULT.as_str())
        }
        Some(FieldValue::Text(t)) => parse_incoterm(t)
            .map(|term| FieldValue::text(term.as_str()))
            .unwrap_or(FieldValue::Null),
        Some(_) => FieldValue::Null,
    };
    fields.set(INCOTERM, value);
}

fn normalize_product_line(fields: &mut ExtractedFields) {
    if let Some(raw) = fields.get(PRODUCT_LINE) {
        let value = raw
            .as_text()
            .and_then(ProductLine::parse)
            .map(|pl| FieldValue::text(pl.as_str()))
            .unwrap_or(FieldValue::Null);
        fields.set(PRODUCT_LINE, value);
    }
}

fn coerce_dangerous(fields: &mut ExtractedFields) {
    if let Some(flag) = fields.get(IS_DANGEROUS).and_then(parse_flag) {
        fields.set(IS_DANGEROUS, flag);
    }
}

// ================================
// Port names, routes, incoterms
// ================================

fn title_case_word(word: &str) -> String {
    if PORT_ACRONYMS.iter().any(|a| a.eq_ignore_ascii_case(word)) {
        return word.to_uppercase();
    }

    let mut out = String::with_capacity(word.len());
    let mut capitalize = true;
    for c in word.chars() {
        let mapped: Vec<char> = if capitalize {
            c.to_uppercase().collect()
        } else {
            c.to_lowercase().collect()
        };
        // Multi-char case mappings (e.g. 'ß') are left as-is.
        if mapped.len() == 1 {
            out.push(mapped[0]);
        } else {
            out.push(c);
        }
        capitalize = matches!(c, '-' | '(' | '.');
    }
    out
}

/// Display form of a port name: Title Case, `" / "` between ports, no
/// `", <locality>"` suffix.
///
/// A comma followed by whitespace starts a locality suffix; a bare comma,
/// `/`, `|`, `&`, `+` or `;` separates two ports.
pub fn normalize_port_name(raw: &str) -> String {
    let mut segments: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_suffix = false;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '/' | '|' | '&' | '+' | ';' => {
                segments.push(std::mem::take(&mut current));
                in_suffix = false;
            }
            ',' if chars.peek().is_some_and(|n| n.is_whitespace()) => in_suffix = true,
            ',' => {
                segments.push(std::mem::take(&mut current));
                in_suffix = false;
            }
            _ if in_suffix => {}
            _ => current.push(c),
        }
    }
    segments.push(current);

    segments
        .iter()
        .map(|segment| {
            segment
                .split_whitespace()
                .map(title_case_word)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(" / ")
}

/// Codes are compared case-sensitively, so store them trimmed and upper-cased.
pub fn normalize_port_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Words that introduce a leg rather than name its origin port.
const LEG_LEAD_INS: [&str; 13] = [
    "shipment", "shipments", "route", "routes", "routing", "lane", "leg", "from", "ex", "pol",
    "pod", "origin", "rfq",
];

/// Words after which a destination port name has ended.
const LEG_TAIL_WORDS: [&str; 3] = ["via", "with", "for"];

fn trim_token(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_alphanumeric())
}

fn is_word_in(token: &str, words: &[&str]) -> bool {
    let token = trim_token(token);
    words.iter().any(|w| w.eq_ignore_ascii_case(token))
}

/// Rejoin tokens, keeping inner punctuation (`"Ambarli, Istanbul"`) for the
/// port-name rules.
fn join_port_tokens(tokens: &[&str]) -> Option<String> {
    let joined = tokens.join(" ");
    let name = trim_token(&joined);
    (!name.is_empty()).then(|| name.to_string())
}

/// Port named left of an arrow: everything after the last quantity, minus
/// lead-in words and numbering (`"Shipment 1: Nhava Sheva"`).
fn origin_of_leg(left: &str) -> Option<String> {
    let left = match QUANTITY_ANY.find_iter(left).last() {
        Some(m) => &left[m.end()..],
        None => left,
    };
    let tokens: Vec<&str> = left.split_whitespace().collect();
    let start = tokens.iter().position(|t| {
        trim_token(t).chars().any(char::is_alphabetic) && !is_word_in(t, &LEG_LEAD_INS)
    })?;
    join_port_tokens(&tokens[start..])
}

/// Port named right of an arrow: everything up to a quantity, a number or a
/// trailing clause (`"Ho Chi Minh via Singapore"`), facility qualifiers kept.
fn destination_of_leg(right: &str) -> Option<String> {
    let right = match QUANTITY_ANY.find(right) {
        Some(m) => &right[..m.start()],
        None => right,
    };
    let tokens: Vec<&str> = right
        .split_whitespace()
        .take_while(|t| {
            !t.starts_with(|c: char| c.is_ascii_digit()) && !is_word_in(t, &LEG_TAIL_WORDS)
        })
        .collect();
    join_port_tokens(&tokens)
}

fn split_leg(leg: &str, allow_word: bool) -> Option<(String, String)> {
    let arrow = LEG_ARROW
        .find(leg)
        .or_else(|| allow_word.then(|| LEG_WORD.find(leg)).flatten())?;
    let origin = origin_of_leg(&leg[..arrow.start()])?;
    let destination = destination_of_leg(&leg[arrow.end()..])?;
    Some((origin, destination))
}

/// Origin/destination pairs in a route list like `"JED->MAA; DAM->BLR"`.
/// Legs are split on `;`, `|` or new lines; each leg on `->`, `→`, `=>` or
/// `" to "`.
pub fn parse_routes(text: &str) -> Vec<(String, String)> {
    ROUTE_DELIMITER
        .split(text)
        .filter_map(|leg| split_leg(leg, true))
        .collect()
}

/// Arrow-marked legs in email text, e.g. `"JED→MAA ICD 1.9 cbm; DAM→BLR ICD 3 RT"`.
/// Only symbol arrows count, since `"to"` is common in prose.
pub fn detect_route_legs(text: &str) -> Vec<(String, String)> {
    ROUTE_DELIMITER
        .split(text)
        .filter_map(|leg| split_leg(leg, false))
        .collect()
}

/// A known incoterm as the whole value or its first word.
pub fn parse_incoterm(text: &str) -> Option<Incoterm> {
    Incoterm::parse(text).or_else(|| {
        text.split(|c: char| !c.is_ascii_alphanumeric())
            .find(|t| !t.is_empty())
            .and_then(Incoterm::parse)
    })
}

/// The single incoterm named in free text. Only upper-case tokens count;
/// several distinct terms are ambiguous and yield `None`.
pub fn detect_incoterm(text: &str) -> Option<Incoterm> {
    let mut found: Vec<Incoterm> = Vec::new();
    for token in text.split(|c: char| !c.is_ascii_alphanumeric()) {
        if token.len() == 3 && token.chars().all(|c| c.is_ascii_uppercase()) {
            if let Some(term) = Incoterm::parse(token) {
                if !found.contains(&term) {
                    found.push(term);
                }
            }
        }
    }
    match found.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn approx(actual: Option<f64>, expected: f64) -> bool {
        actual.is_some_and(|a| (a - expected).abs() <= 0.01)
    }

    #[test]
    fn test_pounds_convert_to_kg() {
        let fields = normalize(
            ExtractedFields::new()
                .with(CARGO_WEIGHT, 10.0)
                .with(CARGO_WEIGHT_UNIT, "lbs"),
        );

        assert!(approx(fields.number(CARGO_WEIGHT_KG), 4.53592));
        assert!(!fields.contains(CARGO_WEIGHT));
        assert!(!fields.contains(CARGO_WEIGHT_UNIT));
    }

    #[test]
    fn test_tonnes_convert_to_kg() {
        let tagged = normalize(ExtractedFields::new().with(CARGO_WEIGHT_KG, "1.5 MT"));
        let words = normalize(ExtractedFields::new().with(CARGO_WEIGHT_KG, "2 tonnes"));

        assert_eq!(tagged.number(CARGO_WEIGHT_KG), Some(1500.0));
        assert_eq!(words.number(CARGO_WEIGHT_KG), Some(2000.0));
    }

    #[test]
    fn test_untagged_weight_is_never_converted() {
        let fields = normalize(ExtractedFields::new().with(CARGO_WEIGHT_KG, 4.54));

        assert_eq!(fields.number(CARGO_WEIGHT_KG), Some(4.54));
        assert_eq!(normalize(fields.clone()), fields);
    }

    #[test]
    fn test_thousands_separator_and_kgs_suffix() {
        let fields = normalize(ExtractedFields::new().with(CARGO_WEIGHT_KG, "1,800 KGS"));

        assert_eq!(fields.number(CARGO_WEIGHT_KG), Some(1800.0));
    }

    #[test]
    fn test_revenue_ton_derives_volume_and_weight() {
        let fields = normalize(ExtractedFields::new().with(CARGO, "2.4 RT"));

        assert_eq!(fields.number(CARGO_CBM), Some(2.4));
        assert_eq!(fields.number(CARGO_WEIGHT_KG), Some(2400.0));
        assert!(!fields.contains(CARGO));
    }

    #[test]
    fn test_revenue_ton_does_not_compound_existing_quantities() {
        let fields = normalize(
            ExtractedFields::new()
                .with(CARGO, "3 RT")
                .with(CARGO_WEIGHT_KG, 850.0),
        );

        assert_eq!(fields.number(CARGO_WEIGHT_KG), Some(850.0));
        assert_eq!(fields.number(CARGO_CBM), Some(3.0));
    }

    #[test]
    fn test_revenue_ton_in_volume_field() {
        let fields = normalize(ExtractedFields::new().with(CARGO_CBM, "3 RT"));

        assert_eq!(fields.number(CARGO_CBM), Some(3.0));
        assert_eq!(fields.number(CARGO_WEIGHT_KG), Some(3000.0));
    }

    #[test]
    fn test_free_form_cargo_fills_weight_and_volume() {
        let fields = normalize(ExtractedFields::new().with(CARGO, "Approx wt 1800 KGS / 3.8 CBM"));

        assert_eq!(fields.number(CARGO_WEIGHT_KG), Some(1800.0));
        assert_eq!(fields.number(CARGO_CBM), Some(3.8));
    }

    #[test]
    fn test_volume_text_coerced() {
        let cbm = normalize(ExtractedFields::new().with(CARGO_CBM, "3.8 cbm"));
        let m3 = normalize(ExtractedFields::new().with(CARGO_CBM, "1.1 m³"));

        assert_eq!(cbm.number(CARGO_CBM), Some(3.8));
        assert_eq!(m3.number(CARGO_CBM), Some(1.1));
    }

    #[test]
    fn test_malformed_weight_passes_through() {
        let fields = normalize(ExtractedFields::new().with(CARGO_WEIGHT_KG, "heavy"));

        assert_eq!(fields.text(CARGO_WEIGHT_KG), Some("heavy"));
    }

    #[test]
    fn test_placeholders_become_null() {
        let fields = normalize(
            ExtractedFields::new()
                .with(CARGO_WEIGHT_KG, "TBD")
                .with(ORIGIN_PORT_NAME, "N/A"),
        );

        assert_eq!(fields.get(CARGO_WEIGHT_KG), Some(&FieldValue::Null));
        assert_eq!(fields.get(ORIGIN_PORT_NAME), Some(&FieldValue::Null));
    }

    #[test]
    fn test_port_name_title_case() {
        assert_eq!(normalize_port_name("SHANGHAI"), "Shanghai");
        assert_eq!(normalize_port_name("  nhava   sheva "), "Nhava Sheva");
        assert_eq!(normalize_port_name("chennai icd"), "Chennai ICD");
    }

    #[test]
    fn test_port_name_strips_locality_suffix() {
        assert_eq!(normalize_port_name("Ambarli, Istanbul"), "Ambarli");
        assert_eq!(normalize_port_name("Ambarli, Istanbul, Turkey"), "Ambarli");
    }

    #[test]
    fn test_port_name_separators_collapse() {
        assert_eq!(normalize_port_name("Xingang,Tianjin"), "Xingang / Tianjin");
        assert_eq!(normalize_port_name("JEDDAH/DAMMAM  /riyadh"), "Jeddah / Dammam / Riyadh");
        assert_eq!(normalize_port_name("Busan | Incheon"), "Busan / Incheon");
    }

    #[test]
    fn test_port_name_is_idempotent_on_clean_names() {
        for name in ["Xingang / Tianjin", "Ambarli", "Chennai ICD", "Ho Chi Minh"] {
            assert_eq!(normalize_port_name(name), name);
        }
    }

    #[test]
    fn test_port_codes_upper_cased() {
        let fields = normalize(ExtractedFields::new().with(ORIGIN_PORT_CODE, " cnsha "));

        assert_eq!(fields.text(ORIGIN_PORT_CODE), Some("CNSHA"));
    }

    #[test]
    fn test_dangerous_multi_item_keeps_first_item_only() {
        let mut first = LineItem::new();
        first.insert(CARGO_WEIGHT_KG.into(), FieldValue::Number(1800.0));
        first.insert(CARGO_CBM.into(), FieldValue::Number(3.8));
        first.insert(IS_DANGEROUS.into(), FieldValue::Bool(true));
        let mut second = LineItem::new();
        second.insert(CARGO_WEIGHT_KG.into(), FieldValue::Number(200.0));
        second.insert(CARGO_CBM.into(), FieldValue::Number(1.2));

        let fields = normalize(
            ExtractedFields::new()
                .with(CARGO_WEIGHT_KG, 2000.0)
                .with(CARGO_CBM, 5.0)
                .with_item(first)
                .with_item(second),
        );

        assert_eq!(fields.number(CARGO_WEIGHT_KG), Some(1800.0));
        assert_eq!(fields.number(CARGO_CBM), Some(3.8));
        assert_eq!(fields.flag(IS_DANGEROUS), Some(true));
        assert!(fields.items().is_empty());
    }

    #[test]
    fn test_non_dangerous_items_keep_existing_aggregate() {
        let mut first = LineItem::new();
        first.insert(CARGO_WEIGHT_KG.into(), FieldValue::Number(100.0));
        let mut second = LineItem::new();
        second.insert(CARGO_WEIGHT_KG.into(), FieldValue::Number(50.0));

        let fields = normalize(
            ExtractedFields::new()
                .with(CARGO_WEIGHT_KG, 150.0)
                .with_item(first)
                .with_item(second),
        );

        assert_eq!(fields.number(CARGO_WEIGHT_KG), Some(150.0));
    }

    #[test]
    fn test_non_dangerous_items_fill_missing_aggregate_from_first() {
        let mut first = LineItem::new();
        first.insert(CARGO_WEIGHT.into(), FieldValue::Number(10.0));
        first.insert(CARGO_WEIGHT_UNIT.into(), FieldValue::text("lbs"));
        first.insert(CARGO_CBM.into(), FieldValue::Number(0.8));
        let mut second = LineItem::new();
        second.insert(CARGO_WEIGHT_KG.into(), FieldValue::Number(50.0));
        second.insert(CARGO_CBM.into(), FieldValue::Number(2.0));

        let fields = normalize(ExtractedFields::new().with_item(first).with_item(second));

        assert_eq!(fields.number(CARGO_WEIGHT_KG), Some(4.54));
        assert_eq!(fields.number(CARGO_CBM), Some(0.8));
        assert_eq!(fields.flag(IS_DANGEROUS), None);
        assert!(fields.items().is_empty());
    }

    #[test]
    fn test_dangerous_items_discard_aggregate_even_without_item_volume() {
        let mut first = LineItem::new();
        first.insert(CARGO_WEIGHT_KG.into(), FieldValue::Number(300.0));
        let mut second = LineItem::new();
        second.insert(CARGO_CBM.into(), FieldValue::Number(1.5));

        let fields = normalize(
            ExtractedFields::new()
                .with(IS_DANGEROUS, "yes")
                .with(CARGO_WEIGHT_KG, 900.0)
                .with(CARGO_CBM, 4.0)
                .with_item(first)
                .with_item(second),
        );

        assert_eq!(fields.number(CARGO_WEIGHT_KG), Some(300.0));
        assert!(!fields.contains(CARGO_CBM));
        assert_eq!(fields.flag(IS_DANGEROUS), Some(true));
    }

    #[test]
    fn test_routes_aggregate_into_combined_names() {
        let fields = normalize(ExtractedFields::new().with(ROUTES, "Shipment JED->MAA; DAM->BLR"));

        assert_eq!(fields.text(ORIGIN_PORT_NAME), Some("Jed / Dam"));
        assert_eq!(fields.text(DESTINATION_PORT_NAME), Some("Maa / Blr"));
        assert!(!fields.contains(ROUTES));
    }

    #[test]
    fn test_routes_keep_facility_qualifier() {
        let legs = parse_routes("JED→MAA ICD 1.9 cbm; DAM→BLR ICD 3 RT; RUH→HYD ICD 850kg.");

        assert_eq!(
            legs,
            vec![
                ("JED".to_string(), "MAA ICD".to_string()),
                ("DAM".to_string(), "BLR ICD".to_string()),
                ("RUH".to_string(), "HYD ICD".to_string()),
            ]
        );
    }

    #[test]
    fn test_routes_keep_multi_word_names() {
        let legs = parse_routes("Nhava Sheva->Shanghai; Chennai->Ho Chi Minh");

        assert_eq!(
            legs,
            vec![
                ("Nhava Sheva".to_string(), "Shanghai".to_string()),
                ("Chennai".to_string(), "Ho Chi Minh".to_string()),
            ]
        );
    }

    #[test]
    fn test_multi_word_routes_aggregate() {
        let fields = normalize(
            ExtractedFields::new().with(ROUTES, "Nhava Sheva->Jebel Ali; Mundra->Dammam"),
        );

        assert_eq!(fields.text(ORIGIN_PORT_NAME), Some("Nhava Sheva / Mundra"));
        assert_eq!(fields.text(DESTINATION_PORT_NAME), Some("Jebel Ali / Dammam"));
    }

    #[test]
    fn test_route_leg_drops_lead_ins_and_trailing_clauses() {
        assert_eq!(
            parse_routes("Shipment 1: Port Klang -> Ho Chi Minh via Singapore, 2 pallets"),
            vec![("Port Klang".to_string(), "Ho Chi Minh".to_string())]
        );
        assert_eq!(
            parse_routes("2.5 cbm Nhava Sheva to Jebel Ali 400 kg"),
            vec![("Nhava Sheva".to_string(), "Jebel Ali".to_string())]
        );
    }

    #[test]
    fn test_form_labels_are_not_route_legs() {
        assert!(detect_route_legs("POL -> Shanghai\nPOD -> Chennai").is_empty());
    }

    #[test]
    fn test_route_detection_ignores_prose_to() {
        assert!(detect_route_legs("Please send rates to us; we ship to Chennai").is_empty());
        assert_eq!(parse_routes("Singapore to Chennai").len(), 1);
    }

    #[test]
    fn test_transshipment_resolves_to_final_destination() {
        let fields = normalize(
            ExtractedFields::new()
                .with(DESTINATION_PORT_NAME, "Colombo")
                .with(TRANSSHIPMENT_PORT, "Colombo")
                .with(FINAL_DESTINATION_PORT_NAME, "CHENNAI"),
        );

        assert_eq!(fields.text(DESTINATION_PORT_NAME), Some("Chennai"));
        assert!(!fields.contains(TRANSSHIPMENT_PORT));
        assert!(!fields.contains(FINAL_DESTINATION_PORT_NAME));
    }

    #[test]
    fn test_incoterm_defaults_to_fob() {
        assert_eq!(normalize(ExtractedFields::new()).text(INCOTERM), Some("FOB"));
    }

    #[test]
    fn test_incoterm_recognized_and_unrecognized() {
        let known = normalize(ExtractedFields::new().with(INCOTERM, "cif"));
        let leading = normalize(ExtractedFields::new().with(INCOTERM, "FCA Shanghai"));
        let unknown = normalize(ExtractedFields::new().with(INCOTERM, "XYZ"));

        assert_eq!(known.text(INCOTERM), Some("CIF"));
        assert_eq!(leading.text(INCOTERM), Some("FCA"));
        assert_eq!(unknown.get(INCOTERM), Some(&FieldValue::Null));
        // stays null on a second pass
        assert_eq!(normalize(unknown).get(INCOTERM), Some(&FieldValue::Null));
    }

    #[test]
    fn test_detect_incoterm_requires_single_term() {
        assert_eq!(detect_incoterm("Shipper insisting FCA SHA."), Some(Incoterm::Fca));
        assert_eq!(detect_incoterm("FOB or CIF, your call"), None);
        assert_eq!(detect_incoterm("no terms here"), None);
    }

    #[test]
    fn test_dangerous_text_coerced() {
        let fields = normalize(ExtractedFields::new().with(IS_DANGEROUS, "Yes"));

        assert_eq!(fields.flag(IS_DANGEROUS), Some(true));
    }

    #[test]
    fn test_product_line_canonicalized() {
        let valid = normalize(ExtractedFields::new().with(PRODUCT_LINE, "PL_SEA_EXPORT_LCL"));
        let invalid = normalize(ExtractedFields::new().with(PRODUCT_LINE, "air_freight"));

        assert_eq!(valid.text(PRODUCT_LINE), Some("pl_sea_export_lcl"));
        assert_eq!(invalid.get(PRODUCT_LINE), Some(&FieldValue::Null));
    }

    fn scalar() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            Just(FieldValue::Null),
            any::<bool>().prop_map(FieldValue::Bool),
            (0u32..100_000).prop_map(|n| FieldValue::Number(f64::from(n) / 100.0)),
            "[A-Za-z ,/|&;.-]{0,24}".prop_map(FieldValue::Text),
            "[0-9]{1,4}(\\.[0-9]{1,2})? ?(kg|KGS|lbs|MT|tonnes|cbm|m3|RT)?".prop_map(FieldValue::Text),
            "(FOB|cif|Dap|XYZ|TBD| )".prop_map(FieldValue::Text),
        ]
    }

    fn any_key() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec![
            PRODUCT_LINE,
            ORIGIN_PORT_CODE,
            ORIGIN_PORT_NAME,
            DESTINATION_PORT_CODE,
            DESTINATION_PORT_NAME,
            INCOTERM,
            CARGO_WEIGHT_KG,
            CARGO_CBM,
            IS_DANGEROUS,
            CARGO_WEIGHT,
            CARGO_WEIGHT_UNIT,
            CARGO,
            ROUTES,
            TRANSSHIPMENT_PORT,
            FINAL_DESTINATION_PORT_NAME,
        ])
    }

    fn any_fields() -> impl Strategy<Value = ExtractedFields> {
        let item = prop::collection::btree_map(
            prop::sample::select(vec![CARGO_WEIGHT_KG, CARGO_CBM, IS_DANGEROUS, CARGO])
                .prop_map(str::to_string),
            scalar(),
            0..4,
        );
        (
            prop::collection::vec((any_key(), scalar()), 0..10),
            prop::collection::vec(item, 0..3),
        )
            .prop_map(|(pairs, items)| {
                let fields = pairs
                    .into_iter()
                    .fold(ExtractedFields::new(), |f, (k, v)| f.with(k, v));
                items.into_iter().fold(fields, |f, item| f.with_item(item))
            })
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(fields in any_fields()) {
            let once = normalize(fields);
            let twice = normalize(once.clone());
            prop_assert_eq!(twice, once);
        }

        #[test]
        fn prop_port_name_is_idempotent(name in "[A-Za-z ,/|&;+.'()-]{0,40}") {
            let once = normalize_port_name(&name);
            prop_assert_eq!(normalize_port_name(&once), once.clone());
        }
    }
}
