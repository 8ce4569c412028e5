//! Field-level accuracy scoring against ground truth.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::EvaluationError;
use crate::fields::{ExtractedFields, FieldValue, GroundTruthRecord, CANONICAL_FIELDS};

/// Fields that take part in scoring.
pub const EVALUATED_FIELDS: [&str; 9] = CANONICAL_FIELDS;

/// Largest numeric difference still counted as a match.
pub const NUMERIC_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldComparison {
    pub field: String,
    pub matched: bool,
    pub expected: FieldValue,
    pub actual: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordScore {
    pub email_id: String,
    pub comparisons: Vec<FieldComparison>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldTally {
    pub field: String,
    pub correct: usize,
    pub total: usize,
}

impl FieldTally {
    pub fn accuracy(&self) -> f64 {
        ratio(self.correct, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub email_id: String,
    pub field: String,
    pub expected: FieldValue,
    pub actual: FieldValue,
}

/// Aggregated accuracy over a set of scored records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyReport {
    /// In canonical field order
    pub per_field: Vec<FieldTally>,
    pub correct: usize,
    pub total: usize,
    pub mismatches: Vec<Mismatch>,
    /// Ground-truth ids with no prediction
    pub missing_predictions: Vec<String>,
}

impl AccuracyReport {
    pub fn overall_accuracy(&self) -> f64 {
        ratio(self.correct, self.total)
    }

    pub fn field(&self, name: &str) -> Option<&FieldTally> {
        self.per_field.iter().find(|t| t.field == name)
    }
}

fn ratio(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}

// ================================
// Comparison
// ================================

/// Strings compare trimmed and case-insensitively, numbers within
/// [`NUMERIC_TOLERANCE`], `Null` only equals `Null`.
pub fn values_match(expected: &FieldValue, actual: &FieldValue) -> bool {
    match (expected, actual) {
        (FieldValue::Null, FieldValue::Null) => true,
        (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
        // small slack for binary representation of e.g. 0.01 steps
        (FieldValue::Number(a), FieldValue::Number(b)) => (a - b).abs() <= NUMERIC_TOLERANCE + 1e-9,
        (FieldValue::Text(a), FieldValue::Text(b)) => {
            a.trim().to_lowercase() == b.trim().to_lowercase()
        }
        _ => false,
    }
}

/// Compare one prediction with its ground truth.
///
/// Fields the ground truth does not mention are skipped; fields the prediction
/// lacks are compared as `Null`.
pub fn score(actual: &ExtractedFields, expected: &GroundTruthRecord) -> Vec<FieldComparison> {
    EVALUATED_FIELDS
        .iter()
        .filter_map(|&field| {
            let expected = expected.get(field)?;
            let actual = actual.get(field).cloned().unwrap_or(FieldValue::Null);
            Some(FieldComparison {
                field: field.to_string(),
                matched: values_match(expected, &actual),
                expected: expected.clone(),
                actual,
            })
        })
        .collect()
}

pub fn aggregate(scores: &[RecordScore]) -> AccuracyReport {
    let mut per_field: Vec<FieldTally> = EVALUATED_FIELDS
        .iter()
        .map(|f| FieldTally {
            field: f.to_string(),
            correct: 0,
            total: 0,
        })
        .collect();
    let mut mismatches = Vec::new();

    for record in scores {
        for cmp in &record.comparisons {
            let Some(tally) = per_field.iter_mut().find(|t| t.field == cmp.field) else {
                continue;
            };
            tally.total += 1;
            if cmp.matched {
                tally.correct += 1;
            } else {
                mismatches.push(Mismatch {
                    email_id: record.email_id.clone(),
                    field: cmp.field.clone(),
                    expected: cmp.expected.clone(),
                    actual: cmp.actual.clone(),
                });
            }
        }
    }

    AccuracyReport {
        correct: per_field.iter().map(|t| t.correct).sum(),
        total: per_field.iter().map(|t| t.total).sum(),
        per_field,
        mismatches,
        missing_predictions: Vec::new(),
    }
}

/// Score every ground-truth record that has a prediction.
pub fn evaluate(
    predictions: &BTreeMap<String, ExtractedFields>,
    ground_truth: &BTreeMap<String, GroundTruthRecord>,
) -> Result<AccuracyReport, EvaluationError> {
    let mut common = Vec::new();
    let mut missing = Vec::new();
    for (id, expected) in ground_truth {
        match predictions.get(id) {
            Some(actual) => common.push((id, actual, expected)),
            None => missing.push(id.clone()),
        }
    }

    if common.is_empty() {
        return Err(EvaluationError::NoCommonRecords {
            predictions: predictions.len(),
            ground_truth: ground_truth.len(),
        });
    }
    for id in &missing {
        warn!("⚠️ No prediction for ground-truth record {id}");
    }
    let extra = predictions.len() - common.len();
    if extra > 0 {
        debug!("{extra} predictions have no ground truth and are ignored");
    }

    let scores: Vec<RecordScore> = common
        .par_iter()
        .map(|(id, actual, expected)| RecordScore {
            email_id: (*id).clone(),
            comparisons: score(actual, expected),
        })
        .collect();

    let mut report = aggregate(&scores);
    report.missing_predictions = missing;
    Ok(report)
}

pub fn log_report(report: &AccuracyReport) {
    info!("------ Evaluation Metrics ------");
    for tally in &report.per_field {
        info!(
            "{}: {:.2}% ({}/{})",
            tally.field,
            tally.accuracy() * 100.0,
            tally.correct,
            tally.total
        );
    }
    info!("--------------------------------");
    info!(
        "OVERALL ACCURACY: {:.2}% ({}/{})",
        report.overall_accuracy() * 100.0,
        report.correct,
        report.total
    );
    for m in &report.mismatches {
        debug!(
            "Mismatch {} {}: expected {}, got {}",
            m.email_id, m.field, m.expected, m.actual
        );
    }
}
