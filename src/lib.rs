//! freight-extract
//! ----------------
//! Pull structured freight fields out of shipping emails with a hosted language
//! model, then make them consistent with deterministic rules.
//!
//! Pipeline:
//!   email -> model (JSON object) -> normalize -> port enrichment -> record
//!   records + ground truth -> field-level accuracy report
//!
//! The model is only trusted for reading the text. Units, port names, codes,
//! incoterms, multi-route and transshipment handling are decided here so the
//! same input always gives the same record.

pub mod error;
pub mod evaluate;
pub mod extract;
pub mod fields;
pub mod files;
pub mod model;
pub mod normalize;
pub mod ports;
pub mod prompt;
pub mod testing;

pub use error::{DataError, EvaluationError, ExtractionError, ExtractionErrorKind, ModelError};
pub use evaluate::{aggregate, evaluate, score, AccuracyReport, FieldComparison, RecordScore};
pub use extract::{BatchOutcome, Extractor};
pub use fields::{
    EmailRecord, ExtractedFields, FieldValue, GroundTruthRecord, Incoterm, KeyedFields,
    ProductLine, CANONICAL_FIELDS,
};
pub use model::{ChatCompletionsModel, ExtractionModel, ModelConfig};
pub use normalize::{normalize, normalize_port_name};
pub use ports::PortCodeTable;
