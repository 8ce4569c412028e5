//! JSON data files: emails in, port table and ground truth as references,
//! records and the accuracy report out.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{DataError, DataResult};
use crate::evaluate::AccuracyReport;
use crate::fields::{EmailRecord, ExtractedFields, KeyedFields};
use crate::ports::{PortCodeTable, PortTableFile};

fn read_json<T: DeserializeOwned>(path: &Path) -> DataResult<T> {
    if !path.exists() {
        return Err(DataError::NotFound(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|source| DataError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| DataError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> DataResult<()> {
    let write_err = |source| DataError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let mut writer = BufWriter::new(File::create(path).map_err(write_err)?);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|source| DataError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    writer.write_all(b"\n").map_err(write_err)?;
    writer.flush().map_err(write_err)
}

pub fn load_emails(path: &Path) -> DataResult<Vec<EmailRecord>> {
    info!("📄 Reading emails: {}", path.display());
    let emails: Vec<EmailRecord> = read_json(path)?;
    info!("📨 Loaded {} emails", emails.len());
    Ok(emails)
}

/// Accepts a list of `{code, name}` entries or a `code -> name` object.
pub fn load_port_table(path: &Path) -> DataResult<PortCodeTable> {
    info!("📄 Reading port codes: {}", path.display());
    let file: PortTableFile = read_json(path)?;
    let table = PortCodeTable::from_entries(file.into_entries());
    info!(
        "⚓ Loaded {} port codes ({} distinct names)",
        table.len(),
        table.name_count()
    );
    Ok(table)
}

/// Load ground truth or earlier predictions keyed by email id. A repeated id
/// keeps the last record.
pub fn load_records(path: &Path) -> DataResult<BTreeMap<String, ExtractedFields>> {
    info!("📄 Reading records: {}", path.display());
    let records: Vec<KeyedFields> = read_json(path)?;
    let mut by_id = BTreeMap::new();
    for record in records {
        if by_id.insert(record.id.clone(), record.fields).is_some() {
            warn!("⚠️ Duplicate record id {} in {}", record.id, path.display());
        }
    }
    Ok(by_id)
}

pub fn write_records(path: &Path, records: &[KeyedFields]) -> DataResult<()> {
    info!("🧾 Writing {} records: {}", records.len(), path.display());
    write_json(path, records)
}

#[derive(Serialize)]
struct ReportFile<'a> {
    run_id: &'a str,
    overall_accuracy: f64,
    #[serde(flatten)]
    report: &'a AccuracyReport,
}

pub fn write_report(path: &Path, run_id: &str, report: &AccuracyReport) -> DataResult<()> {
    info!("🧾 Writing accuracy report: {}", path.display());
    write_json(
        path,
        &ReportFile {
            run_id,
            overall_accuracy: report.overall_accuracy(),
            report,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluate::aggregate;
    use crate::fields::*;
    use tempfile::tempdir;

    #[test]
    fn test_emails_ignore_extra_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("emails_input.json");
        fs::write(
            &path,
            r#"[{"id": "EMAIL_001", "subject": "RFQ", "body": "2 cbm", "received_at": "2024-01-01"},
                {"id": "EMAIL_002"}]"#,
        )
        .unwrap();

        let emails = load_emails(&path).unwrap();

        assert_eq!(emails.len(), 2);
        assert_eq!(emails[0], EmailRecord::new("EMAIL_001", "RFQ", "2 cbm"));
        assert_eq!(emails[1].body, "");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();

        let err = load_emails(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, DataError::NotFound(_)));
    }

    #[test]
    fn test_invalid_json_is_reported_with_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ground_truth.json");
        fs::write(&path, "{not json").unwrap();

        let err = load_records(&path).unwrap_err();
        assert!(matches!(err, DataError::Json { .. }));
        assert!(err.to_string().contains("ground_truth.json"));
    }

    #[test]
    fn test_port_table_list_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("port_codes_reference.json");
        fs::write(
            &path,
            r#"[{"code": "INMAA", "name": "Chennai"}, {"code": "INMAA", "name": "Madras"},
                {"code": "CNSHA", "name": "Shanghai"}]"#,
        )
        .unwrap();

        let table = load_port_table(&path).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve("INMAA"), "Chennai");
    }

    #[test]
    fn test_records_write_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("output.json");
        let records = vec![
            KeyedFields {
                id: "EMAIL_001".into(),
                fields: ExtractedFields::new()
                    .with(ORIGIN_PORT_NAME, "Shanghai")
                    .with(CARGO_CBM, 1.5),
            },
            KeyedFields {
                id: "EMAIL_002".into(),
                fields: ExtractedFields::null_record(),
            },
        ];

        write_records(&path, &records).unwrap();
        let loaded = load_records(&path).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["EMAIL_001"], records[0].fields);
        assert_eq!(loaded["EMAIL_002"].flag(IS_DANGEROUS), Some(false));
    }

    #[test]
    fn test_report_carries_run_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.json");

        write_report(&path, "run-1", &aggregate(&[])).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(value["run_id"], "run-1");
        assert_eq!(value["overall_accuracy"], 0.0);
        assert_eq!(value["per_field"].as_array().unwrap().len(), 9);
    }
}
