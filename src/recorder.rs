use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::telemetry::MeterError;
use crate::types::Sample;

/// Column order shared by import and export.
pub const CSV_HEADER: [&str; 5] = ["timestamp", "current", "voltage", "resistance", "temperature"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Debug, Serialize, Deserialize)]
struct SampleRecord {
    timestamp: String,
    current: f64,
    voltage: f64,
    resistance: f64,
    temperature: f64,
}

/// `quantum_measurements_<YYYYMMDD_HHMMSS>.csv` for the given moment.
pub fn export_file_name(at: NaiveDateTime) -> String {
    format!("quantum_measurements_{}.csv", at.format("%Y%m%d_%H%M%S"))
}

/// Export path inside `dir`, stamped with the local time.
pub fn export_path_in(dir: &Path) -> PathBuf {
    dir.join(export_file_name(Local::now().naive_local()))
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Accepts ISO-8601 with either `T` or a space as separator; offsets are
/// converted to local time.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Local).naive_local())
}

pub fn write_samples<W: Write>(writer: W, samples: &[Sample]) -> Result<(), MeterError> {
    let mut w = csv::Writer::from_writer(writer);
    for sample in samples {
        w.serialize(SampleRecord {
            timestamp: format_timestamp(&sample.timestamp),
            current: sample.current,
            voltage: sample.voltage,
            resistance: sample.resistance,
            temperature: sample.temperature,
        })?;
    }
    // 空数据也要写表头
    if samples.is_empty() {
        w.write_record(CSV_HEADER)?;
    }
    w.flush()?;
    Ok(())
}

/// Parses a whole table; any bad row fails the entire read.
pub fn read_samples<R: Read>(reader: R) -> Result<Vec<Sample>, MeterError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();
    if headers.iter().ne(CSV_HEADER.iter().copied()) {
        return Err(MeterError::InvalidFormat(format!(
            "expected header `{}`, found `{}`",
            CSV_HEADER.join(","),
            headers.iter().collect::<Vec<_>>().join(",")
        )));
    }
    let mut samples = Vec::new();
    for (idx, row) in rdr.deserialize::<SampleRecord>().enumerate() {
        let line = idx + 2;
        let record = row.map_err(|e| MeterError::InvalidFormat(format!("row {line}: {e}")))?;
        let timestamp = parse_timestamp(&record.timestamp).ok_or_else(|| {
            MeterError::InvalidFormat(format!(
                "row {line}: unparsable timestamp `{}`",
                record.timestamp
            ))
        })?;
        let values = [
            ("current", record.current),
            ("voltage", record.voltage),
            ("resistance", record.resistance),
            ("temperature", record.temperature),
        ];
        if let Some((column, value)) = values.iter().find(|(_, v)| !v.is_finite()) {
            return Err(MeterError::InvalidFormat(format!(
                "row {line}: non-finite {column} `{value}`"
            )));
        }
        samples.push(Sample::from_record(
            timestamp,
            record.current,
            record.voltage,
            record.resistance,
            record.temperature,
        ));
    }
    Ok(samples)
}

pub fn load_csv(path: &Path) -> Result<Vec<Sample>, MeterError> {
    let file = File::open(path)?;
    read_samples(file)
}

pub fn save_csv(path: &Path, samples: &[Sample]) -> Result<(), MeterError> {
    let file = File::create(path)?;
    write_samples(BufWriter::new(file), samples)
}
