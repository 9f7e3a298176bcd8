/// Header alias tables for tabular inputs, and the shared csv writer.
///
/// Exports from different tools name the same column differently
/// ("Activity ID", "lat", "elevation"). Every reader resolves its headers
/// once through an explicit alias table and then only speaks canonical names.

use std::collections::HashMap;
use std::path::Path;

use csv::{StringRecord, WriterBuilder};
use serde::Serialize;

use crate::error::{PipelineError, Result};

/// Lowercase, trim and snake-case a raw header ("Activity ID" -> "activity_id").
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Debug, Clone)]
pub struct ColumnIndex {
    positions: HashMap<&'static str, usize>,
}

impl ColumnIndex {
    /// Map each canonical column to the first header that names it, either
    /// directly or through `aliases` (normalized alias -> canonical).
    pub fn resolve(
        headers: &StringRecord,
        canonical: &[&'static str],
        aliases: &[(&str, &'static str)],
    ) -> Self {
        let mut positions = HashMap::new();
        for (idx, raw) in headers.iter().enumerate() {
            let name = normalize_header(raw);
            let target = canonical
                .iter()
                .copied()
                .find(|c| *c == name)
                .or_else(|| aliases.iter().find(|(alias, _)| *alias == name).map(|(_, c)| *c));
            if let Some(column) = target {
                positions.entry(column).or_insert(idx);
            }
        }
        ColumnIndex { positions }
    }

    pub fn require(&self, columns: &[&'static str]) -> Result<()> {
        let missing: Vec<&str> = columns
            .iter()
            .copied()
            .filter(|c| !self.positions.contains_key(c))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::InsufficientData(format!(
                "missing required columns: {}",
                missing.join(", ")
            )))
        }
    }

    /// Trimmed cell value; empty cells read as absent.
    pub fn has(&self, column: &str) -> bool {
        self.positions.contains_key(column)
    }

    pub fn get<'r>(&self, record: &'r StringRecord, column: &str) -> Option<&'r str> {
        self.positions
            .get(column)
            .and_then(|&idx| record.get(idx))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn get_f64(&self, record: &StringRecord, column: &str) -> Option<f64> {
        self.get(record, column)
            .and_then(|v| v.replace(',', "").parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }
}

/// Write `rows` under an explicit header, so an empty table still carries
/// its columns. `header` must list the row struct's fields in order.
pub fn write_rows<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_path(path)?;
    wtr.write_record(header)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use csv::Reader;

    #[derive(Serialize)]
    struct Visit<'a> {
        activity_id: &'a str,
        altitude: Option<f64>,
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header(" Activity ID "), "activity_id");
        assert_eq!(normalize_header("\u{feff}Elevation  Gain"), "elevation_gain");
    }

    #[test]
    fn test_first_alias_wins() {
        let headers = StringRecord::from(vec!["lat", "Distance", "lon", "Distance", "alt"]);
        let index = ColumnIndex::resolve(
            &headers,
            &["position_lat", "position_long", "altitude", "distance"],
            &[("lat", "position_lat"), ("lon", "position_long"), ("alt", "altitude")],
        );

        let row = StringRecord::from(vec!["46.1", "1,204.5", "7.2", "1.2", ""]);
        assert_eq!(index.get_f64(&row, "position_lat"), Some(46.1));
        assert_eq!(index.get_f64(&row, "distance"), Some(1204.5));
        assert_eq!(index.get(&row, "altitude"), None);
        assert!(index.require(&["position_lat", "position_long"]).is_ok());
        assert!(index.require(&["timestamp"]).is_err());
    }

    #[test]
    fn test_write_rows_keeps_header_without_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visits.csv");

        write_rows::<Visit>(&path, &["activity_id", "altitude"], &[]).unwrap();
        let mut rdr = Reader::from_path(&path).unwrap();
        let header: Vec<&str> = rdr.headers().unwrap().iter().collect();
        assert_eq!(header, vec!["activity_id", "altitude"]);
        assert_eq!(rdr.records().count(), 0);

        let rows = [
            Visit { activity_id: "morning", altitude: Some(2100.0) },
            Visit { activity_id: "evening", altitude: None },
        ];
        write_rows(&path, &["activity_id", "altitude"], &rows).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "activity_id,altitude\nmorning,2100.0\nevening,\n");
    }
}
