/// Per-sample table written once per ingestion run and read back by the
/// feature and peak stages.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;

use chrono::NaiveDateTime;
use csv::Reader;
use log::debug;
use serde::Serialize;

use crate::columns::{write_rows, ColumnIndex};
use crate::error::Result;
use crate::track_reader::{ActivityId, ActivitySample};

/// Also the on-disk column order of `SampleRow`.
const COLUMNS: &[&str] = &[
    "timestamp",
    "position_lat",
    "position_long",
    "altitude",
    "activity_id",
    "person",
];

const ALIASES: &[(&str, &str)] = &[
    ("id", "activity_id"),
    ("activity", "activity_id"),
    ("time", "timestamp"),
    ("lat", "position_lat"),
    ("latitude", "position_lat"),
    ("lon", "position_long"),
    ("long", "position_long"),
    ("lng", "position_long"),
    ("longitude", "position_long"),
    ("alt", "altitude"),
    ("ele", "altitude"),
    ("elevation", "altitude"),
    ("enhanced_altitude", "altitude"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRow {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: NaiveDateTime,
    pub position_lat: f64,
    pub position_long: f64,
    pub altitude: Option<f64>,
    pub activity_id: ActivityId,
    pub person: String,
}

impl SampleRow {
    pub fn from_sample(sample: &ActivitySample, activity_id: &str, person: &str) -> Self {
        SampleRow {
            timestamp: sample.timestamp,
            position_lat: sample.latitude,
            position_long: sample.longitude,
            altitude: sample.altitude,
            activity_id: activity_id.to_string(),
            person: person.to_string(),
        }
    }

    pub fn sample(&self) -> ActivitySample {
        ActivitySample {
            timestamp: self.timestamp,
            latitude: self.position_lat,
            longitude: self.position_long,
            altitude: self.altitude,
        }
    }
}

fn serialize_timestamp<S: serde::Serializer>(
    ts: &NaiveDateTime,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&ts.format("%Y-%m-%d %H:%M:%S").to_string())
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    // keep the first 19 chars: "YYYY-MM-DD HH:MM:SS", dropping fractions and offsets
    let trimmed = raw.trim();
    let head = trimmed.get(..19).unwrap_or(trimmed);
    NaiveDateTime::parse_from_str(head, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

pub fn write_samples(path: &Path, rows: &[SampleRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    write_rows(path, COLUMNS, rows)
}

/// Read a sample table. Rows without a timestamp, position or activity id
/// are dropped; a table without an `activity_id` column is treated as a
/// single activity with id "0".
pub fn read_samples(path: &Path) -> Result<Vec<SampleRow>> {
    let mut rdr = Reader::from_reader(File::open(path)?);
    let index = ColumnIndex::resolve(rdr.headers()?, COLUMNS, ALIASES);
    index.require(&["timestamp", "position_lat", "position_long"])?;
    let has_ids = index.has("activity_id");

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let timestamp = index.get(&record, "timestamp").and_then(parse_timestamp);
        let lat = index.get_f64(&record, "position_lat");
        let lon = index.get_f64(&record, "position_long");

        let activity_id = if has_ids {
            index.get(&record, "activity_id").map(ActivityId::from)
        } else {
            Some(ActivityId::from("0"))
        };

        let (Some(timestamp), Some(position_lat), Some(position_long), Some(activity_id)) =
            (timestamp, lat, lon, activity_id)
        else {
            dropped += 1;
            continue;
        };
        rows.push(SampleRow {
            timestamp,
            position_lat,
            position_long,
            altitude: index.get_f64(&record, "altitude"),
            activity_id,
            person: index.get(&record, "person").unwrap_or("").to_string(),
        });
    }

    if dropped > 0 {
        debug!("{}: dropped {} rows without time, position or id", path.display(), dropped);
    }
    Ok(rows)
}

/// Split rows into per-activity series, each sorted by timestamp.
pub fn group_by_activity(rows: &[SampleRow]) -> BTreeMap<ActivityId, Vec<ActivitySample>> {
    let mut groups: BTreeMap<ActivityId, Vec<ActivitySample>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.activity_id.clone()).or_default().push(row.sample());
    }
    for samples in groups.values_mut() {
        samples.sort_by_key(|s| s.timestamp);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    #[test]
    fn test_parse_timestamp_truncates() {
        assert_eq!(ts("2021-02-03 10:00:05.250+00:00").to_string(), "2021-02-03 10:00:05");
        assert_eq!(ts("2021-02-03T10:00:05Z").to_string(), "2021-02-03 10:00:05");
        assert!(parse_timestamp("03/02/2021").is_none());
    }

    #[test]
    fn test_write_then_read_keeps_missing_altitude() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("KM").join("samples.csv");
        let rows = vec![
            SampleRow {
                timestamp: ts("2021-02-03 10:00:00"),
                position_lat: 46.5,
                position_long: 7.9,
                altitude: Some(1500.0),
                activity_id: "42".to_string(),
                person: "KM".to_string(),
            },
            SampleRow {
                timestamp: ts("2021-02-03 10:00:30"),
                position_lat: 46.501,
                position_long: 7.901,
                altitude: None,
                activity_id: "42".to_string(),
                person: "KM".to_string(),
            },
        ];

        write_samples(&path, &rows).unwrap();
        let back = read_samples(&path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_read_aliased_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.csv");
        fs::write(
            &path,
            "time,lat,lon,alt\n\
             2021-02-03 10:00:30,46.6,7.8,\n\
             2021-02-03 10:00:00,46.5,7.9,1500\n\
             ,46.7,7.7,1400\n",
        )
        .unwrap();

        let rows = read_samples(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].activity_id, "0");

        let groups = group_by_activity(&rows);
        let series = &groups["0"];
        assert_eq!(series[0].altitude, Some(1500.0));
        assert_eq!(series[1].altitude, None);
    }

    #[test]
    fn test_named_activities_stay_apart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");
        fs::write(
            &path,
            "timestamp,lat,lon,alt,id\n\
             2021-02-03 09:00:00,46.50,7.90,1500,morning\n\
             2021-02-03 09:00:30,46.51,7.91,1900,morning\n\
             2021-03-09 17:00:00,45.90,6.80,800,evening\n\
             2021-03-09 17:00:30,45.91,6.81,850,\n",
        )
        .unwrap();

        let rows = read_samples(&path).unwrap();
        assert_eq!(rows.len(), 3);

        let groups = group_by_activity(&rows);
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["evening", "morning"]);
        assert_eq!(groups["morning"].len(), 2);
        assert_eq!(groups["evening"].len(), 1);
        assert_eq!(groups["evening"][0].altitude, Some(800.0));
    }

    #[test]
    fn test_empty_table_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");
        write_samples(&path, &[]).unwrap();

        let rows = read_samples(&path).unwrap();
        assert!(rows.is_empty());
        assert!(group_by_activity(&rows).is_empty());
    }
}
