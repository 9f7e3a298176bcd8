/// Activity Index - the per-person overview table of a bulk export
///
/// Reads `activities.csv`, resolves each row's track file relative to the
/// person's export folder and flags missing files before any parsing starts.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::Reader;
use log::{info, warn};
use serde::Serialize;

use crate::columns::ColumnIndex;
use crate::error::Result;
use crate::track_reader::ActivityId;

const COLUMNS: &[&str] = &[
    "activity_id",
    "activity_date",
    "activity_name",
    "activity_type",
    "elapsed_time",
    "distance",
    "filename",
    "moving_time",
    "elevation_gain",
    "elevation_loss",
    "average_speed",
    "average_grade",
];

const ALIASES: &[(&str, &str)] = &[
    ("id", "activity_id"),
    ("date", "activity_date"),
    ("start_time", "activity_date"),
    ("name", "activity_name"),
    ("type", "activity_type"),
    ("file", "filename"),
    ("elevation_gain_m", "elevation_gain"),
];

const DATE_FORMATS: &[&str] = &[
    "%b %d, %Y, %I:%M:%S %p",
    "%b %e, %Y, %I:%M:%S %p",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub activity_id: ActivityId,
    pub activity_date: NaiveDateTime,
    pub activity_name: String,
    pub activity_type: String,
    pub elapsed_time: Option<f64>,
    pub distance: Option<f64>,
    pub filename: Option<PathBuf>,
    pub moving_time: Option<f64>,
    pub elevation_gain: Option<f64>,
    pub elevation_loss: Option<f64>,
    pub average_speed: Option<f64>,
    pub average_grade: Option<f64>,
    pub exists: bool,
    pub person: String,
}

pub fn full_path(person_dir: &Path, filename: &str) -> PathBuf {
    person_dir.join(filename)
}

pub fn parse_activity_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    for format in DATE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Load `<person_dir>/activities.csv`, sorted by activity date.
pub fn load_activities(person_dir: &Path, person: &str) -> Result<Vec<ActivityEntry>> {
    let csv_path = person_dir.join("activities.csv");
    let mut rdr = Reader::from_reader(File::open(&csv_path)?);
    let index = ColumnIndex::resolve(rdr.headers()?, COLUMNS, ALIASES);
    index.require(&["activity_id", "activity_date"])?;

    let mut entries = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let record = result?;

        let Some(activity_id) = index.get(&record, "activity_id").map(ActivityId::from) else {
            warn!("{}: row {} has no activity id, skipping", csv_path.display(), row + 1);
            continue;
        };
        let Some(activity_date) = index.get(&record, "activity_date").and_then(parse_activity_date)
        else {
            warn!(
                "{}: activity {} has an unreadable date, skipping",
                csv_path.display(),
                activity_id
            );
            continue;
        };

        let filename = index
            .get(&record, "filename")
            .map(|f| full_path(person_dir, f));
        let exists = filename.as_deref().map(Path::exists).unwrap_or(false);

        entries.push(ActivityEntry {
            activity_id,
            activity_date,
            activity_name: index.get(&record, "activity_name").unwrap_or("").to_string(),
            activity_type: index.get(&record, "activity_type").unwrap_or("").to_string(),
            elapsed_time: index.get_f64(&record, "elapsed_time"),
            distance: index.get_f64(&record, "distance"),
            filename,
            moving_time: index.get_f64(&record, "moving_time"),
            elevation_gain: index.get_f64(&record, "elevation_gain"),
            elevation_loss: index.get_f64(&record, "elevation_loss"),
            average_speed: index.get_f64(&record, "average_speed"),
            average_grade: index.get_f64(&record, "average_grade"),
            exists,
            person: person.to_string(),
        });
    }

    entries.sort_by_key(|e| e.activity_date);
    let missing = entries.iter().filter(|e| !e.exists).count();
    info!(
        "{}: {} activities indexed, {} without a track file",
        person,
        entries.len(),
        missing
    );
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_activity_date() {
        let strava = parse_activity_date("Jan 5, 2021, 3:04:05 PM").unwrap();
        assert_eq!(strava.to_string(), "2021-01-05 15:04:05");

        let iso = parse_activity_date("2021-01-05T15:04:05Z").unwrap();
        assert_eq!(iso, strava);

        assert!(parse_activity_date("yesterday").is_none());
    }

    #[test]
    fn test_load_activities_flags_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("activities")).unwrap();
        fs::write(dir.path().join("activities/222.gpx"), "").unwrap();
        fs::write(
            dir.path().join("activities.csv"),
            "Activity ID,Activity Date,Activity Name,Activity Type,Elapsed Time,Distance,Filename,Moving Time,Elevation Gain,Elevation Loss,Average Speed,Average Grade,Distance\n\
             222,\"Feb 7, 2021, 8:00:00 AM\",Skinning,BackcountrySki,7200,12.5,activities/222.gpx,6800,1200,1180,1.7,0.1,12500\n\
             111,\"Jan 5, 2021, 3:04:05 PM\",Run,Run,3600,10.1,activities/111.fit.gz,3500,150,150,2.9,0,10100\n\
             333,\"Mar 1, 2021, 9:00:00 AM\",Manual,Workout,600,,,,,,,,\n",
        )
        .unwrap();

        let entries = load_activities(dir.path(), "KM").unwrap();
        assert_eq!(entries.len(), 3);
        // sorted by date
        assert_eq!(entries[0].activity_id, "111");
        assert_eq!(entries[1].activity_id, "222");
        assert!(!entries[0].exists);
        assert!(entries[1].exists);
        assert!(entries[2].filename.is_none());
        assert!(!entries[2].exists);
        // first "Distance" column wins
        assert_eq!(entries[1].distance, Some(12.5));
        assert_eq!(entries[1].elevation_gain, Some(1200.0));
        assert_eq!(entries[1].person, "KM");
    }

    #[test]
    fn test_missing_id_column_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let csv = "Activity Date,Filename\n2021-01-01,a.gpx\n";
        fs::write(dir.path().join("activities.csv"), csv).unwrap();
        assert!(load_activities(dir.path(), "KM").is_err());
    }
}
