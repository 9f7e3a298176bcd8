/// Batch runner
///
/// Activities are independent, so every per-activity stage runs on the
/// rayon pool. A data problem in one activity is logged and recorded as a
/// failure; the rest of the batch carries on. Configuration errors abort.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{info, warn};
use rayon::prelude::*;

use crate::activity_index::load_activities;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::sample_store::{write_samples, SampleRow};
use crate::track_reader::{discover_tracks, read_track, ActivityId, ActivitySample};

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityFailure {
    pub activity_id: ActivityId,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub total: usize,
    pub missing_files: Vec<ActivityId>,
    pub parsed: usize,
    pub failed: Vec<ActivityFailure>,
    pub rows_written: usize,
    pub output: Option<PathBuf>,
}

impl BatchReport {
    pub fn print_summary(&self, person: &str) {
        println!("\n📊 INGESTION SUMMARY: {}", person);
        println!("================================");
        println!("• Activities indexed: {}", self.total);
        println!("• Missing track files: {}", self.missing_files.len());
        println!("• Parsed: {}", self.parsed);
        println!("• Failed: {}", self.failed.len());
        for failure in &self.failed {
            println!("   ❌ {}: {}", failure.activity_id, failure.reason);
        }
        println!("• Sample rows written: {}", self.rows_written);
        if let Some(path) = &self.output {
            println!("📁 Samples saved to: {}", path.display());
        }
    }
}

/// Run `stage` on every activity in parallel, isolating data failures.
pub fn process_activities<T, F>(
    activities: &BTreeMap<ActivityId, Vec<ActivitySample>>,
    stage: F,
) -> Result<(Vec<(ActivityId, T)>, Vec<ActivityFailure>)>
where
    T: Send,
    F: Fn(&str, &[ActivitySample]) -> Result<T> + Sync,
{
    let outcomes: Vec<(ActivityId, Result<T>)> = activities
        .par_iter()
        .map(|(id, samples)| (id.clone(), stage(id, samples)))
        .collect();

    let mut done = Vec::new();
    let mut failed = Vec::new();
    for (activity_id, outcome) in outcomes {
        match outcome {
            Ok(value) => done.push((activity_id, value)),
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => {
                warn!("activity {} skipped: {}", activity_id, e);
                failed.push(ActivityFailure {
                    activity_id,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok((done, failed))
}

struct TrackJob {
    activity_id: ActivityId,
    path: PathBuf,
}

/// Build the job list from `activities.csv`, or from a directory walk when
/// the export has no overview table. Returns (jobs, total, missing ids).
fn collect_jobs(
    person_dir: &Path,
    person: &str,
) -> Result<(Vec<TrackJob>, usize, Vec<ActivityId>)> {
    if person_dir.join("activities.csv").exists() {
        let entries = load_activities(person_dir, person)?;
        let total = entries.len();
        let mut jobs = Vec::new();
        let mut missing = Vec::new();
        for entry in entries {
            match (entry.exists, entry.filename) {
                (true, Some(path)) => jobs.push(TrackJob {
                    activity_id: entry.activity_id,
                    path,
                }),
                (_, filename) => {
                    if let Some(f) = filename {
                        warn!(
                            "activity {}: track file {} not found",
                            entry.activity_id,
                            f.display()
                        );
                    }
                    missing.push(entry.activity_id);
                }
            }
        }
        return Ok((jobs, total, missing));
    }

    warn!("{}: no activities.csv, scanning for track files", person_dir.display());
    let jobs: Vec<TrackJob> = discover_tracks(person_dir)?
        .into_iter()
        .enumerate()
        .map(|(i, path)| TrackJob {
            activity_id: activity_id_from_path(&path).unwrap_or_else(|| (i + 1).to_string()),
            path,
        })
        .collect();
    let total = jobs.len();
    Ok((jobs, total, Vec::new()))
}

/// Strava names track files after the activity: `activities/4408957556.fit.gz`.
pub fn activity_id_from_path(path: &Path) -> Option<ActivityId> {
    path.file_name()?
        .to_str()?
        .split('.')
        .next()
        .filter(|stem| !stem.is_empty())
        .map(ActivityId::from)
}

/// Parse every track of one person's export and write `samples.csv`.
pub fn ingest_person(config: &PipelineConfig, person: &str) -> Result<BatchReport> {
    let person_dir = config.person_dir(person);
    if !person_dir.is_dir() {
        return Err(PipelineError::MissingFile(person_dir));
    }
    let (jobs, total, missing_files) = collect_jobs(&person_dir, person)?;
    info!(
        "{}: reading {} track files on {} cores",
        person,
        jobs.len(),
        num_cpus::get()
    );

    let parsed: Vec<(ActivityId, Result<Vec<ActivitySample>>)> = jobs
        .par_iter()
        .map(|job| {
            let samples = read_track(&job.path).and_then(|s| {
                if s.is_empty() {
                    Err(PipelineError::insufficient("track has no timed positions"))
                } else {
                    Ok(s)
                }
            });
            (job.activity_id.clone(), samples)
        })
        .collect();

    let mut report = BatchReport {
        total,
        missing_files,
        ..BatchReport::default()
    };
    let mut rows = Vec::new();
    for (activity_id, outcome) in parsed {
        match outcome {
            Ok(samples) => {
                report.parsed += 1;
                rows.extend(
                    samples
                        .iter()
                        .map(|s| SampleRow::from_sample(s, &activity_id, person)),
                );
            }
            Err(e) => {
                warn!("activity {} skipped: {}", activity_id, e);
                report.failed.push(ActivityFailure {
                    activity_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    let output = config.samples_path(person);
    write_samples(&output, &rows)?;
    report.rows_written = rows.len();
    report.output = Some(output);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_store::read_samples;
    use chrono::NaiveDate;
    use std::fs;

    const TRACK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test" xmlns="http://www.topografix.com/GPX/1/1">
  <trk><trkseg>
    <trkpt lat="46.5000" lon="7.9000"><ele>1500.0</ele><time>2021-02-03T10:00:00Z</time></trkpt>
    <trkpt lat="46.5010" lon="7.9010"><ele>1510.0</ele><time>2021-02-03T10:00:30Z</time></trkpt>
  </trkseg></trk>
</gpx>"#;

    fn sample(alt: Option<f64>) -> ActivitySample {
        ActivitySample {
            timestamp: NaiveDate::from_ymd_opt(2021, 2, 3).unwrap().and_hms_opt(10, 0, 0).unwrap(),
            latitude: 46.0,
            longitude: 7.9,
            altitude: alt,
        }
    }

    #[test]
    fn test_activity_id_from_path() {
        let id = |p: &str| activity_id_from_path(Path::new(p));
        assert_eq!(id("activities/4408957556.fit.gz").as_deref(), Some("4408957556"));
        assert_eq!(id("activities/morning.gpx").as_deref(), Some("morning"));
        assert_eq!(id("activities/.gpx"), None);
    }

    #[test]
    fn test_failures_are_isolated() {
        let mut activities = BTreeMap::new();
        activities.insert("1".to_string(), vec![sample(Some(1.0))]);
        activities.insert("2".to_string(), vec![sample(None)]);
        activities.insert("3".to_string(), vec![sample(Some(3.0))]);

        let (done, failed) = process_activities(&activities, |_, samples| {
            samples[0]
                .altitude
                .ok_or_else(|| PipelineError::insufficient("missing altitude"))
        })
        .unwrap();

        assert_eq!(done, vec![("1".to_string(), 1.0), ("3".to_string(), 3.0)]);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].activity_id, "2");
    }

    #[test]
    fn test_configuration_error_aborts() {
        let mut activities = BTreeMap::new();
        activities.insert("1".to_string(), vec![sample(Some(1.0))]);
        let result: Result<(Vec<(ActivityId, ())>, _)> =
            process_activities(&activities, |_, _| Err(PipelineError::config("bad window")));
        assert!(result.unwrap_err().is_configuration());
    }

    #[test]
    fn test_ingest_person_skips_bad_and_missing_files() {
        let data = tempfile::tempdir().unwrap();
        let person_dir = data.path().join("KM");
        fs::create_dir_all(person_dir.join("activities")).unwrap();
        fs::write(person_dir.join("activities/1.gpx"), TRACK).unwrap();
        fs::write(person_dir.join("activities/2.gpx"), "<gpx><trk>").unwrap();
        fs::write(
            person_dir.join("activities.csv"),
            "Activity ID,Activity Date,Filename\n\
             1,2021-02-03 10:00:00,activities/1.gpx\n\
             2,2021-02-04 10:00:00,activities/2.gpx\n\
             3,2021-02-05 10:00:00,activities/3.fit.gz\n",
        )
        .unwrap();

        let config = PipelineConfig {
            data_dir: data.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let report = ingest_person(&config, "KM").unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.missing_files, vec!["3"]);
        assert_eq!(report.parsed, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].activity_id, "2");

        let rows = read_samples(&config.samples_path("KM")).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.activity_id == "1" && r.person == "KM"));
    }

    #[test]
    fn test_ingest_without_overview_scans_directory() {
        let data = tempfile::tempdir().unwrap();
        let person_dir = data.path().join("LB");
        fs::create_dir_all(&person_dir).unwrap();
        fs::write(person_dir.join("777.gpx"), TRACK).unwrap();

        let config = PipelineConfig {
            data_dir: data.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let report = ingest_person(&config, "LB").unwrap();
        assert_eq!(report.parsed, 1);

        let rows = read_samples(&config.samples_path("LB")).unwrap();
        assert_eq!(rows[0].activity_id, "777");
    }

    #[test]
    fn test_ingest_with_nothing_parsed_writes_readable_table() {
        let data = tempfile::tempdir().unwrap();
        let person_dir = data.path().join("MS");
        fs::create_dir_all(&person_dir).unwrap();
        fs::write(person_dir.join("broken.gpx"), "<gpx><trk>").unwrap();

        let config = PipelineConfig {
            data_dir: data.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        let report = ingest_person(&config, "MS").unwrap();
        assert_eq!(report.parsed, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.rows_written, 0);

        let rows = read_samples(&config.samples_path("MS")).unwrap();
        assert!(rows.is_empty());
    }
}
