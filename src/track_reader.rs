/// Track Reader - decode recorded activities into raw samples
///
/// Supports GPX and FIT recordings, optionally gzip-compressed as they come
/// out of a Strava bulk export (`.gpx`, `.gpx.gz`, `.fit`, `.fit.gz`).
/// Every decoder yields the same flat `ActivitySample` sequence; nothing
/// downstream knows which format a sample came from.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use flate2::read::GzDecoder;
use gpx::read;
use log::debug;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{PipelineError, Result};

/// Export-assigned activity key. Strava uses numeric ids, other tools use names.
pub type ActivityId = String;

/// One raw fix as recorded by the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivitySample {
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackFormat {
    Gpx,
    GpxGz,
    Fit,
    FitGz,
}

impl TrackFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_lowercase();

        if name.ends_with(".gpx.gz") {
            Ok(TrackFormat::GpxGz)
        } else if name.ends_with(".gpx") {
            Ok(TrackFormat::Gpx)
        } else if name.ends_with(".fit.gz") {
            Ok(TrackFormat::FitGz)
        } else if name.ends_with(".fit") {
            Ok(TrackFormat::Fit)
        } else {
            Err(PipelineError::UnsupportedFormat(path.display().to_string()))
        }
    }

    fn is_gzipped(self) -> bool {
        matches!(self, TrackFormat::GpxGz | TrackFormat::FitGz)
    }
}

/// Full circle = 2^32 semicircles.
pub fn semicircles_to_degrees(semicircles: f64) -> f64 {
    semicircles * (180.0 / 2f64.powi(31))
}

/// Read a track file from disk, decompressing and dispatching on its suffix.
pub fn read_track(path: &Path) -> Result<Vec<ActivitySample>> {
    let format = TrackFormat::from_path(path)?;
    if !path.exists() {
        return Err(PipelineError::MissingFile(path.to_path_buf()));
    }

    let mut bytes = Vec::new();
    let file = File::open(path)?;
    if format.is_gzipped() {
        GzDecoder::new(BufReader::new(file)).read_to_end(&mut bytes)?;
    } else {
        BufReader::new(file).read_to_end(&mut bytes)?;
    }

    let samples = match format {
        TrackFormat::Gpx | TrackFormat::GpxGz => parse_gpx_samples(&bytes)?,
        TrackFormat::Fit | TrackFormat::FitGz => parse_fit_samples(&bytes)?,
    };
    debug!("{}: {} samples", path.display(), samples.len());
    Ok(samples)
}

/// Recursively collect every readable track file below `dir`, sorted by path.
pub fn discover_tracks(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut tracks = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| PipelineError::Io(e.into()))?;
        if entry.file_type().is_file() && TrackFormat::from_path(entry.path()).is_ok() {
            tracks.push(entry.path().to_path_buf());
        }
    }
    tracks.sort();
    Ok(tracks)
}

pub fn parse_gpx_samples(bytes: &[u8]) -> Result<Vec<ActivitySample>> {
    let reader = BufReader::new(Cursor::new(bytes));
    let gpx = read(reader).map_err(|e| PipelineError::GpxParse(e.to_string()))?;

    let mut samples = Vec::new();
    for track in gpx.tracks {
        for segment in track.segments {
            for pt in segment.points {
                // untimed points cannot be placed on the resampling grid
                let Some(time) = pt.time else { continue };
                let iso = time
                    .format()
                    .map_err(|e| PipelineError::GpxParse(e.to_string()))?;
                let utc = DateTime::parse_from_rfc3339(&iso)
                    .map_err(|e| PipelineError::GpxParse(e.to_string()))?
                    .with_timezone(&Utc);

                let point = pt.point();
                samples.push(ActivitySample {
                    timestamp: whole_seconds(utc.naive_utc()),
                    latitude: point.y(),
                    longitude: point.x(),
                    altitude: pt.elevation,
                });
            }
        }
    }
    Ok(samples)
}

pub fn parse_fit_samples(bytes: &[u8]) -> Result<Vec<ActivitySample>> {
    use fitparser::de::from_bytes;
    use fitparser::profile::MesgNum;

    let records = from_bytes(bytes).map_err(|e| PipelineError::FitParse(e.to_string()))?;
    let mut samples = Vec::new();
    let mut skipped = 0usize;

    for record in records.into_iter() {
        if record.kind() != MesgNum::Record {
            continue;
        }
        let mut timestamp: Option<NaiveDateTime> = None;
        let mut lat: Option<f64> = None;
        let mut lon: Option<f64> = None;
        let mut altitude: Option<f64> = None;
        let mut enhanced_altitude: Option<f64> = None;

        for field in record.fields() {
            match field.name() {
                "timestamp" => {
                    if let fitparser::Value::Timestamp(ts) = field.value() {
                        timestamp = Some(whole_seconds(ts.with_timezone(&Utc).naive_utc()));
                    }
                }
                "position_lat" => {
                    lat = fit_value_to_f64(field.value()).map(semicircles_to_degrees)
                }
                "position_long" => {
                    lon = fit_value_to_f64(field.value()).map(semicircles_to_degrees)
                }
                "altitude" => altitude = fit_value_to_f64(field.value()),
                "enhanced_altitude" => enhanced_altitude = fit_value_to_f64(field.value()),
                _ => {}
            }
        }

        match (timestamp, lat, lon) {
            (Some(timestamp), Some(latitude), Some(longitude)) => samples.push(ActivitySample {
                timestamp,
                latitude,
                longitude,
                altitude: enhanced_altitude.or(altitude),
            }),
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        debug!("skipped {} FIT records without timestamp or position", skipped);
    }
    Ok(samples)
}

fn fit_value_to_f64(value: &fitparser::Value) -> Option<f64> {
    match value {
        fitparser::Value::Float32(v) => Some(*v as f64),
        fitparser::Value::Float64(v) => Some(*v),
        fitparser::Value::SInt8(v) => Some(*v as f64),
        fitparser::Value::UInt8(v) => Some(*v as f64),
        fitparser::Value::SInt16(v) => Some(*v as f64),
        fitparser::Value::UInt16(v) => Some(*v as f64),
        fitparser::Value::SInt32(v) => Some(*v as f64),
        fitparser::Value::UInt32(v) => Some(*v as f64),
        fitparser::Value::SInt64(v) => Some(*v as f64),
        fitparser::Value::UInt64(v) => Some(*v as f64),
        fitparser::Value::UInt8z(v) => Some(*v as f64),
        fitparser::Value::UInt16z(v) => Some(*v as f64),
        fitparser::Value::UInt32z(v) => Some(*v as f64),
        fitparser::Value::UInt64z(v) => Some(*v as f64),
        fitparser::Value::Byte(v) => Some(*v as f64),
        fitparser::Value::Array(values) => values.iter().find_map(fit_value_to_f64),
        _ => None,
    }
}

fn whole_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}
