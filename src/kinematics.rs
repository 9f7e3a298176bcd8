/// Kinematic Feature Extractor
///
/// Derives per-sample motion from a time-ordered resampled series:
/// - 3D distance from the previous sample (geodesic horizontal distance
///   combined with the elevation change)
/// - signed altitude change
/// - elapsed seconds and instantaneous speed
///
/// The first sample has no predecessor; it takes the deltas of the second
/// sample so the series keeps its full length.

use chrono::NaiveDateTime;
use geo::{point, GeodesicDistance};
use log::warn;
use serde::Serialize;

use crate::resampler::ResampledSample;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KinematicSample {
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Meters travelled since the previous sample, always >= 0.
    pub distance: f64,
    pub altitude_delta: f64,
    pub time_delta: f64,
    /// Undefined when `time_delta` is not positive.
    pub speed: Option<f64>,
}

/// A non-positive time step after the first sample: the input was out of
/// order or held duplicate timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct DataQualityWarning {
    pub index: usize,
    pub timestamp: NaiveDateTime,
    pub time_delta: f64,
}

#[derive(Debug, Clone, Default)]
pub struct KinematicSeries {
    pub samples: Vec<KinematicSample>,
    pub warnings: Vec<DataQualityWarning>,
}

/// Geodesic (WGS84) distance in meters between two lat/long pairs.
pub fn horizontal_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let a = point!(x: lon1, y: lat1);
    let b = point!(x: lon2, y: lat2);
    a.geodesic_distance(&b)
}

pub fn distance_3d(horizontal: f64, altitude_delta: f64) -> f64 {
    (horizontal.powi(2) + altitude_delta.powi(2)).sqrt()
}

fn step(prev: &ResampledSample, curr: &ResampledSample) -> KinematicSample {
    let horizontal =
        horizontal_distance(prev.latitude, prev.longitude, curr.latitude, curr.longitude);
    let altitude_delta = curr.altitude - prev.altitude;
    let distance = distance_3d(horizontal, altitude_delta);
    let time_delta = (curr.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
    let speed = if time_delta > 0.0 { Some(distance / time_delta) } else { None };

    KinematicSample {
        timestamp: curr.timestamp,
        latitude: curr.latitude,
        longitude: curr.longitude,
        altitude: curr.altitude,
        distance,
        altitude_delta,
        time_delta,
        speed,
    }
}

pub fn compute_kinematics(series: &[ResampledSample]) -> KinematicSeries {
    let mut out = KinematicSeries {
        samples: Vec::with_capacity(series.len()),
        warnings: Vec::new(),
    };
    let Some(first) = series.first() else {
        return out;
    };

    // placeholder for row 0, replaced once row 1 is known
    out.samples.push(step(first, first));

    for (i, pair) in series.windows(2).enumerate() {
        let sample = step(&pair[0], &pair[1]);
        if sample.time_delta <= 0.0 {
            warn!(
                "non-positive time step {:.0}s at {} (row {}), speed left undefined",
                sample.time_delta,
                sample.timestamp,
                i + 1
            );
            out.warnings.push(DataQualityWarning {
                index: i + 1,
                timestamp: sample.timestamp,
                time_delta: sample.time_delta,
            });
        }
        out.samples.push(sample);
    }

    if out.samples.len() >= 2 {
        let second = out.samples[1];
        let row0 = &mut out.samples[0];
        row0.distance = second.distance;
        row0.altitude_delta = second.altitude_delta;
        row0.time_delta = second.time_delta;
        row0.speed = second.speed;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn at(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 2, 3)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
            + Duration::seconds(secs)
    }

    fn resampled(secs: i64, lat: f64, lon: f64, alt: f64) -> ResampledSample {
        ResampledSample { timestamp: at(secs), latitude: lat, longitude: lon, altitude: alt }
    }

    #[test]
    fn test_meridian_step() {
        // 0.001 deg of latitude is roughly 111 m
        let series = vec![resampled(0, 46.0, 7.9, 1000.0), resampled(30, 46.001, 7.9, 1000.0)];
        let out = compute_kinematics(&series);

        let s = out.samples[1];
        assert!((s.distance - 111.1).abs() < 0.5, "distance was {}", s.distance);
        assert_eq!(s.time_delta, 30.0);
        assert!((s.speed.unwrap() - s.distance / 30.0).abs() < 1e-12);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_vertical_only_step() {
        let series = vec![resampled(0, 46.0, 7.9, 1000.0), resampled(30, 46.0, 7.9, 1012.0)];
        let out = compute_kinematics(&series);
        assert!((out.samples[1].distance - 12.0).abs() < 1e-9);
        assert_eq!(out.samples[1].altitude_delta, 12.0);
    }

    #[test]
    fn test_first_row_mirrors_second() {
        let series = vec![
            resampled(0, 46.0, 7.9, 1000.0),
            resampled(30, 46.001, 7.901, 1010.0),
            resampled(60, 46.003, 7.902, 990.0),
        ];
        let out = compute_kinematics(&series);

        let (row0, row1) = (out.samples[0], out.samples[1]);
        assert_eq!(row0.distance, row1.distance);
        assert_eq!(row0.altitude_delta, row1.altitude_delta);
        assert_eq!(row0.time_delta, row1.time_delta);
        assert_eq!(row0.speed, row1.speed);
        // position and time stay the row's own
        assert_eq!(row0.timestamp, at(0));
        assert_eq!(row0.altitude, 1000.0);
    }

    #[test]
    fn test_distance_dominates_altitude_change() {
        let mut series = Vec::new();
        for i in 0..200 {
            let t = i as f64;
            series.push(resampled(
                i * 30,
                46.0 + (t * 0.37).sin() * 0.002,
                7.9 + (t * 0.11).cos() * 0.003,
                1500.0 + (t * 0.73).sin() * 40.0,
            ));
        }
        let out = compute_kinematics(&series);

        assert_eq!(out.samples.len(), series.len());
        for s in &out.samples {
            assert!(s.distance >= 0.0);
            assert!(s.distance >= s.altitude_delta.abs() - 1e-9);
            assert!(s.time_delta > 0.0);
        }
    }

    #[test]
    fn test_duplicate_timestamp_is_warned_not_divided() {
        let series = vec![
            resampled(0, 46.0, 7.9, 1000.0),
            resampled(30, 46.001, 7.9, 1000.0),
            resampled(30, 46.002, 7.9, 1000.0),
            resampled(60, 46.003, 7.9, 1000.0),
        ];
        let out = compute_kinematics(&series);

        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].index, 2);
        assert_eq!(out.samples[2].speed, None);
        assert!(out.samples[3].speed.is_some());
    }

    #[test]
    fn test_single_and_empty_series() {
        assert!(compute_kinematics(&[]).samples.is_empty());

        let out = compute_kinematics(&[resampled(0, 46.0, 7.9, 1000.0)]);
        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.samples[0].distance, 0.0);
        assert_eq!(out.samples[0].speed, None);
        assert!(out.warnings.is_empty());
    }
}
