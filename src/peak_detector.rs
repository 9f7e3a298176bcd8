/// Peak Detector - the highest fix of each activity
///
/// Works on the raw samples. Gain here is the activity's altitude range
/// (max - min), not the accumulated climb.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::track_reader::{ActivityId, ActivitySample};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Peak {
    pub activity_id: ActivityId,
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub gain: f64,
}

/// Highest sample of one activity. Samples without altitude are ignored;
/// the first sample wins a tie. `None` when no sample has altitude.
pub fn max_altitude(activity_id: &str, samples: &[ActivitySample]) -> Option<Peak> {
    let mut highest: Option<(&ActivitySample, f64)> = None;
    let mut lowest = f64::INFINITY;

    for sample in samples {
        let Some(alt) = sample.altitude.filter(|a| a.is_finite()) else {
            continue;
        };
        lowest = lowest.min(alt);
        if highest.map_or(true, |(_, best)| alt > best) {
            highest = Some((sample, alt));
        }
    }

    highest.map(|(sample, altitude)| Peak {
        activity_id: activity_id.to_string(),
        timestamp: sample.timestamp,
        latitude: sample.latitude,
        longitude: sample.longitude,
        altitude,
        gain: altitude - lowest,
    })
}

/// One peak per activity whose gain is strictly greater than `gain_threshold`.
pub fn detect_peaks(
    activities: &BTreeMap<ActivityId, Vec<ActivitySample>>,
    gain_threshold: f64,
) -> Vec<Peak> {
    activities
        .iter()
        .filter_map(|(id, samples)| max_altitude(id, samples))
        .filter(|peak| peak.gain > gain_threshold)
        .filter(|peak| peak.latitude.is_finite() && peak.longitude.is_finite())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn series(altitudes: &[Option<f64>]) -> Vec<ActivitySample> {
        let start = NaiveDate::from_ymd_opt(2021, 2, 3).unwrap().and_hms_opt(8, 0, 0).unwrap();
        altitudes
            .iter()
            .enumerate()
            .map(|(i, alt)| ActivitySample {
                timestamp: start + Duration::seconds(30 * i as i64),
                latitude: 46.0 + i as f64 * 0.001,
                longitude: 7.9,
                altitude: *alt,
            })
            .collect()
    }

    #[test]
    fn test_climb_then_partial_descent() {
        // 100 -> 300 over 12 samples, then down to 150 over 8
        let mut altitudes: Vec<Option<f64>> =
            (0..12).map(|i| Some(100.0 + i as f64 * 200.0 / 11.0)).collect();
        altitudes.extend((1..=8).map(|i| Some(300.0 - i as f64 * 150.0 / 8.0)));
        let samples = series(&altitudes);
        assert_eq!(samples.len(), 20);

        let peak = max_altitude("7", &samples).unwrap();
        assert_eq!(peak.altitude, 300.0);
        assert_eq!(peak.timestamp, samples[11].timestamp);
        // global minimum, not the final altitude
        assert!((peak.gain - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_maximum_wins() {
        let samples = series(&[Some(10.0), Some(50.0), None, Some(50.0), Some(20.0)]);
        let peak = max_altitude("1", &samples).unwrap();
        assert_eq!(peak.timestamp, samples[1].timestamp);
        assert_eq!(peak.gain, 40.0);
    }

    #[test]
    fn test_no_altitude_no_peak() {
        assert!(max_altitude("1", &series(&[None, None])).is_none());
        assert!(max_altitude("1", &[]).is_none());
    }

    #[test]
    fn test_flat_activity_has_zero_gain() {
        let peak = max_altitude("1", &series(&[Some(5.0), Some(5.0)])).unwrap();
        assert_eq!(peak.gain, 0.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut activities = BTreeMap::new();
        activities.insert("1".to_string(), series(&[Some(0.0), Some(400.0)]));
        activities.insert("2".to_string(), series(&[Some(0.0), Some(400.5)]));
        activities.insert("3".to_string(), series(&[None]));

        let peaks = detect_peaks(&activities, 400.0);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].activity_id, "2");
        assert!(peaks.iter().all(|p| p.gain >= 0.0));
    }
}
