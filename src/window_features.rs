/// Window Featurizer
///
/// Rolling mean / max / sample standard deviation of distance, speed and
/// altitude change over the trailing `window` rows, plus the calendar month.
///
/// Rows below the speed threshold are dropped *before* the windows are
/// taken, so a window may straddle a removed stop and span more wall-clock
/// time than `window * interval`. The mode model was trained on features
/// built this way.

use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::kinematics::KinematicSample;

/// Column order of the feature matrix. The classifier must see exactly this
/// order at training and prediction time.
pub const FEATURE_COLUMNS: [&str; 10] = [
    "dist",
    "dist_max",
    "dist_std",
    "speed",
    "speed_max",
    "speed_std",
    "delta_alt",
    "delta_alt_max",
    "delta_alt_std",
    "month",
];

pub type FeatureMatrixRow = [f64; 10];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub dist: f64,
    pub dist_max: f64,
    pub dist_std: f64,
    pub speed: f64,
    pub speed_max: f64,
    pub speed_std: f64,
    pub delta_alt: f64,
    pub delta_alt_max: f64,
    pub delta_alt_std: f64,
    pub month: u32,
}

impl FeatureVector {
    pub fn to_row(&self) -> FeatureMatrixRow {
        [
            self.dist,
            self.dist_max,
            self.dist_std,
            self.speed,
            self.speed_max,
            self.speed_std,
            self.delta_alt,
            self.delta_alt_max,
            self.delta_alt_std,
            self.month as f64,
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.to_row().iter().all(|v| v.is_finite())
    }
}

/// One post-filter row. `features` is `None` until the window is full.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRow {
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub month: u32,
    pub features: Option<FeatureVector>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowStat {
    mean: f64,
    max: f64,
    std: f64,
}

fn rolling(values: &[f64], window: usize) -> Vec<Option<WindowStat>> {
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            if slice.iter().any(|v| !v.is_finite()) {
                return None;
            }
            let n = slice.len() as f64;
            let mean = slice.iter().sum::<f64>() / n;
            let max = slice.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            Some(WindowStat { mean, max, std: var.sqrt() })
        })
        .collect()
}

pub fn window_features(
    samples: &[KinematicSample],
    speed_threshold: f64,
    window: usize,
) -> Result<Vec<FeatureRow>> {
    if window < 2 {
        return Err(PipelineError::config(format!(
            "window must be at least 2 samples, got {}",
            window
        )));
    }

    // undefined speed never passes the threshold
    let kept: Vec<(&KinematicSample, f64)> = samples
        .iter()
        .filter_map(|s| s.speed.filter(|v| *v >= speed_threshold).map(|v| (s, v)))
        .collect();

    let distance: Vec<f64> = kept.iter().map(|(s, _)| s.distance).collect();
    let speed: Vec<f64> = kept.iter().map(|(_, v)| *v).collect();
    let delta_alt: Vec<f64> = kept.iter().map(|(s, _)| s.altitude_delta).collect();

    let distance = rolling(&distance, window);
    let speed = rolling(&speed, window);
    let delta_alt = rolling(&delta_alt, window);

    Ok(kept
        .iter()
        .enumerate()
        .map(|(i, (s, _))| {
            let month = s.timestamp.month();
            let features = match (distance[i], speed[i], delta_alt[i]) {
                (Some(d), Some(v), Some(a)) => Some(FeatureVector {
                    dist: d.mean,
                    dist_max: d.max,
                    dist_std: d.std,
                    speed: v.mean,
                    speed_max: v.max,
                    speed_std: v.std,
                    delta_alt: a.mean,
                    delta_alt_max: a.max,
                    delta_alt_std: a.std,
                    month,
                }),
                _ => None,
            };
            FeatureRow {
                timestamp: s.timestamp,
                latitude: s.latitude,
                longitude: s.longitude,
                month,
                features,
            }
        })
        .collect())
}
