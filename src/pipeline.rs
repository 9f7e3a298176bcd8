/// Per-activity composition of the mode stages:
/// resample -> kinematics -> windowed features -> classifier -> segments.

use log::debug;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::kinematics::compute_kinematics;
use crate::mode_classifier::{predict_modes, ModeClassifier, TrainingRecord};
use crate::resampler::resample;
use crate::segment_stitcher::{stitch_segments, SegmentedPrediction};
use crate::track_reader::ActivitySample;
use crate::window_features::{window_features, FeatureRow};

/// Windowed feature rows for one activity.
pub fn featurize_activity(
    samples: &[ActivitySample],
    config: &PipelineConfig,
) -> Result<Vec<FeatureRow>> {
    let resampled = resample(samples, config.resample_interval_secs)?;
    let kinematics = compute_kinematics(&resampled);
    let rows = window_features(&kinematics.samples, config.speed_threshold, config.window)?;
    debug!(
        "{} raw -> {} resampled -> {} feature rows ({} bad time steps)",
        samples.len(),
        resampled.len(),
        rows.len(),
        kinematics.warnings.len()
    );
    Ok(rows)
}

/// Segmented mode predictions for one activity.
pub fn mode_timeline<C: ModeClassifier + ?Sized>(
    samples: &[ActivitySample],
    config: &PipelineConfig,
    classifier: &C,
) -> Result<Vec<SegmentedPrediction>> {
    let rows = featurize_activity(samples, config)?;
    let predictions = predict_modes(&rows, classifier)?;
    Ok(stitch_segments(&predictions))
}

/// Training rows for a hand-labeled activity: every complete window gets `mode`.
pub fn training_records(
    samples: &[ActivitySample],
    config: &PipelineConfig,
    mode: &str,
) -> Result<Vec<TrainingRecord>> {
    Ok(featurize_activity(samples, config)?
        .iter()
        .filter_map(|r| r.features)
        .filter(|f| f.is_finite())
        .map(|f| TrainingRecord::new(&f, mode))
        .collect())
}
