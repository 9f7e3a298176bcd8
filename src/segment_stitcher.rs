/// Segment Stitcher - split a mode timeline into contiguous legs
///
/// Predictions are walked in time order; a new segment opens whenever the
/// label changes.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::mode_classifier::ModePrediction;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentedPrediction {
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub predicted_mode: String,
    pub segment: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSummary {
    pub segment: usize,
    pub mode: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub samples: usize,
}

/// Row 0 opens segment 0; the id increments exactly where the mode changes.
pub fn stitch_segments(predictions: &[ModePrediction]) -> Vec<SegmentedPrediction> {
    let mut segment = 0;
    predictions
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if i > 0 && predictions[i - 1].predicted_mode != p.predicted_mode {
                segment += 1;
            }
            SegmentedPrediction {
                timestamp: p.timestamp,
                latitude: p.latitude,
                longitude: p.longitude,
                predicted_mode: p.predicted_mode.clone(),
                segment,
            }
        })
        .collect()
}

pub fn summarize_segments(rows: &[SegmentedPrediction]) -> Vec<SegmentSummary> {
    let mut summaries: Vec<SegmentSummary> = Vec::new();
    for row in rows {
        match summaries.last_mut() {
            Some(last) if last.segment == row.segment => {
                last.end = row.timestamp;
                last.samples += 1;
            }
            _ => summaries.push(SegmentSummary {
                segment: row.segment,
                mode: row.predicted_mode.clone(),
                start: row.timestamp,
                end: row.timestamp,
                samples: 1,
            }),
        }
    }
    summaries
}
