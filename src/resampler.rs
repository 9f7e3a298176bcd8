/// Fixed-interval resampling of one activity's raw samples.
///
/// Buckets start at the first timestamp and are `interval` seconds wide.
/// Each bucket holds the mean of the samples that fall into it; empty
/// buckets are forward-filled, then back-filled, so the output has no gaps.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::track_reader::ActivitySample;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResampledSample {
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    sum: f64,
    count: u32,
}

impl Accumulator {
    fn add(&mut self, value: f64) {
        if value.is_finite() {
            self.sum += value;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        if self.count > 0 {
            Some(self.sum / self.count as f64)
        } else {
            None
        }
    }
}

pub fn resample(samples: &[ActivitySample], interval_secs: i64) -> Result<Vec<ResampledSample>> {
    if interval_secs <= 0 {
        return Err(PipelineError::config(format!(
            "resample interval must be positive, got {}s",
            interval_secs
        )));
    }
    let (Some(start), Some(end)) = (
        samples.iter().map(|s| s.timestamp).min(),
        samples.iter().map(|s| s.timestamp).max(),
    ) else {
        return Err(PipelineError::insufficient("cannot resample an empty series"));
    };

    let bucket_count = ((end - start).num_seconds() / interval_secs + 1) as usize;
    let mut lat = vec![Accumulator::default(); bucket_count];
    let mut lon = vec![Accumulator::default(); bucket_count];
    let mut alt = vec![Accumulator::default(); bucket_count];

    for sample in samples {
        let bucket = ((sample.timestamp - start).num_seconds() / interval_secs) as usize;
        lat[bucket].add(sample.latitude);
        lon[bucket].add(sample.longitude);
        if let Some(a) = sample.altitude {
            alt[bucket].add(a);
        }
    }

    let latitude = filled_column(&lat, "latitude")?;
    let longitude = filled_column(&lon, "longitude")?;
    let altitude = filled_column(&alt, "altitude")?;

    Ok((0..bucket_count)
        .map(|i| ResampledSample {
            timestamp: start + Duration::seconds(i as i64 * interval_secs),
            latitude: latitude[i],
            longitude: longitude[i],
            altitude: altitude[i],
        })
        .collect())
}

fn filled_column(buckets: &[Accumulator], name: &str) -> Result<Vec<f64>> {
    let mut values: Vec<Option<f64>> = buckets.iter().map(Accumulator::mean).collect();
    fill_gaps(&mut values);
    values
        .into_iter()
        .collect::<Option<Vec<f64>>>()
        .ok_or_else(|| PipelineError::insufficient(format!("no {} values to resample", name)))
}

/// Forward-fill, then back-fill leading gaps. Leaves an all-`None` column untouched.
pub fn fill_gaps(values: &mut [Option<f64>]) {
    let mut last = None;
    for v in values.iter_mut() {
        if v.is_some() {
            last = *v;
        } else {
            *v = last;
        }
    }
    let mut next = None;
    for v in values.iter_mut().rev() {
        if v.is_some() {
            next = *v;
        } else {
            *v = next;
        }
    }
}
