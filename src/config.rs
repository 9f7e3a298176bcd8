/// Pipeline configuration
///
/// Defaults mirror the values the mode model was trained with: 30 s
/// buckets and a 10-sample (5 minute) rolling window.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub resample_interval_secs: i64,
    pub speed_threshold: f64,
    pub window: usize,
    pub gain_threshold_m: f64,
    pub cluster_epsilon_m: f64,
    pub cluster_min_samples: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            data_dir: PathBuf::from("data"),
            resample_interval_secs: 30,
            speed_threshold: 0.0,
            window: 10,
            gain_threshold_m: 400.0,
            cluster_epsilon_m: 200.0,
            cluster_min_samples: 2,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config: PipelineConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.resample_interval_secs <= 0 {
            return Err(PipelineError::config(format!(
                "resample interval must be positive, got {}s",
                self.resample_interval_secs
            )));
        }
        // sample standard deviation needs two rows
        if self.window < 2 {
            return Err(PipelineError::config(format!(
                "window must be at least 2 samples, got {}",
                self.window
            )));
        }
        if !self.speed_threshold.is_finite() {
            return Err(PipelineError::config("speed threshold must be finite"));
        }
        if !self.gain_threshold_m.is_finite() {
            return Err(PipelineError::config("gain threshold must be finite"));
        }
        if !(self.cluster_epsilon_m.is_finite() && self.cluster_epsilon_m >= 0.0) {
            return Err(PipelineError::config(format!(
                "cluster epsilon must be a non-negative distance, got {}",
                self.cluster_epsilon_m
            )));
        }
        if self.cluster_min_samples == 0 {
            return Err(PipelineError::config("cluster min_samples must be at least 1"));
        }
        Ok(())
    }

    pub fn person_dir(&self, person: &str) -> PathBuf {
        self.data_dir.join(person)
    }

    pub fn samples_path(&self, person: &str) -> PathBuf {
        self.person_dir(person).join("samples.csv")
    }
}
