/// Mode Classifier Adapter
///
/// Applies a trained classifier to windowed feature rows and re-attaches
/// time and position to every prediction. The model is always an explicit
/// value handed in by the caller.
///
/// `NearestCentroidClassifier` is the bundled model: per-label centroids in
/// standardized feature space, persisted as JSON. Training holds out a
/// seeded random share of the labeled rows and scores the model on them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::NaiveDateTime;
use csv::Reader;
use log::info;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::window_features::{FeatureMatrixRow, FeatureRow, FeatureVector, FEATURE_COLUMNS};

pub trait ModeClassifier {
    /// One label per input row, in input order.
    fn predict(&self, rows: &[FeatureMatrixRow]) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModePrediction {
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub predicted_mode: String,
}

/// Predict a mode for every row with a complete feature vector.
///
/// Rows still inside the leading window are dropped. The classifier is
/// called once over the whole batch.
pub fn predict_modes<C: ModeClassifier + ?Sized>(
    rows: &[FeatureRow],
    classifier: &C,
) -> Result<Vec<ModePrediction>> {
    let defined: Vec<(&FeatureRow, FeatureMatrixRow)> = rows
        .iter()
        .filter_map(|r| {
            r.features
                .filter(FeatureVector::is_finite)
                .map(|f| (r, f.to_row()))
        })
        .collect();
    if defined.is_empty() {
        return Err(PipelineError::insufficient(format!(
            "none of {} rows has a complete feature window",
            rows.len()
        )));
    }

    let matrix: Vec<FeatureMatrixRow> = defined.iter().map(|(_, x)| *x).collect();
    let labels = classifier.predict(&matrix)?;
    if labels.len() != matrix.len() {
        return Err(PipelineError::config(format!(
            "classifier returned {} labels for {} rows",
            labels.len(),
            matrix.len()
        )));
    }

    Ok(defined
        .into_iter()
        .zip(labels)
        .map(|((row, _), predicted_mode)| ModePrediction {
            timestamp: row.timestamp,
            latitude: row.latitude,
            longitude: row.longitude,
            predicted_mode,
        })
        .collect())
}

fn check_matrix(rows: &[FeatureMatrixRow]) -> Result<()> {
    if rows.is_empty() {
        return Err(PipelineError::config("empty feature matrix"));
    }
    if let Some(i) = rows.iter().position(|r| r.iter().any(|v| !v.is_finite())) {
        return Err(PipelineError::config(format!("feature row {} has undefined values", i)));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub label: String,
    pub center: Vec<f64>,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestCentroidClassifier {
    pub columns: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub centroids: Vec<Centroid>,
}

impl NearestCentroidClassifier {
    pub fn fit(rows: &[FeatureMatrixRow], labels: &[String]) -> Result<Self> {
        check_matrix(rows)?;
        if rows.len() != labels.len() {
            return Err(PipelineError::config(format!(
                "{} feature rows but {} labels",
                rows.len(),
                labels.len()
            )));
        }

        let n = rows.len() as f64;
        let width = FEATURE_COLUMNS.len();
        let means: Vec<f64> = (0..width)
            .map(|c| rows.iter().map(|r| r[c]).sum::<f64>() / n)
            .collect();
        let scales: Vec<f64> = (0..width)
            .map(|c| {
                let var = rows.iter().map(|r| (r[c] - means[c]).powi(2)).sum::<f64>() / n;
                // constant columns carry no information; leave them unscaled
                if var > 0.0 { var.sqrt() } else { 1.0 }
            })
            .collect();

        let mut sums: BTreeMap<&str, (Vec<f64>, usize)> = BTreeMap::new();
        for (row, label) in rows.iter().zip(labels) {
            let entry = sums.entry(label.as_str()).or_insert_with(|| (vec![0.0; width], 0));
            for c in 0..width {
                entry.0[c] += (row[c] - means[c]) / scales[c];
            }
            entry.1 += 1;
        }

        let centroids = sums
            .into_iter()
            .map(|(label, (sum, support))| Centroid {
                label: label.to_string(),
                center: sum.into_iter().map(|v| v / support as f64).collect(),
                support,
            })
            .collect();

        Ok(NearestCentroidClassifier {
            columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            means,
            scales,
            centroids,
        })
    }

    pub fn labels(&self) -> Vec<&str> {
        self.centroids.iter().map(|c| c.label.as_str()).collect()
    }

    fn validate(&self) -> Result<()> {
        let width = FEATURE_COLUMNS.len();
        if self.columns.iter().map(String::as_str).ne(FEATURE_COLUMNS.iter().copied()) {
            return Err(PipelineError::config(format!(
                "model was trained on columns {:?}, expected {:?}",
                self.columns, FEATURE_COLUMNS
            )));
        }
        if self.centroids.is_empty() {
            return Err(PipelineError::config("model has no classes"));
        }
        if self.means.len() != width
            || self.scales.len() != width
            || self.centroids.iter().any(|c| c.center.len() != width)
        {
            return Err(PipelineError::config("model dimensions do not match the feature width"));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let model: NearestCentroidClassifier =
            serde_json::from_reader(BufReader::new(File::open(path)?))?;
        model.validate()?;
        info!("loaded mode model with classes {:?}", model.labels());
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), self)?;
        Ok(())
    }
}

impl ModeClassifier for NearestCentroidClassifier {
    fn predict(&self, rows: &[FeatureMatrixRow]) -> Result<Vec<String>> {
        check_matrix(rows)?;
        self.validate()?;

        Ok(rows
            .iter()
            .map(|row| {
                let standardized: Vec<f64> = row
                    .iter()
                    .enumerate()
                    .map(|(c, v)| (v - self.means[c]) / self.scales[c])
                    .collect();
                let mut best = &self.centroids[0];
                let mut best_dist = f64::INFINITY;
                for centroid in &self.centroids {
                    let dist: f64 = centroid
                        .center
                        .iter()
                        .zip(&standardized)
                        .map(|(a, b)| (a - b).powi(2))
                        .sum();
                    if dist < best_dist {
                        best = centroid;
                        best_dist = dist;
                    }
                }
                best.label.clone()
            })
            .collect())
    }
}

/// One row of the labeled training table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
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
    pub mode: String,
}

impl TrainingRecord {
    pub fn new(f: &FeatureVector, mode: &str) -> Self {
        TrainingRecord {
            dist: f.dist,
            dist_max: f.dist_max,
            dist_std: f.dist_std,
            speed: f.speed,
            speed_max: f.speed_max,
            speed_std: f.speed_std,
            delta_alt: f.delta_alt,
            delta_alt_max: f.delta_alt_max,
            delta_alt_std: f.delta_alt_std,
            month: f.month,
            mode: mode.to_string(),
        }
    }

    pub fn features(&self) -> FeatureMatrixRow {
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
}

fn training_header() -> Vec<&'static str> {
    FEATURE_COLUMNS.iter().copied().chain(["mode"]).collect()
}

pub fn write_training_table(path: &Path, records: &[TrainingRecord], append: bool) -> Result<()> {
    let has_rows = append && path.exists() && std::fs::metadata(path)?.len() > 0;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if !has_rows {
        wtr.write_record(training_header())?;
    }
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_training_table(path: &Path) -> Result<Vec<TrainingRecord>> {
    let mut rdr = Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize::<TrainingRecord>() {
        records.push(result?);
    }
    Ok(records)
}

pub fn check_training_header(path: &Path) -> Result<()> {
    let mut rdr = Reader::from_path(path)?;
    let headers = rdr.headers()?;
    let expected = training_header();
    if headers.iter().ne(expected.iter().copied()) {
        return Err(PipelineError::config(format!(
            "training table columns {:?} do not match {:?}",
            headers, expected
        )));
    }
    Ok(())
}

/// Shuffle with a fixed seed and split off `test_fraction` of the rows
/// (rounded up) as the held-out set. Returns (train, test).
pub fn train_test_split(
    mut records: Vec<TrainingRecord>,
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<TrainingRecord>, Vec<TrainingRecord>)> {
    if !(0.0..1.0).contains(&test_fraction) {
        return Err(PipelineError::config(format!(
            "test fraction must be in [0, 1), got {}",
            test_fraction
        )));
    }
    let n_test = (records.len() as f64 * test_fraction).ceil() as usize;
    if n_test >= records.len() {
        return Err(PipelineError::config(format!(
            "{} labeled rows leave nothing to train on after holding out {}",
            records.len(),
            n_test
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    records.shuffle(&mut rng);
    let train = records.split_off(n_test);
    Ok((train, records))
}

/// Actual labels down the rows, predicted labels across the columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(actual: &[String], predicted: &[String]) -> Result<Self> {
        if actual.len() != predicted.len() {
            return Err(PipelineError::config(format!(
                "{} actual labels but {} predictions",
                actual.len(),
                predicted.len()
            )));
        }
        let labels: Vec<String> = actual
            .iter()
            .chain(predicted)
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let position = |label: &String| labels.iter().position(|l| l == label).unwrap_or(0);

        let mut counts = vec![vec![0; labels.len()]; labels.len()];
        for (a, p) in actual.iter().zip(predicted) {
            counts[position(a)][position(p)] += 1;
        }
        Ok(ConfusionMatrix { labels, counts })
    }

    pub fn count(&self, actual: &str, predicted: &str) -> usize {
        let row = self.labels.iter().position(|l| l == actual);
        let col = self.labels.iter().position(|l| l == predicted);
        match (row, col) {
            (Some(r), Some(c)) => self.counts[r][c],
            _ => 0,
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.labels.len()).map(|i| self.counts[i][i]).sum()
    }

    /// Share of correctly labeled rows; 0 for an empty matrix.
    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.correct() as f64 / total as f64,
        }
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .labels
            .iter()
            .map(String::len)
            .chain([8])
            .max()
            .unwrap_or(8);

        write!(f, "{:<width$}", "actual", width = width)?;
        for label in &self.labels {
            write!(f, " {:>width$}", label, width = width)?;
        }
        writeln!(f)?;
        for (label, row) in self.labels.iter().zip(&self.counts) {
            write!(f, "{:<width$}", label, width = width)?;
            for count in row {
                write!(f, " {:>width$}", count, width = width)?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "accuracy: {:.3} ({}/{})",
            self.accuracy(),
            self.correct(),
            self.total()
        )
    }
}

pub fn evaluate<C: ModeClassifier + ?Sized>(
    classifier: &C,
    records: &[TrainingRecord],
) -> Result<ConfusionMatrix> {
    let rows: Vec<FeatureMatrixRow> = records.iter().map(TrainingRecord::features).collect();
    let predicted = classifier.predict(&rows)?;
    let actual: Vec<String> = records.iter().map(|r| r.mode.clone()).collect();
    ConfusionMatrix::new(&actual, &predicted)
}

fn fit_records(records: &[TrainingRecord]) -> Result<NearestCentroidClassifier> {
    let rows: Vec<FeatureMatrixRow> = records.iter().map(TrainingRecord::features).collect();
    let labels: Vec<String> = records.iter().map(|r| r.mode.clone()).collect();
    NearestCentroidClassifier::fit(&rows, &labels)
}

/// Fit on a training table. With a positive `test_fraction` the model is
/// fitted on the remaining rows and scored on the held-out ones.
pub fn train_from_table(
    path: &Path,
    test_fraction: f64,
    seed: u64,
) -> Result<(NearestCentroidClassifier, Option<ConfusionMatrix>)> {
    check_training_header(path)?;
    let records = read_training_table(path)?;
    let (train, test) = train_test_split(records, test_fraction, seed)?;
    info!("training on {} rows, holding out {}", train.len(), test.len());

    let model = fit_records(&train)?;
    let scores = if test.is_empty() {
        None
    } else {
        Some(evaluate(&model, &test)?)
    };
    Ok((model, scores))
}
