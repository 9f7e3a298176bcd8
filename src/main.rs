use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use log::info;
use serde::Serialize;

mod activity_index;
mod batch;
mod columns;
mod config;
mod error;
mod kinematics;
mod mode_classifier;
mod peak_clusterer;
mod peak_detector;
mod pipeline;
mod resampler;
mod sample_store;
mod segment_stitcher;
mod track_reader;
mod window_features;

use batch::{ingest_person, process_activities};
use columns::write_rows;
use config::PipelineConfig;
use error::PipelineError;
use mode_classifier::{train_from_table, write_training_table, NearestCentroidClassifier};
use peak_clusterer::{cluster_peaks, Dbscan};
use peak_detector::detect_peaks;
use sample_store::{group_by_activity, read_samples};
use segment_stitcher::{summarize_segments, SegmentedPrediction};
use track_reader::ActivityId;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Activity mode classification and summit clustering for GPS tracks",
    long_about = None
)]
struct Cli {
    /// JSON pipeline configuration; flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct Overrides {
    /// Root folder holding one export folder per person
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Resampling bucket width in seconds
    #[arg(long, global = true)]
    interval: Option<i64>,

    /// Drop samples slower than this (m/s) before windowing
    #[arg(long, global = true)]
    speed_threshold: Option<f64>,

    /// Rolling window length in resampled rows
    #[arg(long, global = true)]
    window: Option<usize>,

    /// Keep peaks whose altitude range exceeds this (m)
    #[arg(long, global = true)]
    gain_threshold: Option<f64>,

    /// Peak clustering radius (m)
    #[arg(long, global = true)]
    epsilon: Option<f64>,

    /// Minimum peaks per cluster
    #[arg(long, global = true)]
    min_samples: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse every track of the given people's exports into samples.csv
    Ingest {
        #[arg(required = true)]
        people: Vec<String>,
    },
    /// Build labeled training rows from a hand-labeled sample table
    Featurize {
        #[command(flatten)]
        source: SampleSource,
        /// Mode label applied to every complete window (e.g. ski_up)
        #[arg(long)]
        mode: String,
        #[arg(short, long, default_value = "featurized.csv")]
        output: PathBuf,
        /// Append to an existing training table
        #[arg(long)]
        append: bool,
    },
    /// Fit the mode model on a training table
    Train {
        #[arg(long, default_value = "featurized.csv")]
        features: PathBuf,
        #[arg(long, default_value = "model.json")]
        model: PathBuf,
        /// Share of labeled rows held out to score the model (0 disables)
        #[arg(long, default_value_t = 0.25)]
        test_fraction: f64,
        /// Shuffle seed for the held-out split
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Predict per-sample modes and stitch them into segments
    Predict {
        #[command(flatten)]
        source: SampleSource,
        #[arg(long, default_value = "model.json")]
        model: PathBuf,
        /// Only this activity
        #[arg(long)]
        activity: Option<ActivityId>,
        #[arg(short, long, default_value = "predictions.csv")]
        output: PathBuf,
    },
    /// Detect each activity's peak and cluster recurring summits
    Peaks {
        #[command(flatten)]
        source: SampleSource,
        #[arg(short, long, default_value = "peak_clusters.csv")]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct SampleSource {
    /// Sample table to read
    #[arg(long, conflicts_with = "person")]
    samples: Option<PathBuf>,
    /// Read <data-dir>/<person>/samples.csv
    #[arg(long)]
    person: Option<String>,
}

impl SampleSource {
    fn path(&self, config: &PipelineConfig) -> Result<PathBuf, PipelineError> {
        match (&self.samples, &self.person) {
            (Some(path), _) => Ok(path.clone()),
            (None, Some(person)) => Ok(config.samples_path(person)),
            (None, None) => {
                Err(PipelineError::config("either --samples or --person is required"))
            }
        }
    }
}

const PREDICTION_COLUMNS: &[&str] = &[
    "activity_id",
    "timestamp",
    "position_lat",
    "position_long",
    "predicted_mode",
    "segment",
];

#[derive(Debug, Serialize)]
struct PredictionRow<'a> {
    activity_id: &'a str,
    timestamp: String,
    position_lat: f64,
    position_long: f64,
    predicted_mode: &'a str,
    segment: usize,
}

impl<'a> PredictionRow<'a> {
    fn new(activity_id: &'a str, row: &'a SegmentedPrediction) -> Self {
        PredictionRow {
            activity_id,
            timestamp: row.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            position_lat: row.latitude,
            position_long: row.longitude,
            predicted_mode: &row.predicted_mode,
            segment: row.segment,
        }
    }
}

const CLUSTER_COLUMNS: &[&str] = &[
    "cluster",
    "activity_id",
    "timestamp",
    "position_lat",
    "position_long",
    "altitude",
    "gain",
];

#[derive(Debug, Serialize)]
struct ClusterMemberRow<'a> {
    cluster: i32,
    activity_id: &'a str,
    timestamp: String,
    position_lat: f64,
    position_long: f64,
    altitude: f64,
    gain: f64,
}

fn build_config(cli: &Cli) -> Result<PipelineConfig, PipelineError> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    let o = &cli.overrides;
    if let Some(v) = &o.data_dir {
        config.data_dir = v.clone();
    }
    if let Some(v) = o.interval {
        config.resample_interval_secs = v;
    }
    if let Some(v) = o.speed_threshold {
        config.speed_threshold = v;
    }
    if let Some(v) = o.window {
        config.window = v;
    }
    if let Some(v) = o.gain_threshold {
        config.gain_threshold_m = v;
    }
    if let Some(v) = o.epsilon {
        config.cluster_epsilon_m = v;
    }
    if let Some(v) = o.min_samples {
        config.cluster_min_samples = v;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    match &cli.command {
        Command::Ingest { people } => {
            for person in people {
                let report = ingest_person(&config, person)?;
                report.print_summary(person);
            }
        }
        Command::Featurize { source, mode, output, append } => {
            run_featurize(&config, &source.path(&config)?, mode, output, *append)?;
        }
        Command::Train { features, model, test_fraction, seed } => {
            let (classifier, scores) = train_from_table(features, *test_fraction, *seed)?;
            classifier.save(model)?;
            println!("✅ Trained mode model on classes {:?}", classifier.labels());
            for centroid in &classifier.centroids {
                println!("   • {}: {} training rows", centroid.label, centroid.support);
            }
            if let Some(scores) = scores {
                println!("\n📊 HELD-OUT CONFUSION MATRIX (rows actual, columns predicted)");
                println!("{}", scores);
            }
            println!("📁 Model saved to: {}", model.display());
        }
        Command::Predict { source, model, activity, output } => {
            let path = source.path(&config)?;
            run_predict(&config, &path, model, activity.as_deref(), output)?;
        }
        Command::Peaks { source, output } => {
            run_peaks(&config, &source.path(&config)?, output)?;
        }
    }
    Ok(())
}

fn run_featurize(
    config: &PipelineConfig,
    samples_path: &Path,
    mode: &str,
    output: &Path,
    append: bool,
) -> Result<(), PipelineError> {
    let activities = group_by_activity(&read_samples(samples_path)?);
    let (done, failed) = process_activities(&activities, |_, samples| {
        pipeline::training_records(samples, config, mode)
    })?;

    let records: Vec<_> = done.into_iter().flat_map(|(_, r)| r).collect();
    write_training_table(output, &records, append)?;
    println!(
        "✅ {} '{}' training rows from {} activities ({} skipped)",
        records.len(),
        mode,
        activities.len() - failed.len(),
        failed.len()
    );
    println!("📁 Training table: {}", output.display());
    Ok(())
}

fn run_predict(
    config: &PipelineConfig,
    samples_path: &Path,
    model_path: &Path,
    only: Option<&str>,
    output: &Path,
) -> Result<(), PipelineError> {
    let classifier = NearestCentroidClassifier::load(model_path)?;
    let mut activities = group_by_activity(&read_samples(samples_path)?);
    if let Some(id) = only {
        activities.retain(|k, _| k == id);
        if activities.is_empty() {
            return Err(PipelineError::insufficient(format!(
                "activity {} not in {}",
                id,
                samples_path.display()
            )));
        }
    }
    info!("predicting modes for {} activities", activities.len());

    let (timelines, failed) = process_activities(&activities, |_, samples| {
        pipeline::mode_timeline(samples, config, &classifier)
    })?;

    let mut rows = Vec::new();
    println!("\n🏔️  MODE TIMELINES");
    println!("==================");
    for (activity_id, timeline) in &timelines {
        println!("Activity {}:", activity_id);
        for segment in summarize_segments(timeline) {
            println!(
                "   {:>3}  {:<10} {} → {}  ({} samples)",
                segment.segment, segment.mode, segment.start, segment.end, segment.samples
            );
        }
        rows.extend(timeline.iter().map(|row| PredictionRow::new(activity_id, row)));
    }
    for failure in &failed {
        println!("   ❌ {}: {}", failure.activity_id, failure.reason);
    }

    write_rows(output, PREDICTION_COLUMNS, &rows)?;
    println!("📁 Predictions saved to: {}", output.display());
    Ok(())
}

fn run_peaks(
    config: &PipelineConfig,
    samples_path: &Path,
    output: &Path,
) -> Result<(), PipelineError> {
    let activities = group_by_activity(&read_samples(samples_path)?);
    let peaks = detect_peaks(&activities, config.gain_threshold_m);
    println!(
        "🔍 {} of {} activities gained more than {:.0}m",
        peaks.len(),
        activities.len(),
        config.gain_threshold_m
    );
    if peaks.is_empty() {
        write_rows::<ClusterMemberRow>(output, CLUSTER_COLUMNS, &[])?;
        println!("⚠️  No peaks to cluster");
        return Ok(());
    }

    let dbscan = Dbscan::new(config.cluster_epsilon_m, config.cluster_min_samples)?;
    let (labeled, clusters) = cluster_peaks(&peaks, &dbscan)?;

    println!(
        "\n⛰️  RECURRING SUMMITS (eps {:.0}m, min {} visits)",
        config.cluster_epsilon_m, config.cluster_min_samples
    );
    println!("==================================");
    for (rank, cluster) in clusters.iter().enumerate() {
        let top = cluster
            .members
            .iter()
            .map(|p| p.altitude)
            .fold(f64::NEG_INFINITY, f64::max);
        println!(
            "{:>3}. cluster {:<3} {:>3} visits  ({:.5}, {:.5})  top {:.0}m",
            rank + 1,
            cluster.label,
            cluster.count(),
            cluster.latitude,
            cluster.longitude,
            top
        );
        println!("       activities: {:?}", cluster.activity_ids());
    }
    let noise = labeled.iter().filter(|lp| lp.cluster == peak_clusterer::NOISE).count();
    println!("• Unclustered peaks: {}", noise);

    let rows: Vec<ClusterMemberRow> = labeled
        .iter()
        .map(|lp| ClusterMemberRow {
            cluster: lp.cluster,
            activity_id: &lp.peak.activity_id,
            timestamp: lp.peak.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            position_lat: lp.peak.latitude,
            position_long: lp.peak.longitude,
            altitude: lp.peak.altitude,
            gain: lp.peak.gain,
        })
        .collect();
    write_rows(output, CLUSTER_COLUMNS, &rows)?;
    println!("📁 Peak clusters saved to: {}", output.display());
    Ok(())
}
