/// Peak Clusterer - recurring summits across activities
///
/// DBSCAN over peak positions with great-circle (haversine) distance:
/// - a peak is a core point when at least `min_samples` peaks, itself
///   included, lie within `epsilon_m` meters
/// - clusters grow from core points in input order; border peaks join the
///   first cluster that reaches them
/// - everything else is noise (label -1) and is left out of the ranking

use std::collections::VecDeque;

use geo::{point, HaversineDistance};

use crate::error::{PipelineError, Result};
use crate::peak_detector::Peak;
use crate::track_reader::ActivityId;

pub const NOISE: i32 = -1;

/// Clustering boundary: one label per point, `NOISE` for unclustered points.
pub trait DensityClustering {
    fn fit_labels(&self, points: &[(f64, f64)]) -> Result<Vec<i32>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dbscan {
    pub epsilon_m: f64,
    pub min_samples: usize,
}

impl Dbscan {
    pub fn new(epsilon_m: f64, min_samples: usize) -> Result<Self> {
        if !(epsilon_m.is_finite() && epsilon_m >= 0.0) {
            return Err(PipelineError::config(format!("invalid epsilon {}", epsilon_m)));
        }
        if min_samples == 0 {
            return Err(PipelineError::config("min_samples must be at least 1"));
        }
        Ok(Dbscan { epsilon_m, min_samples })
    }

    fn neighbors(&self, points: &[(f64, f64)], i: usize) -> Vec<usize> {
        let (lat, lon) = points[i];
        let here = point!(x: lon, y: lat);
        points
            .iter()
            .enumerate()
            .filter(|(_, (lat, lon))| {
                here.haversine_distance(&point!(x: *lon, y: *lat)) <= self.epsilon_m
            })
            .map(|(j, _)| j)
            .collect()
    }
}

impl DensityClustering for Dbscan {
    fn fit_labels(&self, points: &[(f64, f64)]) -> Result<Vec<i32>> {
        if points.is_empty() {
            return Err(PipelineError::config("cannot cluster an empty point set"));
        }
        if points.iter().any(|(lat, lon)| !lat.is_finite() || !lon.is_finite()) {
            return Err(PipelineError::config("point set contains undefined coordinates"));
        }

        let neighborhoods: Vec<Vec<usize>> =
            (0..points.len()).map(|i| self.neighbors(points, i)).collect();
        let is_core: Vec<bool> =
            neighborhoods.iter().map(|n| n.len() >= self.min_samples).collect();

        let mut labels = vec![NOISE; points.len()];
        let mut next_label = 0;
        for seed in 0..points.len() {
            if labels[seed] != NOISE || !is_core[seed] {
                continue;
            }
            labels[seed] = next_label;
            let mut queue: VecDeque<usize> = VecDeque::from(vec![seed]);
            while let Some(p) = queue.pop_front() {
                if !is_core[p] {
                    continue;
                }
                for &q in &neighborhoods[p] {
                    if labels[q] == NOISE {
                        labels[q] = next_label;
                        queue.push_back(q);
                    }
                }
            }
            next_label += 1;
        }
        Ok(labels)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledPeak {
    pub peak: Peak,
    pub cluster: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeakCluster {
    pub label: i32,
    pub members: Vec<Peak>,
    pub latitude: f64,
    pub longitude: f64,
}

impl PeakCluster {
    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn activity_ids(&self) -> Vec<ActivityId> {
        self.members.iter().map(|p| p.activity_id.clone()).collect()
    }
}

/// Clusters by descending member count (ties by label), noise excluded.
pub fn rank_clusters(labeled: &[LabeledPeak]) -> Vec<PeakCluster> {
    let mut clusters: Vec<PeakCluster> = Vec::new();
    for lp in labeled.iter().filter(|lp| lp.cluster != NOISE) {
        match clusters.iter_mut().find(|c| c.label == lp.cluster) {
            Some(cluster) => cluster.members.push(lp.peak.clone()),
            None => clusters.push(PeakCluster {
                label: lp.cluster,
                members: vec![lp.peak.clone()],
                latitude: 0.0,
                longitude: 0.0,
            }),
        }
    }
    for cluster in &mut clusters {
        let n = cluster.members.len() as f64;
        cluster.latitude = cluster.members.iter().map(|p| p.latitude).sum::<f64>() / n;
        cluster.longitude = cluster.members.iter().map(|p| p.longitude).sum::<f64>() / n;
    }
    clusters.sort_by(|a, b| b.count().cmp(&a.count()).then(a.label.cmp(&b.label)));
    clusters
}

pub fn cluster_peaks<C: DensityClustering + ?Sized>(
    peaks: &[Peak],
    clustering: &C,
) -> Result<(Vec<LabeledPeak>, Vec<PeakCluster>)> {
    let points: Vec<(f64, f64)> = peaks.iter().map(|p| (p.latitude, p.longitude)).collect();
    let labels = clustering.fit_labels(&points)?;
    if labels.len() != peaks.len() {
        return Err(PipelineError::config(format!(
            "clustering returned {} labels for {} peaks",
            labels.len(),
            peaks.len()
        )));
    }

    let labeled: Vec<LabeledPeak> = peaks
        .iter()
        .cloned()
        .zip(labels)
        .map(|(peak, cluster)| LabeledPeak { peak, cluster })
        .collect();
    let ranked = rank_clusters(&labeled);
    Ok((labeled, ranked))
}
