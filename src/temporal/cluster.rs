use crate::config::TemporalConfig;
use crate::model::{ImageTimestamp, TemporalCluster};
use chrono::Duration;

/// Partition `timestamps` into consecutive-gap clusters, per `spec.md`
/// §4.3. This generalizes the teacher's `stacks::assign_stacks_clean`: items
/// with no timestamp each get a solo cluster, and timed items are split
/// whenever the gap to the *previous* item (not the cluster's first item)
/// exceeds `config.max_gap_secs`.
pub fn build_clusters(
    timestamps: Vec<ImageTimestamp>,
    category: &str,
    config: &TemporalConfig,
) -> Vec<TemporalCluster> {
    let mut with_time: Vec<ImageTimestamp> = Vec::new();
    let mut without_time: Vec<ImageTimestamp> = Vec::new();
    for ts in timestamps {
        if ts.timestamp.is_some() {
            with_time.push(ts);
        } else {
            without_time.push(ts);
        }
    }
    with_time.sort_by_key(|t| t.timestamp);

    let max_gap = Duration::seconds(config.max_gap_secs);
    let mut clusters: Vec<TemporalCluster> = Vec::new();
    let mut current: Vec<ImageTimestamp> = Vec::new();
    let mut last: Option<chrono::DateTime<chrono::Utc>> = None;

    for ts in with_time {
        let t = ts.timestamp.unwrap();
        if let Some(prev) = last {
            if t - prev > max_gap {
                clusters.push(finish_cluster(
                    std::mem::take(&mut current),
                    max_gap,
                    category,
                    config.burst_minimum,
                ));
            }
        }
        last = Some(t);
        current.push(ts);
    }
    if !current.is_empty() {
        clusters.push(finish_cluster(current, max_gap, category, config.burst_minimum));
    }

    for ts in without_time {
        clusters.push(TemporalCluster {
            members: vec![ts],
            max_gap,
            sport_category: category.to_string(),
            is_burst: false,
        });
    }

    clusters
}

fn finish_cluster(
    members: Vec<ImageTimestamp>,
    max_gap: Duration,
    category: &str,
    burst_minimum: usize,
) -> TemporalCluster {
    let is_burst = members.len() >= burst_minimum;
    TemporalCluster {
        members,
        max_gap,
        sport_category: category.to_string(),
        is_burst,
    }
}

/// Sorted-by-timestamp index over one batch, supporting O(log n) neighbor
/// lookups for the matcher's temporal-bonus pass (`spec.md` §4.4).
pub struct TemporalIndex {
    entries: Vec<(chrono::DateTime<chrono::Utc>, usize)>,
}

impl TemporalIndex {
    pub fn build(clusters: &[TemporalCluster]) -> Self {
        let mut entries = Vec::new();
        for (cluster_idx, cluster) in clusters.iter().enumerate() {
            for member in &cluster.members {
                if let Some(t) = member.timestamp {
                    entries.push((t, cluster_idx));
                }
            }
        }
        entries.sort_by_key(|(t, _)| *t);
        Self { entries }
    }

    /// Indices of clusters with at least one member within `window` of
    /// `at`, via binary search over the sorted timestamp index.
    pub fn neighbor_clusters(&self, at: chrono::DateTime<chrono::Utc>, window: Duration) -> Vec<usize> {
        let lo = at - window;
        let hi = at + window;
        let start = self.entries.partition_point(|(t, _)| *t < lo);
        let end = self.entries.partition_point(|(t, _)| *t <= hi);
        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();
        for (_, idx) in &self.entries[start..end] {
            if seen.insert(*idx) {
                result.push(*idx);
            }
        }
        result
    }
}
