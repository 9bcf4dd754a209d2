pub mod cluster;

pub use cluster::{build_clusters, TemporalIndex};
