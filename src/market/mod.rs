// Market snapshots and asset ranking
pub mod ranking;
pub mod snapshot;

pub use ranking::{select_top_k, AssetRanker, MomentumRanker, SelectionPolicy};
pub use snapshot::{build_analytics, build_snapshot, AnalyticsConfig, AssetContext};
