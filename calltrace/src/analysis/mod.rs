//! Analysis of completed interaction traces
//!
//! Pure functions over finished traces plus a listener that aggregates them,
//! separated from the CLI presentation layer.

pub mod hotspot_analyzer;
pub mod measurement;

pub use hotspot_analyzer::{analyze_hotspots, HotspotStats, MeasurementStats, MethodHotspot};
pub use measurement::{measurements, Measurement, MeasurementAggregator};
