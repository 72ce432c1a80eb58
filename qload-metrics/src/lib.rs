pub mod error;
pub mod registry;
pub mod sink;
pub mod tags;

pub use error::{Error, Result};
pub use registry::{CheckSnapshot, MetricSnapshot, Registry};
pub use sink::{
    Counter, Gauge, GaugeSnapshot, MetricKind, MetricValue, Rate, RateSnapshot, Trend,
    TrendSnapshot,
};
pub use tags::TagSet;
