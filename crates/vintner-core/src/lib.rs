pub mod config;
pub mod error;
pub mod record;

pub use config::{
    BlockingConfig, DedupConfig, NormalizationConfig, PerformanceConfig, PriceConfig, Thresholds,
};
pub use error::{CoreError, Result};
pub use record::{Metadata, Record, RecordId};
