pub mod blocking;
pub mod brand;
pub mod error;
pub mod exact;
pub mod grouping;
pub mod normalize;
pub mod orchestrator;
pub mod prepare;
pub mod price;
pub mod similarity;

pub use blocking::{Block, BlockKey, BlockKind, BlockMap, BlockingEngine, BlockingMetrics, BlockingResult};
pub use brand::{BrandNormalizer, BrandRelation};
pub use error::{DedupError, Result};
pub use grouping::{DuplicateGroup, Resolution};
pub use normalize::{NormalizedKeySet, Normalizer, Strictness, VariantInfo, extract_variant, normalize};
pub use orchestrator::{
    BatchReport, BatchStats, DedupOrchestrator, NoopPacer, Pacer, RecordRejection, ResolutionSink,
    ResolvedGroup, SkipReason, StageReport, ThreadSleepPacer,
};
pub use prepare::{PreparedRecord, Preparer};
pub use price::{PriceStats, PriceSummary, PriceVariationGroup, PriceVariationResolver, SuggestedAction};
pub use similarity::{MatchResult, MatchSignal, SimilarityScorer};
