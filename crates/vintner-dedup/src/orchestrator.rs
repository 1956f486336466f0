//! Batch coordination: validation, exact and fuzzy stages, grouping, price
//! resolution and paced delivery to a downstream sink.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::thread;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vintner_core::{DedupConfig, Record, RecordId};

use crate::blocking::{BlockingEngine, BlockingMetrics};
use crate::error::{DedupError, Result};
use crate::exact;
use crate::grouping::{self, DuplicateGroup, Resolution};
use crate::normalize::Strictness;
use crate::prepare::Preparer;
use crate::price::{PriceVariationGroup, PriceVariationResolver, SuggestedAction};
use crate::similarity::{MatchResult, SimilarityScorer};

/// Waits between delivered batches.
pub trait Pacer: Send + Sync {
    fn pause(&self, delay: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleepPacer;

impl Pacer for ThreadSleepPacer {
    fn pause(&self, delay: Duration) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

/// Never waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPacer;

impl Pacer for NoopPacer {
    fn pause(&self, _delay: Duration) {}
}

/// Downstream consumer of resolved groups, e.g. a storage writer.
pub trait ResolutionSink {
    fn accept(&mut self, batch: &[ResolvedGroup]) -> Result<()>;
}

impl<F> ResolutionSink for F
where
    F: FnMut(&[ResolvedGroup]) -> Result<()>,
{
    fn accept(&mut self, batch: &[ResolvedGroup]) -> Result<()> {
        self(batch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedGroup {
    pub group: DuplicateGroup,
    pub price: PriceVariationGroup,
    /// The primary record with the price decision applied.
    pub resolved: Record,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRejection {
    pub id: RecordId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    BelowThreshold { accepted: usize, required: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub exact: bool,
    pub fuzzy: bool,
    /// The batch exceeded `fuzzy_match_limit`; only exact keys were matched.
    pub fuzzy_skipped_over_limit: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub input_records: usize,
    pub accepted_records: usize,
    pub rejected_records: usize,
    pub candidate_pairs: usize,
    pub pairs_scored: usize,
    pub matches: usize,
    pub groups: usize,
    pub auto_merge: usize,
    pub manual_review: usize,
    pub price_actions: BTreeMap<SuggestedAction, usize>,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    pub rejected: Vec<RecordRejection>,
    pub groups: Vec<ResolvedGroup>,
    pub stages: StageReport,
    pub stats: BatchStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking: Option<BlockingMetrics>,
}

impl BatchReport {
    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    pub fn auto_merge_groups(&self) -> impl Iterator<Item = &ResolvedGroup> {
        self.groups
            .iter()
            .filter(|g| g.group.resolution == Resolution::AutoMerge)
    }

    pub fn review_groups(&self) -> impl Iterator<Item = &ResolvedGroup> {
        self.groups
            .iter()
            .filter(|g| g.group.resolution == Resolution::ManualReview)
    }
}

/// Runs a full deduplication batch.
pub struct DedupOrchestrator {
    config: DedupConfig,
    preparer: Preparer,
    blocking: BlockingEngine,
    scorer: SimilarityScorer,
    prices: PriceVariationResolver,
    pacer: Box<dyn Pacer>,
}

impl DedupOrchestrator {
    /// Fails fast on out-of-range thresholds or an otherwise invalid config.
    pub fn new(config: DedupConfig) -> Result<Self> {
        let thresholds = &config.thresholds;
        for (name, value) in [
            ("same_brand", thresholds.same_brand),
            ("different_brand", thresholds.different_brand),
            ("auto_merge_confidence", thresholds.auto_merge_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DedupError::InvalidThreshold { name, value });
            }
        }
        config.validate()?;

        let preparer = Preparer::new(&config.normalization);
        Ok(Self {
            blocking: BlockingEngine::new(config.blocking, preparer.clone()),
            scorer: SimilarityScorer::new(preparer.clone(), config.thresholds),
            prices: PriceVariationResolver::new(config.price),
            preparer,
            pacer: Box::new(ThreadSleepPacer),
            config,
        })
    }

    pub fn with_pacer(mut self, pacer: impl Pacer + 'static) -> Self {
        self.pacer = Box::new(pacer);
        self
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn blocking_engine(&self) -> &BlockingEngine {
        &self.blocking
    }

    pub fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    pub fn price_resolver(&self) -> &PriceVariationResolver {
        &self.prices
    }

    pub fn run(&self, records: &[Record]) -> BatchReport {
        let started = Instant::now();
        let mut report = BatchReport::default();
        report.stats.input_records = records.len();

        if !self.config.enabled {
            info!("deduplication disabled, skipping batch of {} records", records.len());
            report.skipped = Some(SkipReason::Disabled);
            return report;
        }

        let (accepted, rejected) = validate_batch(records);
        for rejection in &rejected {
            warn!("rejected record {}: {}", rejection.id, rejection.reason);
        }
        report.stats.accepted_records = accepted.len();
        report.stats.rejected_records = rejected.len();
        report.rejected = rejected;

        if accepted.len() < self.config.min_records_threshold {
            info!(
                "batch has {} valid records, below the threshold of {}; skipping",
                accepted.len(),
                self.config.min_records_threshold
            );
            report.skipped = Some(SkipReason::BelowThreshold {
                accepted: accepted.len(),
                required: self.config.min_records_threshold,
            });
            report.stats.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            return report;
        }

        let prepared = self.preparer.prepare_refs(&accepted);
        let fuzzy_allowed = prepared.len() <= self.config.performance.fuzzy_match_limit;
        report.stages.fuzzy = self.config.run_fuzzy_match && fuzzy_allowed;
        report.stages.fuzzy_skipped_over_limit = self.config.run_fuzzy_match && !fuzzy_allowed;
        report.stages.exact = self.config.run_exact_match || report.stages.fuzzy_skipped_over_limit;

        if report.stages.fuzzy_skipped_over_limit {
            warn!(
                "{} records exceed the fuzzy match limit of {}, using exact keys only",
                prepared.len(),
                self.config.performance.fuzzy_match_limit
            );
        }

        let mut candidates = BTreeSet::new();
        if report.stages.exact {
            candidates.extend(exact::chained_pairs(&prepared, Strictness::Aggressive));
        }
        if report.stages.fuzzy {
            let blocking = self.blocking.create_blocks_prepared(&prepared, None);
            candidates.extend(blocking.candidate_pairs());
            report.blocking = Some(blocking.metrics);
        }
        let candidates: Vec<(usize, usize)> = candidates.into_iter().collect();
        report.stats.candidate_pairs = candidates.len();

        let matches: Vec<(usize, usize, MatchResult)> = candidates
            .par_iter()
            .map(|&(a, b)| (a, b, self.scorer.compare_prepared(&prepared[a], &prepared[b])))
            .filter(|(_, _, result)| self.scorer.is_match(result))
            .collect();
        report.stats.pairs_scored = candidates.len();
        report.stats.matches = matches.len();
        debug!("{} of {} candidate pairs matched", matches.len(), candidates.len());

        let min_group_size = self.config.price.min_prices_for_stats.max(2);
        let groups = grouping::build_groups(&prepared, matches, min_group_size);

        let by_id: HashMap<&RecordId, &Record> =
            accepted.iter().map(|record| (&record.id, *record)).collect();
        for mut group in groups {
            let members: Vec<&Record> = group
                .members
                .iter()
                .filter_map(|id| by_id.get(id).copied())
                .collect();
            let Some(price) = self.prices.analyze_members(&members) else {
                continue;
            };

            group.resolution = self.resolution_for(&group, &price);
            match group.resolution {
                Resolution::AutoMerge => report.stats.auto_merge += 1,
                Resolution::ManualReview => report.stats.manual_review += 1,
            }
            *report.stats.price_actions.entry(price.action).or_insert(0) += 1;

            let resolved = self.prices.apply_price_strategy(&price);
            report.groups.push(ResolvedGroup {
                group,
                price,
                resolved,
            });
        }
        report.stats.groups = report.groups.len();
        report.stats.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        info!(
            "dedup batch: {} records, {} groups ({} auto-merge, {} review), {} rejected",
            report.stats.accepted_records,
            report.stats.groups,
            report.stats.auto_merge,
            report.stats.manual_review,
            report.stats.rejected_records
        );
        report
    }

    /// Auto-merge needs the config switch, enough confidence and a price
    /// decision that does not require review.
    fn resolution_for(&self, group: &DuplicateGroup, price: &PriceVariationGroup) -> Resolution {
        if self.config.auto_merge
            && group.average_similarity >= self.config.thresholds.auto_merge_confidence
            && price.action != SuggestedAction::FlagReview
        {
            Resolution::AutoMerge
        } else {
            Resolution::ManualReview
        }
    }

    /// Hand resolved groups to `sink` in batches of `batch_size`, pausing
    /// `batch_delay` between batches. Returns the number of groups delivered.
    pub fn deliver<S>(&self, report: &BatchReport, sink: &mut S) -> Result<usize>
    where
        S: ResolutionSink + ?Sized,
    {
        let batch_size = self.config.performance.batch_size.max(1);
        let delay = self.config.performance.batch_delay();
        let mut delivered = 0;

        for (index, batch) in report.groups.chunks(batch_size).enumerate() {
            if index > 0 {
                self.pacer.pause(delay);
            }
            sink.accept(batch)?;
            delivered += batch.len();
            debug!("delivered batch {} with {} groups", index + 1, batch.len());
        }
        Ok(delivered)
    }
}

/// Split records into accepted ones and per-record rejections.
fn validate_batch(records: &[Record]) -> (Vec<&Record>, Vec<RecordRejection>) {
    let mut seen = HashSet::new();
    let mut accepted = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();

    for record in records {
        if let Err(err) = record.validate() {
            rejected.push(RecordRejection {
                id: record.id.clone(),
                reason: err.to_string(),
            });
        } else if !seen.insert(&record.id) {
            rejected.push(RecordRejection {
                id: record.id.clone(),
                reason: format!("duplicate record id {}", record.id),
            });
        } else {
            accepted.push(record);
        }
    }
    (accepted, rejected)
}
