//! Price reconciliation across duplicate groups.
//!
//! Prices that agree closely (low coefficient of variation) are averaged.
//! When a few outliers explain the spread they are excluded first. Anything
//! else is flagged for review and the primary price is left untouched.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use vintner_core::{PriceConfig, Record, RecordId};

use crate::grouping::DuplicateGroup;
use crate::normalize::{Normalizer, Strictness};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestedAction {
    AcceptAverage,
    /// Too few usable prices for statistics; the primary price stands.
    AcceptPrimary,
    FlagReview,
    ExcludeOutliersThenAccept,
}

impl SuggestedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestedAction::AcceptAverage => "accept-average",
            SuggestedAction::AcceptPrimary => "accept-primary",
            SuggestedAction::FlagReview => "flag-review",
            SuggestedAction::ExcludeOutliersThenAccept => "exclude-outliers-then-accept",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation (n - 1).
    pub std_dev: f64,
    pub coefficient_of_variation: f64,
}

impl PriceStats {
    /// `None` for an empty slice.
    pub fn compute(prices: &[f64]) -> Option<Self> {
        if prices.is_empty() {
            return None;
        }
        let count = prices.len();
        let mut sorted = prices.to_vec();
        sorted.sort_by(f64::total_cmp);

        let mean = sorted.iter().sum::<f64>() / count as f64;
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };
        let std_dev = if count > 1 {
            let variance =
                sorted.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };
        let coefficient_of_variation = if mean > 0.0 { std_dev / mean } else { 0.0 };

        Some(Self {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            mean,
            median,
            std_dev,
            coefficient_of_variation,
        })
    }
}

/// One observed price, kept for auditability even when excluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub record_id: RecordId,
    pub price: f64,
    pub source: String,
    pub observed_at: DateTime<Utc>,
    pub outlier: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceVariationGroup {
    pub primary: Record,
    pub members: Vec<RecordId>,
    pub prices: Vec<PricePoint>,
    /// Statistics over every usable price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<PriceStats>,
    /// Statistics over the prices the canonical price was computed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_stats: Option<PriceStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_price: Option<f64>,
    pub action: SuggestedAction,
}

impl PriceVariationGroup {
    pub fn is_high_variation(&self, config: &PriceConfig) -> bool {
        self.stats
            .is_some_and(|stats| stats.coefficient_of_variation > config.max_coefficient_of_variation)
    }

    pub fn outliers(&self) -> impl Iterator<Item = &PricePoint> {
        self.prices.iter().filter(|point| point.outlier)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSummary {
    pub total_groups: usize,
    pub high_variation_groups: usize,
    pub average_coefficient_of_variation: f64,
    pub actions: BTreeMap<SuggestedAction, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct PriceVariationResolver {
    config: PriceConfig,
}

impl PriceVariationResolver {
    pub fn new(config: PriceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PriceConfig {
        &self.config
    }

    /// Analyze every duplicate group. Members missing from `records` are ignored.
    pub fn analyze_by_groups(&self, records: &[Record], groups: &[DuplicateGroup]) -> Vec<PriceVariationGroup> {
        let by_id: HashMap<&RecordId, &Record> =
            records.iter().map(|record| (&record.id, record)).collect();
        groups
            .iter()
            .filter_map(|group| {
                let members: Vec<&Record> = group
                    .members
                    .iter()
                    .filter_map(|id| by_id.get(id).copied())
                    .collect();
                self.analyze_members(&members)
            })
            .collect()
    }

    /// Group records by aggressive name key and analyze every group with at
    /// least `min_prices_for_stats` members.
    pub fn analyze_by_key(&self, normalizer: &Normalizer, records: &[Record]) -> Vec<(String, PriceVariationGroup)> {
        let mut buckets: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
        for record in records {
            let key = normalizer.key(&record.name, Strictness::Aggressive);
            if !key.is_empty() {
                buckets.entry(key).or_default().push(record);
            }
        }
        buckets
            .into_iter()
            .filter(|(_, members)| members.len() >= self.config.min_prices_for_stats.max(2))
            .filter_map(|(key, mut members)| {
                members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
                self.analyze_members(&members).map(|group| (key, group))
            })
            .collect()
    }

    /// `members` must be ordered primary first.
    pub fn analyze_members(&self, members: &[&Record]) -> Option<PriceVariationGroup> {
        let primary = (*members.first()?).clone();
        let mut prices: Vec<PricePoint> = members
            .iter()
            .filter_map(|record| {
                record.usable_price().map(|price| PricePoint {
                    record_id: record.id.clone(),
                    price,
                    source: record.source.clone(),
                    observed_at: record.created_at,
                    outlier: false,
                })
            })
            .collect();

        let values: Vec<f64> = prices.iter().map(|point| point.price).collect();
        let stats = PriceStats::compute(&values);

        let mut group = PriceVariationGroup {
            members: members.iter().map(|record| record.id.clone()).collect(),
            primary,
            prices: Vec::new(),
            stats,
            accepted_stats: None,
            canonical_price: None,
            action: SuggestedAction::AcceptPrimary,
        };

        let Some(stats) = stats.filter(|s| s.count >= self.config.min_prices_for_stats.max(1)) else {
            group.canonical_price = group.primary.usable_price();
            group.prices = prices;
            return Some(group);
        };

        for point in &mut prices {
            point.outlier = self.is_outlier(point.price, &stats);
        }
        let kept: Vec<f64> = prices
            .iter()
            .filter(|point| !point.outlier)
            .map(|point| point.price)
            .collect();
        let has_outliers = kept.len() < prices.len();
        let kept_stats = PriceStats::compute(&kept)
            .filter(|s| s.count >= self.config.min_prices_for_stats.max(1));

        let max_cv = self.config.max_coefficient_of_variation;
        if stats.coefficient_of_variation <= max_cv {
            let accepted = match kept_stats {
                Some(kept) if self.config.exclude_outliers && has_outliers => kept,
                _ => stats,
            };
            group.action = SuggestedAction::AcceptAverage;
            group.accepted_stats = Some(accepted);
            group.canonical_price = Some(round_cents(accepted.mean));
        } else if let Some(kept) = kept_stats
            .filter(|kept| self.config.exclude_outliers && has_outliers && kept.coefficient_of_variation <= max_cv)
        {
            group.action = SuggestedAction::ExcludeOutliersThenAccept;
            group.accepted_stats = Some(kept);
            group.canonical_price = Some(round_cents(kept.mean));
        } else {
            group.action = SuggestedAction::FlagReview;
        }

        debug!(
            "price group {}: {} prices, cv {:.3}, {}",
            group.primary.id,
            stats.count,
            stats.coefficient_of_variation,
            group.action.as_str()
        );
        group.prices = prices;
        Some(group)
    }

    /// A price is an outlier when it is more than `outlier_threshold` standard
    /// deviations from the mean, or more than `outlier_threshold` times away
    /// from the median. The ratio test catches a single extreme price in a
    /// small group, where it inflates the deviation it is measured against.
    fn is_outlier(&self, price: f64, stats: &PriceStats) -> bool {
        let threshold = self.config.outlier_threshold;
        if stats.count < 2 {
            return false;
        }
        if stats.std_dev > 0.0 && (price - stats.mean).abs() > threshold * stats.std_dev {
            return true;
        }
        if stats.median > 0.0 {
            let ratio = price / stats.median;
            return ratio > threshold || ratio < 1.0 / threshold;
        }
        false
    }

    /// The primary record with the group's price decision applied.
    ///
    /// Accepting paths set the canonical price. `flag-review` keeps the
    /// original price and only annotates metadata.
    pub fn apply_price_strategy(&self, group: &PriceVariationGroup) -> Record {
        let mut record = group.primary.clone();

        match group.action {
            SuggestedAction::AcceptAverage | SuggestedAction::ExcludeOutliersThenAccept => {
                if let Some(price) = group.canonical_price {
                    record.price = Some(price);
                }
            }
            SuggestedAction::AcceptPrimary => {}
            SuggestedAction::FlagReview => {
                record.metadata.insert("price_review_flag".into(), json!(true));
                if let Some(stats) = &group.stats {
                    record.metadata.insert(
                        "price_range".into(),
                        json!(format!("{:.2}-{:.2}", stats.min, stats.max)),
                    );
                }
            }
        }

        if let Some(stats) = &group.stats {
            record.metadata.insert("price_min".into(), json!(stats.min));
            record.metadata.insert("price_max".into(), json!(stats.max));
            record.metadata.insert("price_sources".into(), json!(stats.count));
            record.metadata.insert(
                "price_coefficient_of_variation".into(),
                json!(round_cents(stats.coefficient_of_variation * 100.0) / 100.0),
            );
        }
        let excluded: Vec<f64> = group.outliers().map(|point| point.price).collect();
        if group.action == SuggestedAction::ExcludeOutliersThenAccept && !excluded.is_empty() {
            record.metadata.insert("price_outliers_excluded".into(), json!(excluded));
        }
        record
            .metadata
            .insert("price_action".into(), json!(group.action.as_str()));
        record
    }

    pub fn summarize(&self, groups: &[PriceVariationGroup]) -> PriceSummary {
        let mut summary = PriceSummary {
            total_groups: groups.len(),
            ..PriceSummary::default()
        };
        let mut cv_sum = 0.0;
        let mut cv_count = 0usize;
        for group in groups {
            *summary.actions.entry(group.action).or_insert(0) += 1;
            if group.is_high_variation(&self.config) {
                summary.high_variation_groups += 1;
            }
            if let Some(stats) = &group.stats {
                cv_sum += stats.coefficient_of_variation;
                cv_count += 1;
            }
        }
        if cv_count > 0 {
            summary.average_coefficient_of_variation = cv_sum / cv_count as f64;
        }
        summary
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn priced(id: &str, price: f64) -> Record {
        Record::new(id, "Weller Special Reserve")
            .with_price(price)
            .with_source(format!("{id}.example"))
    }

    fn analyze(prices: &[f64]) -> PriceVariationGroup {
        let records: Vec<Record> = prices
            .iter()
            .enumerate()
            .map(|(i, price)| priced(&format!("r{i}"), *price))
            .collect();
        let refs: Vec<&Record> = records.iter().collect();
        PriceVariationResolver::default()
            .analyze_members(&refs)
            .unwrap()
    }

    #[test]
    fn stats_use_sample_deviation() {
        let stats = PriceStats::compute(&[10.0, 20.0, 30.0]).unwrap();
        assert_eq!(stats.mean, 20.0);
        assert_eq!(stats.median, 20.0);
        assert_eq!(stats.std_dev, 10.0);
        assert_eq!(stats.coefficient_of_variation, 0.5);
        assert!(PriceStats::compute(&[]).is_none());
        assert_eq!(PriceStats::compute(&[4.0, 8.0]).unwrap().median, 6.0);
    }

    #[test]
    fn close_prices_accept_average() {
        let group = analyze(&[29.99, 32.99, 27.99]);
        assert_eq!(group.action, SuggestedAction::AcceptAverage);
        assert_eq!(group.canonical_price, Some(30.32));
        let cv = group.stats.unwrap().coefficient_of_variation;
        assert!((cv - 0.083).abs() < 0.001, "{cv}");
    }

    #[test]
    fn moderate_spread_still_accepts_average() {
        let group = analyze(&[79.99, 149.99]);
        assert_eq!(group.action, SuggestedAction::AcceptAverage);
        assert_eq!(group.canonical_price, Some(114.99));
        assert!(group.outliers().next().is_none());
    }

    #[test]
    fn single_outlier_is_excluded() {
        let group = analyze(&[24.99, 89.99, 26.99]);
        assert_eq!(group.action, SuggestedAction::ExcludeOutliersThenAccept);
        assert_eq!(group.canonical_price, Some(25.99));
        let outliers: Vec<f64> = group.outliers().map(|p| p.price).collect();
        assert_eq!(outliers, vec![89.99]);
        // Excluded prices stay in the audit list.
        assert_eq!(group.prices.len(), 3);
    }

    #[test]
    fn unexplained_spread_is_flagged() {
        let group = analyze(&[10.0, 100.0]);
        assert_eq!(group.action, SuggestedAction::FlagReview);
        assert_eq!(group.canonical_price, None);
    }

    #[test]
    fn too_few_prices_accept_primary() {
        let records = vec![priced("a", 19.99), Record::new("b", "Weller Special Reserve")];
        let refs: Vec<&Record> = records.iter().collect();
        let group = PriceVariationResolver::default().analyze_members(&refs).unwrap();
        assert_eq!(group.action, SuggestedAction::AcceptPrimary);
        assert_eq!(group.canonical_price, Some(19.99));
    }

    #[test]
    fn flag_review_keeps_primary_price() {
        let group = analyze(&[10.0, 100.0]);
        let resolver = PriceVariationResolver::default();
        let record = resolver.apply_price_strategy(&group);
        assert_eq!(record.price, Some(10.0));
        assert_eq!(record.metadata["price_review_flag"], json!(true));
        assert_eq!(record.metadata["price_range"], json!("10.00-100.00"));
        assert_eq!(record.metadata["price_action"], json!("flag-review"));
    }

    #[test]
    fn accepting_sets_canonical_price() {
        let resolver = PriceVariationResolver::default();
        let record = resolver.apply_price_strategy(&analyze(&[24.99, 89.99, 26.99]));
        assert_eq!(record.price, Some(25.99));
        assert_eq!(record.metadata["price_outliers_excluded"], json!([89.99]));
        assert_eq!(record.metadata["price_sources"], json!(3));
        assert!(!record.metadata.contains_key("price_review_flag"));
    }

    #[test]
    fn analyze_by_key_groups_name_variants() {
        let records = vec![
            Record::new("a", "Eagle Rare 10 Year 750ml").with_price(39.99),
            Record::new("b", "Eagle Rare 10 Year").with_price(41.99),
            Record::new("c", "Woodford Reserve").with_price(34.99),
        ];
        let groups =
            PriceVariationResolver::default().analyze_by_key(&Normalizer::default(), &records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "eagle rare 10 year");
        assert_eq!(groups[0].1.canonical_price, Some(40.99));
    }

    #[test]
    fn summary_counts_actions() {
        let resolver = PriceVariationResolver::default();
        let groups = vec![
            analyze(&[29.99, 32.99, 27.99]),
            analyze(&[10.0, 100.0]),
            analyze(&[24.99, 89.99, 26.99]),
        ];
        let summary = resolver.summarize(&groups);
        assert_eq!(summary.total_groups, 3);
        assert_eq!(summary.high_variation_groups, 2);
        assert_eq!(summary.actions[&SuggestedAction::FlagReview], 1);
        assert_eq!(summary.actions[&SuggestedAction::AcceptAverage], 1);
        assert!(summary.average_coefficient_of_variation > 0.0);
    }

    #[test]
    fn analyze_by_groups_follows_grouped_members() {
        use crate::grouping::build_groups;
        use crate::prepare::Preparer;
        use crate::similarity::SimilarityScorer;
        use chrono::TimeZone;

        let dated = |id: &str, name: &str, day: u32, price: f64| {
            Record::new(id, name)
                .with_price(price)
                .with_created_at(Utc.with_ymd_and_hms(2024, 2, day, 0, 0, 0).unwrap())
        };
        let records = vec![
            dated("w-late", "Weller Special Reserve", 5, 89.99),
            dated("w-early", "Weller Special Reserve", 1, 24.99),
            dated("w-mid", "Weller Special Reserve", 2, 26.99),
            dated("fr-1", "Four Roses Small Batch", 1, 29.99),
            dated("fr-2", "Four Roses Small Batch", 2, 32.99),
            dated("fr-3", "Four Roses Small Batch", 3, 27.99),
        ];
        let prepared = Preparer::default().prepare_all(&records);
        let scorer = SimilarityScorer::default();
        let matches = [(0, 1), (0, 2), (3, 4), (3, 5)]
            .into_iter()
            .map(|(a, b)| (a, b, scorer.compare_prepared(&prepared[a], &prepared[b])))
            .collect();
        let groups = build_groups(&prepared, matches, 2);
        assert_eq!(groups.len(), 2);

        // fr-3 is no longer in the record set.
        let available: Vec<Record> = records.iter().filter(|r| r.id.as_str() != "fr-3").cloned().collect();
        let resolver = PriceVariationResolver::default();
        let analyzed = resolver.analyze_by_groups(&available, &groups);
        assert_eq!(analyzed.len(), 2);

        let roses = &analyzed[0];
        assert_eq!(roses.primary.id.as_str(), "fr-1");
        assert_eq!(roses.prices.len(), 2);
        assert!(roses.prices.iter().all(|p| p.record_id.as_str() != "fr-3"));
        assert_eq!(roses.action, SuggestedAction::AcceptAverage);
        assert_eq!(roses.canonical_price, Some(31.49));

        let weller = &analyzed[1];
        assert_eq!(weller.primary.id.as_str(), "w-early");
        assert_eq!(weller.prices[0].record_id.as_str(), "w-early");
        assert_eq!(weller.action, SuggestedAction::ExcludeOutliersThenAccept);
        assert_eq!(weller.canonical_price, Some(25.99));

        let only_roses: Vec<Record> = records[3..].to_vec();
        assert_eq!(resolver.analyze_by_groups(&only_roses, &groups).len(), 1);
    }
}
