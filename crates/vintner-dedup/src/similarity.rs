//! Pairwise similarity between two records.
//!
//! The score is a weighted combination of a name signal (normalized key
//! equality, else fuzzy name similarity), brand agreement and category
//! agreement. Signals missing on either side drop out and the remaining
//! weights are renormalized. Conflicting age statements or proofs scale the
//! score down; size, year and gift-set differences never do.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use vintner_core::{Record, RecordId, Thresholds};

use crate::brand::BrandRelation;
use crate::prepare::{PreparedRecord, Preparer};

const NAME_WEIGHT: f64 = 0.7;
const BRAND_WEIGHT: f64 = 0.2;
const CATEGORY_WEIGHT: f64 = 0.1;

/// Name score when only the ultra-aggressive keys agree.
const ULTRA_KEY_SCORE: f64 = 0.9;

const AGE_CONFLICT_PENALTY: f64 = 0.3;
const PROOF_CONFLICT_PENALTY: f64 = 0.3;
const MAX_PENALTY: f64 = 0.6;
/// Proofs closer than this are treated as the same bottling.
const PROOF_TOLERANCE: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSignal {
    AggressiveKey,
    UltraKey,
    FuzzyName,
    SameBrand,
    DifferentBrand,
    SameCategory,
    DifferentCategory,
    AgeConflict,
    ProofConflict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub record_a: RecordId,
    pub record_b: RecordId,
    pub similarity: f64,
    pub name_score: f64,
    pub brand_relation: BrandRelation,
    pub signals: Vec<MatchSignal>,
    /// Facets expected to differ between true duplicates; informational only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variant_differences: Vec<String>,
}

impl MatchResult {
    pub fn has_signal(&self, signal: MatchSignal) -> bool {
        self.signals.contains(&signal)
    }
}

/// Brand-aware match threshold. Unknown brands use the stricter bar.
pub fn threshold_for(thresholds: &Thresholds, relation: BrandRelation) -> f64 {
    match relation {
        BrandRelation::Same => thresholds.same_brand,
        BrandRelation::Different | BrandRelation::Unknown => thresholds.different_brand,
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimilarityScorer {
    preparer: Preparer,
    thresholds: Thresholds,
}

impl SimilarityScorer {
    pub fn new(preparer: Preparer, thresholds: Thresholds) -> Self {
        Self {
            preparer,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn compare(&self, a: &Record, b: &Record) -> MatchResult {
        self.compare_prepared(&self.preparer.prepare(a), &self.preparer.prepare(b))
    }

    /// Scores two prepared records. The result does not depend on argument order
    /// apart from which id is reported as `record_a`.
    pub fn compare_prepared(&self, a: &PreparedRecord<'_>, b: &PreparedRecord<'_>) -> MatchResult {
        let (first, second) = if order_key(a) <= order_key(b) { (a, b) } else { (b, a) };
        let mut signals = Vec::new();

        let name_score = name_score(first, second, &mut signals);
        let mut weighted = name_score * NAME_WEIGHT;
        let mut weight = NAME_WEIGHT;

        let brand_relation =
            BrandRelation::between(first.brand.as_deref(), second.brand.as_deref());
        match brand_relation {
            BrandRelation::Same => {
                weighted += BRAND_WEIGHT;
                weight += BRAND_WEIGHT;
                signals.push(MatchSignal::SameBrand);
            }
            BrandRelation::Different => {
                weight += BRAND_WEIGHT;
                signals.push(MatchSignal::DifferentBrand);
            }
            BrandRelation::Unknown => {}
        }

        if let (Some(left), Some(right)) = (&first.category, &second.category) {
            weight += CATEGORY_WEIGHT;
            if left == right {
                weighted += CATEGORY_WEIGHT;
                signals.push(MatchSignal::SameCategory);
            } else {
                signals.push(MatchSignal::DifferentCategory);
            }
        }

        let mut penalty = 0.0;
        if let (Some(left), Some(right)) = (first.age, second.age) {
            if left != right {
                penalty += AGE_CONFLICT_PENALTY;
                signals.push(MatchSignal::AgeConflict);
            }
        }
        if let (Some(left), Some(right)) = (first.proof, second.proof) {
            if (left - right).abs() > PROOF_TOLERANCE {
                penalty += PROOF_CONFLICT_PENALTY;
                signals.push(MatchSignal::ProofConflict);
            }
        }

        let similarity = (weighted / weight) * (1.0 - f64::min(penalty, MAX_PENALTY));

        MatchResult {
            record_a: a.record.id.clone(),
            record_b: b.record.id.clone(),
            similarity: similarity.clamp(0.0, 1.0),
            name_score,
            brand_relation,
            signals,
            variant_differences: first.variant.differences(&second.variant),
        }
    }

    pub fn threshold_for(&self, relation: BrandRelation) -> f64 {
        threshold_for(&self.thresholds, relation)
    }

    /// Whether the pair clears its brand-aware threshold.
    pub fn is_match(&self, result: &MatchResult) -> bool {
        result.similarity >= self.threshold_for(result.brand_relation)
    }
}

fn order_key<'r>(p: &'r PreparedRecord<'_>) -> (&'r str, &'r str, &'r str, &'r RecordId) {
    (
        p.keys.aggressive.as_str(),
        p.keys.standard.as_str(),
        p.record.name.as_str(),
        &p.record.id,
    )
}

fn name_score(a: &PreparedRecord<'_>, b: &PreparedRecord<'_>, signals: &mut Vec<MatchSignal>) -> f64 {
    let (aggr_a, aggr_b) = (&a.keys.aggressive, &b.keys.aggressive);
    if !aggr_a.is_empty() && aggr_a == aggr_b {
        signals.push(MatchSignal::AggressiveKey);
        return 1.0;
    }

    let fuzzy = fuzzy_name_score(aggr_a, aggr_b);
    let (ultra_a, ultra_b) = (&a.keys.ultra_aggressive, &b.keys.ultra_aggressive);
    if !ultra_a.is_empty() && ultra_a == ultra_b {
        signals.push(MatchSignal::UltraKey);
        return fuzzy.max(ULTRA_KEY_SCORE);
    }

    if fuzzy > 0.0 {
        signals.push(MatchSignal::FuzzyName);
    }
    fuzzy
}

/// Mean of Jaro-Winkler similarity and token Jaccard overlap.
pub fn fuzzy_name_score(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let left: BTreeSet<&str> = a.split_whitespace().collect();
    let right: BTreeSet<&str> = b.split_whitespace().collect();
    let union = left.union(&right).count();
    let jaccard = if union == 0 {
        0.0
    } else {
        left.intersection(&right).count() as f64 / union as f64
    };
    0.5 * strsim::jaro_winkler(a, b) + 0.5 * jaccard
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> SimilarityScorer {
        SimilarityScorer::default()
    }

    #[test]
    fn size_variants_score_as_duplicates() {
        let s = scorer();
        let a = Record::new("a", "Buffalo Trace Bourbon 750ml");
        let b = Record::new("b", "Buffalo Trace Bourbon Sample");
        let result = s.compare(&a, &b);
        assert_eq!(result.similarity, 1.0);
        assert!(result.has_signal(MatchSignal::AggressiveKey));
        assert!(s.is_match(&result));
        assert_eq!(result.variant_differences.len(), 1);
    }

    #[test]
    fn unrelated_names_do_not_match() {
        let s = scorer();
        let result = s.compare(
            &Record::new("a", "Woodford Reserve"),
            &Record::new("b", "Eagle Rare 10 Year"),
        );
        assert!(result.similarity < 0.5, "{}", result.similarity);
        assert!(!s.is_match(&result));
    }

    #[test]
    fn brand_agreement_raises_score() {
        let s = scorer();
        let plain = s.compare(
            &Record::new("a", "Blanton's Original Single Barrel"),
            &Record::new("b", "Blantons Single Barrel Bourbon"),
        );
        let branded = s.compare(
            &Record::new("a", "Blanton's Original Single Barrel").with_brand("Blanton's"),
            &Record::new("b", "Blantons Single Barrel Bourbon").with_brand("BLANTONS"),
        );
        assert_eq!(branded.brand_relation, BrandRelation::Same);
        assert!(branded.similarity > plain.similarity);
        assert!(s.is_match(&branded));
    }

    #[test]
    fn missing_category_does_not_block_a_match() {
        let s = scorer();
        let result = s.compare(
            &Record::new("a", "Four Roses Small Batch").with_category("Bourbon"),
            &Record::new("b", "Four Roses Small Batch 1L"),
        );
        assert_eq!(result.similarity, 1.0);
        assert!(!result.has_signal(MatchSignal::DifferentCategory));
    }

    #[test]
    fn age_conflict_blocks_ultra_key_match() {
        let s = scorer();
        let result = s.compare(
            &Record::new("a", "Eagle Rare 10 Year").with_brand("Eagle Rare"),
            &Record::new("b", "Eagle Rare 17 Year").with_brand("Eagle Rare"),
        );
        assert!(result.has_signal(MatchSignal::UltraKey));
        assert!(result.has_signal(MatchSignal::AgeConflict));
        assert!(!s.is_match(&result));
    }

    #[test]
    fn proof_conflict_is_penalized() {
        let s = scorer();
        let result = s.compare(
            &Record::new("a", "Wild Turkey 81 Proof").with_brand("Wild Turkey"),
            &Record::new("b", "Wild Turkey 101 Proof").with_brand("Wild Turkey"),
        );
        assert!(result.has_signal(MatchSignal::ProofConflict));
        assert!(!s.is_match(&result));

        let same = s.compare(
            &Record::new("a", "Wild Turkey 81 Proof"),
            &Record::new("b", "Wild Turkey 81 Pf"),
        );
        assert_eq!(same.similarity, 1.0);
    }

    #[test]
    fn comparison_is_symmetric() {
        let s = scorer();
        let a = Record::new("x", "Elijah Craig Small Batch").with_brand("Elijah Craig");
        let b = Record::new("y", "Elijah Craig Barrel Proof").with_category("Bourbon");
        let ab = s.compare(&a, &b);
        let ba = s.compare(&b, &a);
        assert_eq!(ab.similarity, ba.similarity);
        assert_eq!(ab.signals, ba.signals);
        assert_eq!(ab.record_a.as_str(), "x");
        assert_eq!(ba.record_a.as_str(), "y");
    }

    #[test]
    fn empty_keys_never_match() {
        let s = scorer();
        let result = s.compare(&Record::new("a", "750ml"), &Record::new("b", "Sample"));
        assert_eq!(result.similarity, 0.0);
        assert!(result.signals.is_empty());
    }

    #[test]
    fn unknown_brand_uses_stricter_threshold() {
        let thresholds = Thresholds::default();
        assert_eq!(threshold_for(&thresholds, BrandRelation::Same), 0.7);
        assert_eq!(threshold_for(&thresholds, BrandRelation::Unknown), 0.85);
        assert_eq!(threshold_for(&thresholds, BrandRelation::Different), 0.85);
    }

    #[test]
    fn fuzzy_score_bounds() {
        assert_eq!(fuzzy_name_score("", "abc"), 0.0);
        assert_eq!(fuzzy_name_score("four roses", "four roses"), 1.0);
        let partial = fuzzy_name_score("four roses smb", "four roses sb");
        assert!(partial > 0.5 && partial < 1.0);
    }
}
