//! Per-record derived data: normalized keys, canonical brand, category family
//! and the attributes used for conflict detection. Computed once per run.

use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use vintner_core::{NormalizationConfig, Record};

use crate::brand::BrandNormalizer;
use crate::normalize::{self, NormalizedKeySet, Normalizer, VariantInfo};

static AGE_STATEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2}) ?(?:years?|yrs?|yo)\b").expect("valid age regex"));

#[derive(Debug, Clone)]
pub struct PreparedRecord<'a> {
    pub record: &'a Record,
    pub keys: NormalizedKeySet,
    pub variant: VariantInfo,
    pub brand: Option<String>,
    pub category: Option<String>,
    /// Age statement in years, e.g. `10` for "10 Year".
    pub age: Option<u32>,
    pub proof: Option<f64>,
}

/// Owns the normalizers so blocking and scoring derive identical keys.
#[derive(Debug, Clone, Default)]
pub struct Preparer {
    normalizer: Normalizer,
    brands: BrandNormalizer,
}

impl Preparer {
    pub fn new(config: &NormalizationConfig) -> Self {
        Self {
            normalizer: Normalizer::new(config),
            brands: BrandNormalizer::new(config),
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn brands(&self) -> &BrandNormalizer {
        &self.brands
    }

    pub fn prepare<'a>(&self, record: &'a Record) -> PreparedRecord<'a> {
        let keys = self.normalizer.normalize(&record.name);
        let variant = normalize::extract_variant(&record.name);
        let age = AGE_STATEMENT
            .captures(&keys.standard)
            .and_then(|caps| caps[1].parse().ok());
        let proof = variant.proof.as_deref().and_then(|p| p.parse().ok());
        PreparedRecord {
            record,
            brand: record
                .brand_str()
                .and_then(|brand| self.brands.canonical(brand)),
            category: record.category_str().and_then(normalize::category_family),
            keys,
            variant,
            age,
            proof,
        }
    }

    /// Prepare a slice in parallel; output order matches input order.
    pub fn prepare_all<'a>(&self, records: &'a [Record]) -> Vec<PreparedRecord<'a>> {
        records.par_iter().map(|record| self.prepare(record)).collect()
    }

    pub fn prepare_refs<'a>(&self, records: &[&'a Record]) -> Vec<PreparedRecord<'a>> {
        records.par_iter().map(|record| self.prepare(*record)).collect()
    }
}
