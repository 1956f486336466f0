//! Name normalization at three strictness levels, plus variant facet extraction.
//!
//! Every level builds on the previous one:
//!
//! * `Standard` lowercases, drops apostrophes, turns other punctuation into
//!   spaces and collapses whitespace.
//! * `Aggressive` additionally removes sizes, marketing text and release years,
//!   and folds proof notation (`90 proof`, `90 pf`, `90pf` all become `90pf`).
//! * `UltraAggressive` drops every digit and the configured stopwords.
//!
//! Normalization is total: any input yields a (possibly empty) key.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use vintner_core::NormalizationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    Standard,
    Aggressive,
    UltraAggressive,
}

impl Strictness {
    pub const ALL: [Strictness; 3] = [
        Strictness::Standard,
        Strictness::Aggressive,
        Strictness::UltraAggressive,
    ];
}

/// The three keys derived from one name. Recomputed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedKeySet {
    pub standard: String,
    pub aggressive: String,
    pub ultra_aggressive: String,
}

impl NormalizedKeySet {
    pub fn get(&self, level: Strictness) -> &str {
        match level {
            Strictness::Standard => &self.standard,
            Strictness::Aggressive => &self.aggressive,
            Strictness::UltraAggressive => &self.ultra_aggressive,
        }
    }
}

/// Facets that normalization strips away. A similarity signal, never an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    pub gift_set: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
}

impl VariantInfo {
    /// Human-readable list of facets that differ between two names.
    pub fn differences(&self, other: &VariantInfo) -> Vec<String> {
        let mut diffs = Vec::new();
        if self.size != other.size {
            diffs.push(format!(
                "size: {} vs {}",
                self.size.as_deref().unwrap_or("standard"),
                other.size.as_deref().unwrap_or("standard")
            ));
        }
        if self.year != other.year {
            diffs.push(format!(
                "year: {} vs {}",
                self.year.as_deref().unwrap_or("none"),
                other.year.as_deref().unwrap_or("none")
            ));
        }
        if self.gift_set != other.gift_set {
            diffs.push("gift set variation".to_string());
        }
        if self.proof != other.proof {
            diffs.push(format!(
                "proof: {} vs {}",
                self.proof.as_deref().unwrap_or("standard"),
                other.proof.as_deref().unwrap_or("standard")
            ));
        }
        diffs
    }
}

// ─── Patterns ──────────────────────────────────────────────

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("valid normalization regex")
}

/// Applied to the lowercased raw name, before punctuation is lost.
static RAW_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (pattern(r"\(\s*(?:19|20)\d{2}\s*\)"), " "),
        (
            pattern(
                r"\b\d+(?:[.,]\d+)?\s*(?:ml|milliliters?|millilitres?|cl|ltr|liters?|litres?|l|oz|ounces?)\b",
            ),
            " ",
        ),
        (pattern(r"\bp\.\s?f\.?"), "pf"),
        (pattern(r"\bbarrel[\s-]+proof\b"), "bp"),
        (pattern(r"(\d+(?:\.\d+)?)\s*(?:proof|pf)\b"), "${1}pf"),
    ]
});

/// Applied to standard text (lowercase alphanumerics and single spaces).
static TOKEN_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (pattern(r"\bbottled in bond\b"), "bib"),
        (pattern(r"\bsingle barrel\b"), "sb"),
        (pattern(r"\bsmall batch\b"), "smb"),
        (pattern(r"\bcask strength\b"), "cs"),
        (pattern(r"\bbarrel proof\b"), "bp"),
        (pattern(r"\bwhiskey\b"), "whisky"),
        (pattern(r"\b(\d+) ?(?:proof|pf)\b"), "${1}pf"),
        (pattern(r"\bproof\b"), "pf"),
        (
            pattern(r"\b\d+ ?(?:ml|cl|ltr|liters?|litres?|l|oz|ounces?)\b"),
            " ",
        ),
        (
            pattern(
                r"\b(?:samples?|miniatures?|minis?|magnums?|travell?ers?|pint|quart|half gallon|gallon)\b",
            ),
            " ",
        ),
        (
            pattern(r"\bgift (?:box|set|pack|package|edition|tin)\b"),
            " ",
        ),
        (
            pattern(r"\b(?:order|buy|shop) (?:online|now)\b"),
            " ",
        ),
        (
            pattern(r"\b(?:ratings? and reviews?|reviews? and ratings?)\b"),
            " ",
        ),
        (
            pattern(r"\b(?:free shipping|in stock|out of stock|online exclusive)\b"),
            " ",
        ),
        (
            pattern(r"\b(?:19|20)\d{2} (?:release|edition)\b"),
            " ",
        ),
        (pattern(r"\breleased? in (?:19|20)\d{2}\b"), " "),
    ]
});

static SIZE_FACET: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b(\d+(?:\.\d+)?)\s*(ml|cl|ltr|liters?|litres?|l|oz)\b")
});
static SIZE_WORD_FACET: Lazy<Regex> =
    Lazy::new(|| pattern(r"\b(sample|miniature|mini|magnum|traveler|half gallon)s?\b"));
static YEAR_FACET: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\(\s*((?:19|20)\d{2})\s*\)|\b((?:19|20)\d{2})\s+(?:release|edition)\b")
});
static GIFT_FACET: Lazy<Regex> = Lazy::new(|| pattern(r"\bgift\s*(?:box|set|pack)"));
static PROOF_FACET: Lazy<Regex> =
    Lazy::new(|| pattern(r"(\d+(?:\.\d+)?)\s*(?:proof|pf|p\.f\.)"));

/// Bound on rule re-application; every rule shortens its match, so this is
/// only reached on pathological input.
const MAX_PASSES: usize = 16;

// ─── Normalizer ────────────────────────────────────────────

/// Builds normalized keys. Holds the configurable stopword list.
#[derive(Debug, Clone)]
pub struct Normalizer {
    stopwords: HashSet<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(&NormalizationConfig::default())
    }
}

static DEFAULT_NORMALIZER: Lazy<Normalizer> = Lazy::new(Normalizer::default);

/// Normalize with the default stopword list.
pub fn normalize(name: &str) -> NormalizedKeySet {
    DEFAULT_NORMALIZER.normalize(name)
}

impl Normalizer {
    pub fn new(config: &NormalizationConfig) -> Self {
        let stopwords = config
            .stopwords
            .iter()
            .map(|word| standard_key(word))
            .filter(|word| !word.is_empty())
            .collect();
        Self { stopwords }
    }

    /// All three keys, computing each level from the previous one.
    pub fn normalize(&self, name: &str) -> NormalizedKeySet {
        let standard = standard_key(name);
        let aggressive = aggressive_key(name);
        let ultra_aggressive = self.ultra_from_aggressive(&aggressive);
        NormalizedKeySet {
            standard,
            aggressive,
            ultra_aggressive,
        }
    }

    /// The key for a single strictness level.
    pub fn key(&self, name: &str, level: Strictness) -> String {
        match level {
            Strictness::Standard => standard_key(name),
            Strictness::Aggressive => aggressive_key(name),
            Strictness::UltraAggressive => self.ultra_from_aggressive(&aggressive_key(name)),
        }
    }

    fn ultra_from_aggressive(&self, aggressive: &str) -> String {
        let mut current = self.strip_digits_and_stopwords(aggressive);
        for _ in 0..MAX_PASSES {
            let next = self.strip_digits_and_stopwords(&apply_token_rules(&current));
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn strip_digits_and_stopwords(&self, text: &str) -> String {
        text.split_whitespace()
            .map(|token| token.chars().filter(|c| !c.is_numeric()).collect::<String>())
            .filter(|token| !token.is_empty() && !self.stopwords.contains(token))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Lowercase, drop apostrophes, replace other punctuation with spaces, collapse.
pub fn standard_key(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{2019}' | '\u{2018}' | '`'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    collapse_whitespace(&cleaned)
}

fn aggressive_key(name: &str) -> String {
    let mut raw = name.to_lowercase();
    for (re, replacement) in RAW_RULES.iter() {
        raw = re.replace_all(&raw, *replacement).into_owned();
    }
    apply_token_rules(&standard_key(&raw))
}

/// Re-applies the token rules until the text stops changing.
fn apply_token_rules(text: &str) -> String {
    let mut current = text.to_string();
    for _ in 0..MAX_PASSES {
        let mut next = current.clone();
        for (re, replacement) in TOKEN_RULES.iter() {
            next = re.replace_all(&next, *replacement).into_owned();
        }
        let next = collapse_whitespace(&next);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract size, release year, gift-set and proof facets from a raw name.
pub fn extract_variant(name: &str) -> VariantInfo {
    let lowered = name.to_lowercase();

    let size = SIZE_FACET
        .captures(&lowered)
        .map(|caps| {
            let unit = match &caps[2] {
                unit if unit.starts_with("lit") || unit == "ltr" => "l",
                unit => unit,
            };
            format!("{}{}", &caps[1], unit)
        })
        .or_else(|| {
            SIZE_WORD_FACET
                .captures(&lowered)
                .map(|caps| caps[1].to_string())
        });

    let year = YEAR_FACET.captures(&lowered).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
    });

    let proof = PROOF_FACET
        .captures(&lowered)
        .map(|caps| caps[1].to_string());

    VariantInfo {
        size,
        year,
        gift_set: GIFT_FACET.is_match(&lowered),
        proof,
    }
}

// ─── Category families ─────────────────────────────────────

/// Fold a free-text category into a coarse family so that `Bourbon` and
/// `Kentucky Straight Bourbon Whiskey` compare equal.
pub fn category_family(category: &str) -> Option<String> {
    let normalized = standard_key(category);
    if normalized.is_empty() {
        return None;
    }
    let has = |needle: &str| normalized.contains(needle);
    let family = if has("bourbon") || has("american whisk") || has("tennessee") {
        "american-whiskey"
    } else if has("scotch") || has("single malt") {
        "scotch-whisky"
    } else if has("irish") {
        "irish-whiskey"
    } else if has("japanese") {
        "japanese-whisky"
    } else if has("canadian") {
        "canadian-whisky"
    } else if has("rye") {
        "rye-whiskey"
    } else if has("whisk") {
        "whiskey"
    } else if has("gin") {
        "gin"
    } else if has("vodka") {
        "vodka"
    } else if has("rum") {
        "rum"
    } else if has("tequila") || has("mezcal") {
        "agave"
    } else if has("brandy") || has("cognac") || has("armagnac") {
        "brandy"
    } else {
        return Some(normalized);
    };
    Some(family.to_string())
}
