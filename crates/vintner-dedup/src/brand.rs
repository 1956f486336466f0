//! Brand canonicalization: punctuation folding, alias lookup and a
//! conservative edit-distance fallback.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vintner_core::NormalizationConfig;

/// How two (canonicalized) brands relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrandRelation {
    Same,
    Different,
    /// At least one side has no usable brand.
    Unknown,
}

impl BrandRelation {
    pub fn between(a: Option<&str>, b: Option<&str>) -> Self {
        match (a, b) {
            (Some(a), Some(b)) if a == b => BrandRelation::Same,
            (Some(_), Some(_)) => BrandRelation::Different,
            _ => BrandRelation::Unknown,
        }
    }
}

/// Canonical brand followed by the spellings scrapers commonly produce.
const KNOWN_BRANDS: &[(&str, &[&str])] = &[
    ("Buffalo Trace", &["buffalo trace distillery", "buffalo trace bourbon"]),
    ("Blanton's", &["blanton", "blantons single barrel"]),
    ("Maker's Mark", &["makers", "maker mark"]),
    ("Wild Turkey", &["wild turkey bourbon", "wt"]),
    ("Woodford Reserve", &["woodford"]),
    ("Four Roses", &["4 roses"]),
    ("Jim Beam", &["beam", "jim beam bourbon"]),
    ("Jack Daniel's", &["jack daniels", "jack daniel", "jd"]),
    ("Weller", &["w l weller", "wl weller", "william larue weller"]),
    ("Eagle Rare", &["eagle rare bourbon"]),
    ("Elijah Craig", &["elijah craig bourbon"]),
    ("Evan Williams", &["evan williams bourbon"]),
    ("Knob Creek", &["knob creek bourbon"]),
    ("Old Forester", &["old forrester"]),
    ("Heaven Hill", &["heaven hill distillery"]),
    ("Pappy Van Winkle", &["van winkle", "old rip van winkle", "pappy"]),
    ("E.H. Taylor", &["eh taylor", "colonel e h taylor", "col e h taylor"]),
    ("George T. Stagg", &["george t stagg", "stagg"]),
    ("Johnnie Walker", &["johnny walker"]),
    ("Glenfiddich", &["glenfiddich distillery"]),
    ("Glenlivet", &["the glenlivet"]),
    ("Macallan", &["the macallan"]),
    ("Jameson", &["jameson irish whiskey"]),
    ("Tito's", &["titos handmade vodka", "titos vodka"]),
    ("Hendrick's", &["hendricks gin"]),
];

/// Corporate noise that never distinguishes one brand from another.
const CORPORATE_WORDS: &[&str] = &[
    "the",
    "co",
    "company",
    "inc",
    "ltd",
    "llc",
    "distillery",
    "distilleries",
    "distilling",
    "brewery",
    "spirits",
];

/// Minimum normalized Levenshtein similarity for the fuzzy fallback.
const FUZZY_BRAND_THRESHOLD: f64 = 0.9;
/// Shorter names are never fuzzy-matched.
const FUZZY_MIN_LEN: usize = 5;

#[derive(Debug, Clone)]
pub struct BrandNormalizer {
    /// Cleaned alias (and cleaned canonical) to cleaned canonical.
    aliases: BTreeMap<String, String>,
}

impl Default for BrandNormalizer {
    fn default() -> Self {
        Self::new(&NormalizationConfig::default())
    }
}

impl BrandNormalizer {
    /// Built-in alias table extended (and overridden) by the configured one.
    pub fn new(config: &NormalizationConfig) -> Self {
        let mut aliases = BTreeMap::new();
        let builtin = KNOWN_BRANDS
            .iter()
            .map(|(canonical, spellings)| (*canonical, spellings.iter().copied().collect::<Vec<_>>()));
        let configured = config
            .brand_aliases
            .iter()
            .map(|(canonical, spellings)| {
                (canonical.as_str(), spellings.iter().map(String::as_str).collect())
            });

        for (canonical, spellings) in builtin.chain(configured) {
            let canonical_key = clean_brand(canonical);
            if canonical_key.is_empty() {
                continue;
            }
            aliases.insert(canonical_key.clone(), canonical_key.clone());
            for spelling in spellings {
                let alias = clean_brand(spelling);
                if !alias.is_empty() {
                    aliases.insert(alias, canonical_key.clone());
                }
            }
        }

        Self { aliases }
    }

    /// Canonical key for a raw brand, `None` when nothing meaningful remains.
    pub fn canonical(&self, raw: &str) -> Option<String> {
        let cleaned = clean_brand(raw);
        if cleaned.is_empty() {
            return None;
        }
        if let Some(canonical) = self.aliases.get(&cleaned) {
            return Some(canonical.clone());
        }
        if cleaned.chars().count() >= FUZZY_MIN_LEN {
            if let Some(canonical) = self.closest_alias(&cleaned) {
                return Some(canonical.to_string());
            }
        }
        Some(cleaned)
    }

    pub fn relation(&self, a: Option<&str>, b: Option<&str>) -> BrandRelation {
        let a = a.and_then(|raw| self.canonical(raw));
        let b = b.and_then(|raw| self.canonical(raw));
        BrandRelation::between(a.as_deref(), b.as_deref())
    }

    fn closest_alias(&self, cleaned: &str) -> Option<&str> {
        let mut best: Option<(f64, &str)> = None;
        for (alias, canonical) in &self.aliases {
            if alias.chars().count() < FUZZY_MIN_LEN {
                continue;
            }
            let score = strsim::normalized_levenshtein(cleaned, alias);
            if score < FUZZY_BRAND_THRESHOLD {
                continue;
            }
            // Strictly greater keeps the first alias in sorted order on ties.
            if best.is_none_or(|(best_score, _)| score > best_score) {
                best = Some((score, canonical.as_str()));
            }
        }
        best.map(|(_, canonical)| canonical)
    }
}

fn clean_brand(raw: &str) -> String {
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{2019}' | '\u{2018}' | '`' | '.'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned
        .split_whitespace()
        .filter(|word| !CORPORATE_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_and_case_fold_to_one_brand() {
        let brands = BrandNormalizer::default();
        assert_eq!(brands.canonical("Blanton's").as_deref(), Some("blantons"));
        assert_eq!(brands.canonical("BLANTONS").as_deref(), Some("blantons"));
        assert_eq!(brands.canonical("Blanton").as_deref(), Some("blantons"));
    }

    #[test]
    fn corporate_words_are_ignored() {
        let brands = BrandNormalizer::default();
        assert_eq!(
            brands.canonical("Buffalo Trace Distillery Inc.").as_deref(),
            Some("buffalo trace")
        );
        assert_eq!(brands.canonical("The Distillery Co."), None);
    }

    #[test]
    fn aliases_map_to_canonical() {
        let brands = BrandNormalizer::default();
        assert_eq!(brands.canonical("W.L. Weller").as_deref(), Some("weller"));
        assert_eq!(brands.canonical("Jack Daniels").as_deref(), Some("jack daniels"));
        assert_eq!(brands.canonical("The Macallan").as_deref(), Some("macallan"));
    }

    #[test]
    fn near_misspellings_use_fuzzy_fallback() {
        let brands = BrandNormalizer::default();
        assert_eq!(
            brands.canonical("Woodford Reserv").as_deref(),
            Some("woodford reserve")
        );
        // Short names never fuzzy-match.
        assert_eq!(brands.canonical("Beem").as_deref(), Some("beem"));
    }

    #[test]
    fn configured_aliases_extend_table() {
        let mut config = NormalizationConfig::default();
        config
            .brand_aliases
            .insert("Old Grand-Dad".into(), vec!["OGD".into()]);
        let brands = BrandNormalizer::new(&config);
        assert_eq!(brands.canonical("ogd").as_deref(), Some("old grand dad"));
    }

    #[test]
    fn relation_covers_all_cases() {
        let brands = BrandNormalizer::default();
        assert_eq!(
            brands.relation(Some("Maker's Mark"), Some("makers mark")),
            BrandRelation::Same
        );
        assert_eq!(
            brands.relation(Some("Maker's Mark"), Some("Four Roses")),
            BrandRelation::Different
        );
        assert_eq!(brands.relation(Some("Maker's Mark"), None), BrandRelation::Unknown);
        assert_eq!(brands.relation(Some("  "), Some("Weller")), BrandRelation::Unknown);
    }
}
