//! Exact normalized-key matching, used as its own stage and as the fallback
//! when the fuzzy stage is skipped for very large batches.

use std::collections::BTreeMap;

use crate::normalize::Strictness;
use crate::prepare::PreparedRecord;

/// Buckets of record indices sharing a non-empty key at `level`.
pub fn group_by_key(prepared: &[PreparedRecord<'_>], level: Strictness) -> BTreeMap<String, Vec<usize>> {
    let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, record) in prepared.iter().enumerate() {
        let key = record.keys.get(level);
        if !key.is_empty() {
            buckets.entry(key.to_string()).or_default().push(idx);
        }
    }
    buckets
}

/// Pairs chaining the members of each key bucket.
///
/// A bucket is first split by canonical brand and each brand is chained to
/// its own head, so a head whose brand fails the scorer's threshold cannot cut
/// off the rest. Unbranded members are chained together and their head is
/// linked to every branded head. Union-find only needs a spanning chain, so a
/// bucket of `n` members yields about `n` pairs instead of `n(n-1)/2`.
pub fn chained_pairs(prepared: &[PreparedRecord<'_>], level: Strictness) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for members in group_by_key(prepared, level).into_values() {
        let mut by_brand: BTreeMap<Option<&str>, Vec<usize>> = BTreeMap::new();
        for idx in members {
            by_brand.entry(prepared[idx].brand.as_deref()).or_default().push(idx);
        }

        let mut branded_heads = Vec::new();
        for (brand, chain) in &by_brand {
            if let Some((head, rest)) = chain.split_first() {
                pairs.extend(rest.iter().map(|&idx| ordered(*head, idx)));
                if brand.is_some() {
                    branded_heads.push(*head);
                }
            }
        }
        if let Some(&unbranded) = by_brand.get(&None).and_then(|chain| chain.first()) {
            pairs.extend(branded_heads.into_iter().map(|head| ordered(unbranded, head)));
        }
    }
    pairs.sort_unstable();
    pairs.dedup();
    pairs
}

fn ordered(a: usize, b: usize) -> (usize, usize) {
    if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prepare::Preparer;
    use vintner_core::Record;

    #[test]
    fn groups_share_aggressive_key() {
        let records = vec![
            Record::new("a", "Buffalo Trace Bourbon 750ml"),
            Record::new("b", "Woodford Reserve"),
            Record::new("c", "Buffalo Trace Bourbon Sample"),
            Record::new("d", "***"),
            Record::new("e", "buffalo trace bourbon (2021)"),
        ];
        let prepared = Preparer::default().prepare_all(&records);
        let buckets = group_by_key(&prepared, Strictness::Aggressive);
        assert_eq!(buckets["buffalo trace bourbon"], vec![0, 2, 4]);
        assert_eq!(buckets.len(), 2);

        let pairs = chained_pairs(&prepared, Strictness::Aggressive);
        assert_eq!(pairs, vec![(0, 2), (0, 4)]);
    }

    #[test]
    fn standard_level_is_stricter() {
        let records = vec![
            Record::new("a", "Buffalo Trace Bourbon 750ml"),
            Record::new("b", "Buffalo Trace Bourbon Sample"),
        ];
        let prepared = Preparer::default().prepare_all(&records);
        assert!(chained_pairs(&prepared, Strictness::Standard).is_empty());
    }

    #[test]
    fn brands_chain_separately_within_a_bucket() {
        let records = vec![
            Record::new("a", "Buffalo Trace Bourbon").with_brand("Sazerac"),
            Record::new("b", "Buffalo Trace Bourbon 750ml").with_brand("Buffalo Trace"),
            Record::new("c", "Buffalo Trace Bourbon Sample").with_brand("Buffalo Trace"),
            Record::new("d", "Buffalo Trace Bourbon Gift Box"),
            Record::new("e", "Buffalo Trace Bourbon Mini"),
        ];
        let prepared = Preparer::default().prepare_all(&records);
        let pairs = chained_pairs(&prepared, Strictness::Aggressive);
        // b-c share a brand, d-e share no brand, d links to both branded heads.
        assert_eq!(pairs, vec![(0, 3), (1, 2), (1, 3), (3, 4)]);
    }
}
