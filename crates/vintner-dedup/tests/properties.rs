use proptest::prelude::*;
use vintner_core::Record;
use vintner_dedup::{BlockingEngine, Normalizer, SimilarityScorer, Strictness};

const WORDS: &[&str] = &[
    "Buffalo", "Trace", "Bourbon", "750ml", "1.75L", "Proof", "90", "pf", "Gift", "Box", "(2021)",
    "Sample", "Whiskey", "Bottled", "in", "Bond", "Maker's", "Small", "Batch", "Release", "2023",
    "Single", "Barrel", "Old", "Order", "Online", "10", "Year", "Rye", "Reserve",
];

fn catalog_name() -> impl Strategy<Value = String> {
    prop_oneof![
        "[A-Za-z0-9 .'()%-]{0,60}",
        prop::collection::vec(prop::sample::select(WORDS), 0..8).prop_map(|words| words.join(" ")),
    ]
}

fn brand() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::sample::select(vec![
        "Buffalo Trace".to_string(),
        "Blanton's".to_string(),
        "BLANTONS".to_string(),
        "Weller".to_string(),
    ]))
}

fn record(id: &str, name: String, brand: Option<String>) -> Record {
    let mut record = Record::new(id, name);
    record.brand = brand;
    record
}

proptest! {
    #[test]
    fn ultra_key_is_a_fixed_point(name in catalog_name()) {
        let normalizer = Normalizer::default();
        let ultra = normalizer.key(&name, Strictness::UltraAggressive);
        prop_assert_eq!(normalizer.key(&ultra, Strictness::UltraAggressive), ultra);
    }

    #[test]
    fn keys_are_lowercase_and_collapsed(name in catalog_name()) {
        let keys = Normalizer::default().normalize(&name);
        for level in Strictness::ALL {
            let key = keys.get(level);
            prop_assert_eq!(key.trim(), key);
            prop_assert!(!key.contains("  "));
            prop_assert_eq!(key.to_lowercase(), key);
        }
    }

    #[test]
    fn similarity_is_symmetric(
        left in catalog_name(),
        right in catalog_name(),
        left_brand in brand(),
        right_brand in brand(),
    ) {
        let scorer = SimilarityScorer::default();
        let a = record("a", left, left_brand);
        let b = record("b", right, right_brand);
        let ab = scorer.compare(&a, &b);
        let ba = scorer.compare(&b, &a);
        prop_assert_eq!(ab.similarity, ba.similarity);
        prop_assert!((0.0..=1.0).contains(&ab.similarity));
    }

    #[test]
    fn identical_ultra_keys_share_a_block(names in prop::collection::vec(catalog_name(), 2..12)) {
        let records: Vec<Record> = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Record::new(format!("r{i}"), name))
            .collect();
        let normalizer = Normalizer::default();
        let ultra: Vec<String> = records
            .iter()
            .map(|r| normalizer.key(&r.name, Strictness::UltraAggressive))
            .collect();
        let blocks = BlockingEngine::default().create_blocks(&records);

        for i in 0..records.len() {
            prop_assert!(blocks.values().any(|b| b.members.contains(&i)));
            for j in (i + 1)..records.len() {
                if !ultra[i].is_empty() && ultra[i] == ultra[j] {
                    prop_assert!(
                        blocks.values().any(|b| b.members.contains(&i) && b.members.contains(&j)),
                        "{:?} and {:?} share no block", records[i].name, records[j].name
                    );
                }
            }
        }
    }
}
