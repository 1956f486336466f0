use chrono::{Duration, TimeZone, Utc};
use vintner_core::{DedupConfig, Record};
use vintner_dedup::{
    DedupOrchestrator, NoopPacer, Normalizer, PriceVariationResolver, Resolution, Strictness,
    SuggestedAction,
};

fn dated(id: &str, name: &str, offset_days: i64) -> Record {
    let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    Record::new(id, name).with_created_at(base + Duration::days(offset_days))
}

fn orchestrator(config: DedupConfig) -> DedupOrchestrator {
    DedupOrchestrator::new(DedupConfig {
        min_records_threshold: 1,
        ..config
    })
    .unwrap()
    .with_pacer(NoopPacer)
}

fn group_of<'a>(report: &'a vintner_dedup::BatchReport, id: &str) -> Option<&'a vintner_dedup::ResolvedGroup> {
    report
        .groups
        .iter()
        .find(|g| g.group.members.iter().any(|member| member.as_str() == id))
}

#[test]
fn size_variants_are_duplicates_and_distinct_products_are_not() {
    let records = vec![
        dated("bt-750", "Buffalo Trace Bourbon 750ml", 0),
        dated("bt-sample", "Buffalo Trace Bourbon Sample", 1),
        dated("woodford", "Woodford Reserve", 2),
        dated("eagle", "Eagle Rare 10 Year", 3),
    ];
    let report = orchestrator(DedupConfig::default()).run(&records);

    let buffalo = group_of(&report, "bt-750").expect("buffalo trace group");
    assert!(buffalo.group.members.iter().any(|m| m.as_str() == "bt-sample"));
    assert_eq!(buffalo.group.primary.as_str(), "bt-750");

    assert!(group_of(&report, "woodford").is_none());
    assert!(group_of(&report, "eagle").is_none());
    assert_eq!(report.groups.len(), 1);
}

#[test]
fn proof_notation_folds() {
    let normalizer = Normalizer::default();
    assert_eq!(
        normalizer.key("Wild Turkey 81 Proof", Strictness::Aggressive),
        normalizer.key("Wild Turkey 81 Pf", Strictness::Aggressive)
    );

    let records = vec![
        dated("wt-proof", "Wild Turkey 81 Proof", 0),
        dated("wt-pf", "Wild Turkey 81 Pf", 1),
    ];
    let report = orchestrator(DedupConfig::default()).run(&records);
    assert_eq!(report.groups.len(), 1);
}

#[test]
fn outlier_price_is_excluded_in_pipeline() {
    let records = vec![
        dated("a", "Weller Special Reserve", 0).with_price(24.99),
        dated("b", "Weller Special Reserve 1.75L", 1).with_price(89.99),
        dated("c", "Weller Special Reserve Gift Box", 2).with_price(26.99),
    ];
    let report = orchestrator(DedupConfig::default()).run(&records);
    assert_eq!(report.groups.len(), 1);

    let resolved = &report.groups[0];
    assert_eq!(resolved.price.action, SuggestedAction::ExcludeOutliersThenAccept);
    assert_eq!(resolved.price.canonical_price, Some(25.99));
    assert_eq!(resolved.price.prices.len(), 3);
    assert_eq!(resolved.resolved.id.as_str(), "a");
    assert_eq!(resolved.resolved.price, Some(25.99));
    assert_eq!(resolved.group.resolution, Resolution::AutoMerge);
}

#[test]
fn price_policy_cases() {
    let resolver = PriceVariationResolver::default();
    let analyze = |prices: &[f64]| {
        let records: Vec<Record> = prices
            .iter()
            .enumerate()
            .map(|(i, price)| dated(&format!("p{i}"), "Elijah Craig Small Batch", i as i64).with_price(*price))
            .collect();
        let refs: Vec<&Record> = records.iter().collect();
        resolver.analyze_members(&refs).unwrap()
    };

    let close = analyze(&[29.99, 32.99, 27.99]);
    assert_eq!(close.action, SuggestedAction::AcceptAverage);
    assert_eq!(close.canonical_price, Some(30.32));

    let moderate = analyze(&[79.99, 149.99]);
    assert_eq!(moderate.action, SuggestedAction::AcceptAverage);

    let outlier = analyze(&[24.99, 89.99, 26.99]);
    assert_eq!(outlier.action, SuggestedAction::ExcludeOutliersThenAccept);
    assert_eq!(outlier.canonical_price, Some(25.99));
}

#[test]
fn raising_same_brand_threshold_never_adds_groups() {
    let branded = |id: &str, name: &str, brand: &str, day: i64| dated(id, name, day).with_brand(brand);
    let records = vec![
        branded("bl-1", "Blanton's Original Single Barrel", "Blanton's", 0),
        branded("bl-2", "Blantons Single Barrel Bourbon", "BLANTONS", 1),
        branded("fr-1", "Four Roses Small Batch", "Four Roses", 2),
        branded("fr-2", "Four Roses Small Batch 750ml", "Four Roses", 3),
        branded("er-1", "Eagle Rare 10 Year", "Eagle Rare", 4),
        branded("er-2", "Eagle Rare 17 Year", "Eagle Rare", 5),
        branded("wl-1", "Weller Special Reserve", "Weller", 6),
        branded("wl-2", "W.L. Weller Special Reserve", "W.L. Weller", 7),
    ];

    let counts: Vec<usize> = [0.5, 0.6, 0.7, 0.8, 0.9, 1.0]
        .into_iter()
        .map(|same_brand| {
            let mut config = DedupConfig::default();
            config.thresholds.same_brand = same_brand;
            orchestrator(config).run(&records).groups.len()
        })
        .collect();

    assert!(counts.windows(2).all(|w| w[0] >= w[1]), "{counts:?}");
    assert!(counts[0] >= 3, "{counts:?}");
    assert_eq!(counts[counts.len() - 1], 1, "{counts:?}");
}

#[test]
fn large_batches_fall_back_to_exact_keys() {
    let mut records = Vec::new();
    for i in 0..30 {
        records.push(dated(&format!("x{i}"), &format!("Label {i} Reserve"), i));
    }
    records.push(dated("bt-1", "Buffalo Trace Bourbon 750ml", 40));
    records.push(dated("bt-2", "Buffalo Trace Bourbon Sample", 41));

    let mut config = DedupConfig::default();
    config.performance.fuzzy_match_limit = 10;
    let report = orchestrator(config).run(&records);

    assert!(report.stages.fuzzy_skipped_over_limit);
    assert!(report.blocking.is_none());
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].group.members.len(), 2);
}

#[test]
fn exact_stage_ignores_input_order_when_the_first_record_has_another_brand() {
    let other = dated("sz", "Buffalo Trace Bourbon", 0).with_brand("Sazerac");
    let bottle = dated("bt-750", "Buffalo Trace Bourbon 750ml", 1).with_brand("Buffalo Trace");
    let sample = dated("bt-sample", "Buffalo Trace Bourbon Sample", 2).with_brand("Buffalo Trace");

    let over_limit = {
        let mut config = DedupConfig::default();
        config.performance.fuzzy_match_limit = 1;
        config
    };
    let exact_only = DedupConfig {
        run_fuzzy_match: false,
        ..DedupConfig::default()
    };

    for config in [over_limit, exact_only] {
        for records in [
            vec![other.clone(), bottle.clone(), sample.clone()],
            vec![bottle.clone(), sample.clone(), other.clone()],
        ] {
            let report = orchestrator(config.clone()).run(&records);
            assert!(report.stages.exact);
            assert!(!report.stages.fuzzy);
            assert_eq!(report.groups.len(), 1);
            let members: Vec<&str> = report.groups[0].group.members.iter().map(|m| m.as_str()).collect();
            assert_eq!(members, ["bt-750", "bt-sample"]);
        }
    }
}
