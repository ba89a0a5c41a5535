//! End-to-end variant runs on small hand-checked networks.

use metrix_core::{testkit, Configuration};
use metrix_engine::{VariantEngine, VariantStatus};
use metrix_scenarios::{parse_parades, parse_variants};

fn no_parades() -> metrix_scenarios::ParadeSet {
    parse_parades("NB;0\n").unwrap()
}

#[test]
fn test_two_node_dispatch_serves_the_load() {
    let mut engine = VariantEngine::new(Configuration::default(), &testkit::two_node_input()).unwrap();
    let variants = parse_variants("NT;1\n0\n").unwrap();
    engine.prepare(&variants, &no_parades()).unwrap();
    let reports = engine.run(&variants);

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, VariantStatus::Solved);
    let outcome = reports[0].outcome.as_ref().unwrap();
    assert_eq!(outcome.zone_results.len(), 1);
    assert!((outcome.zone_results[0].generation_mw - 100.0).abs() < 1e-3);
    assert!((outcome.zone_results[0].load_mw - 100.0).abs() < 1e-6);
    assert!(outcome.shed_mw.abs() < 1e-6);
    assert!(outcome.violations.is_empty());
}

#[test]
fn test_ring_single_outage_forces_shedding() {
    // 100 MW from C to A around the ring; the AB contingency routes
    // everything over CA, whose 90 MW limit forces 10 MW of shedding.
    let mut engine =
        VariantEngine::new(Configuration::default(), &testkit::three_node_ring_input()).unwrap();
    let variants = parse_variants(
        "NT;1\n\
         0;QATI00MN;2;CA;90;BC;90\n\
         0;QATI5MNS;2;CA;90;BC;90\n",
    )
    .unwrap();
    engine.prepare(&variants, &no_parades()).unwrap();
    let reports = engine.run(&variants);

    assert_eq!(reports[0].status, VariantStatus::Solved);
    let outcome = reports[0].outcome.as_ref().unwrap();
    assert!(
        (outcome.shed_mw - 10.0).abs() < 1e-2,
        "shed {}",
        outcome.shed_mw
    );
    assert!(outcome.micro_iterations >= 2, "contingency rows were generated");
}

#[test]
fn test_phase_shifter_relieves_the_ring() {
    // Without the shifter the direct branch CA carries two thirds of the
    // 100 MW; its 60 MW basecase limit is met by shifting flow onto the
    // longer path instead of shedding.
    let mut engine =
        VariantEngine::new(Configuration::default(), &testkit::ring_with_shifter_input()).unwrap();
    let variants = parse_variants(
        "NT;1\n\
         0;QATI00MN;2;CA;60;BC;60\n\
         0;QATI5MNS;2;CA;200;BC;200\n",
    )
    .unwrap();
    engine.prepare(&variants, &no_parades()).unwrap();
    let reports = engine.run(&variants);

    assert_eq!(reports[0].status, VariantStatus::Solved);
    let outcome = reports[0].outcome.as_ref().unwrap();
    assert!(outcome.shed_mw.abs() < 1e-3, "no shedding, shed {}", outcome.shed_mw);
    let ca = outcome
        .monitor_flows
        .iter()
        .find(|f| f.element == "CA")
        .unwrap();
    assert!(ca.flow_mw <= 60.0 + 1e-3, "CA flow {}", ca.flow_mw);
    assert!(outcome.violations.is_empty());
}

#[test]
fn test_emulated_hvdc_limit_binds_after_outage() {
    // Losing the AC tie leaves the emulated link as the only path; its
    // 100 MW forward limit caps the 120 MW transfer, shedding the rest.
    let (config, _) = testkit::emulated_hvdc_pair();
    let mut engine = VariantEngine::new(config, &testkit::emulated_hvdc_pair_input()).unwrap();
    let variants = parse_variants(
        "NT;1\n\
         0;CONELE;1;LOAD_D;120\n\
         0;PRODIM;1;G_A;120\n",
    )
    .unwrap();
    engine.prepare(&variants, &no_parades()).unwrap();
    let reports = engine.run(&variants);

    assert_eq!(reports[0].status, VariantStatus::Solved);
    let outcome = reports[0].outcome.as_ref().unwrap();
    assert!(
        (outcome.shed_mw - 20.0).abs() < 1e-2,
        "shed {}",
        outcome.shed_mw
    );
}

#[test]
fn test_reset_round_trip_makes_variants_reproducible() {
    // Two identical variants must produce identical outcomes: the reset
    // protocol restores the base state in between.
    let mut engine =
        VariantEngine::new(Configuration::default(), &testkit::three_node_ring_input()).unwrap();
    let variants = parse_variants(
        "NT;2\n\
         0;PRODIM;1;G_C;130\n\
         0;CONELE;1;LOAD_A;130\n\
         1;PRODIM;1;G_C;130\n\
         1;CONELE;1;LOAD_A;130\n\
         2\n",
    )
    .unwrap();
    engine.prepare(&variants, &no_parades()).unwrap();
    let reports = engine.run(&variants);

    assert_eq!(reports.len(), 3);
    let first = reports[0].outcome.as_ref().unwrap();
    let second = reports[1].outcome.as_ref().unwrap();
    assert_eq!(first.zone_results[0].generation_mw, second.zone_results[0].generation_mw);
    assert_eq!(first.zone_results[0].load_mw, second.zone_results[0].load_mw);
    assert_eq!(first.shed_mw, second.shed_mw);
    // The empty third variant sees the untouched base state.
    let third = reports[2].outcome.as_ref().unwrap();
    assert!((third.zone_results[0].load_mw - 100.0).abs() < 1e-9);
}

#[test]
fn test_do_nothing_parade_exposed_with_user_parade() {
    let mut engine =
        VariantEngine::new(Configuration::default(), &testkit::three_node_ring_input()).unwrap();
    let variants = parse_variants("NT;1\n0\n").unwrap();
    let parades = parse_parades("NB;1\nAB;1;+AB2\n").unwrap();
    engine.prepare(&variants, &parades).unwrap();

    let parent = engine.network.outage_index["AB"];
    let parades = &engine.network.outage(parent).parades;
    assert_eq!(parades.len(), 2);
    assert_eq!(engine.network.outage(parades[0]).name, "AB_NRF");
    // The synthetic parade inherits the parent's pocket (none here).
    assert!(engine.network.outage(parades[0]).pocket.is_none());
}

#[test]
fn test_unknown_region_skips_variant_and_continues() {
    let mut engine =
        VariantEngine::new(Configuration::default(), &testkit::three_node_ring_input()).unwrap();
    let variants = parse_variants(
        "NT;2\n\
         0;ECHANGP;1;NO_REGION;10\n\
         1\n",
    )
    .unwrap();
    engine.prepare(&variants, &no_parades()).unwrap();
    let reports = engine.run(&variants);

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].status, VariantStatus::Skipped);
    assert_eq!(reports[1].status, VariantStatus::Solved);
}

#[test]
fn test_first_variant_and_count_window() {
    let config = Configuration {
        first_variant: 1,
        variant_count: 1,
        ..Configuration::default()
    };
    let mut engine = VariantEngine::new(config, &testkit::three_node_ring_input()).unwrap();
    let variants = parse_variants("NT;3\n0\n1\n2\n").unwrap();
    engine.prepare(&variants, &no_parades()).unwrap();
    let reports = engine.run(&variants);

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].variant, 1);
}

#[test]
fn test_topology_variant_invalidates_contingency_then_recovers() {
    // Variant 0 removes BC, under which the AB contingency would island
    // node B: the contingency is skipped for that variant only, and
    // variant 1 sees it valid again.
    let mut engine =
        VariantEngine::new(Configuration::default(), &testkit::three_node_ring_input()).unwrap();
    let variants = parse_variants(
        "NT;2\n\
         0;QUADIN;1;BC\n\
         1\n",
    )
    .unwrap();
    engine.prepare(&variants, &no_parades()).unwrap();
    let reports = engine.run(&variants);

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].status, VariantStatus::Solved);
    assert_eq!(reports[1].status, VariantStatus::Solved);
    let ab = engine.network.outage_index["AB"];
    assert!(engine.network.outage(ab).valid);
    assert!(engine.network.branches.iter().all(|b| {
        b.from_closed == b.from_closed_base && b.to_closed == b.to_closed_base
    }));
}
