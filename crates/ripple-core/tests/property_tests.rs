//! # Property-Based Tests
//!
//! Determinism and incrementality invariants, checked with proptest.

use proptest::collection::btree_map;
use proptest::prelude::*;
use ripple_core::{
    CancellationToken, Driver, EntryState, GraphBuilder, RootInputs, SinkOutputs, Values,
};
use std::collections::BTreeMap;

struct Fixture {
    driver: Driver,
    words: Values<String>,
    upper: Values<String>,
}

/// roots -> words (fan-out) -> upper -> sink, plus a diagnostic branch.
fn fixture() -> Fixture {
    let mut graph = GraphBuilder::new();
    let input = graph.roots();
    let words = graph.select_many("words", input, |ctx, s: &String| {
        for word in s.split_whitespace() {
            ctx.checkpoint()?;
            ctx.emit(word.to_string());
        }
        Ok(())
    });
    let upper = graph.select("upper", words, |w: &String| w.to_uppercase());
    graph.host_output("emit", upper, |ctx, w: &String| {
        let key = ctx.input_key().to_string();
        ctx.add_output(key, w.clone());
        Ok(())
    });
    graph.diagnostic_output("long", input, |ctx, s: &String| {
        if s.len() > 6 {
            ctx.report(ripple_core::Severity::Info, format!("{} bytes", s.len()));
        }
        Ok(())
    });
    Fixture {
        driver: Driver::new(graph.build().expect("build")),
        words,
        upper,
    }
}

fn to_roots(map: &BTreeMap<String, String>) -> RootInputs {
    RootInputs::from_pairs(map.iter().map(|(k, v)| (k.clone(), v.clone()))).expect("roots")
}

fn run(driver: &mut Driver, map: &BTreeMap<String, String>) -> SinkOutputs {
    let outcome = driver
        .run_generation(&to_roots(map), &CancellationToken::new())
        .expect("generation");
    outcome.report().map(|r| r.outputs.clone()).unwrap_or_default()
}

fn inputs() -> impl Strategy<Value = BTreeMap<String, String>> {
    btree_map("[a-f]{1,2}", "[a-z ]{0,10}", 0..8)
}

proptest! {
    /// Same inputs from generation 0 produce identical outputs and states.
    #[test]
    fn determinism(map in inputs()) {
        let mut a = fixture();
        let mut b = fixture();
        prop_assert_eq!(run(&mut a.driver, &map), run(&mut b.driver, &map));

        let ta = a.driver.table(a.upper).expect("table");
        let tb = b.driver.table(b.upper).expect("table");
        prop_assert_eq!(ta.states(), tb.states());
        prop_assert!(ta.states().iter().all(|s| *s == EntryState::Added));
    }

    /// An incremental generation yields the same outputs as a from-scratch one.
    #[test]
    fn incremental_matches_from_scratch(first in inputs(), second in inputs()) {
        let mut incremental = fixture();
        run(&mut incremental.driver, &first);
        let observed = run(&mut incremental.driver, &second);

        let mut scratch = fixture();
        let expected = run(&mut scratch.driver, &second);
        prop_assert_eq!(observed, expected);
    }

    /// Cached entries hold values equal to the previous generation's, shared by reference.
    #[test]
    fn cache_soundness(first in inputs(), second in inputs()) {
        let mut f = fixture();
        run(&mut f.driver, &first);
        let before = f.driver.table(f.upper).expect("table");
        run(&mut f.driver, &second);
        let after = f.driver.table(f.upper).expect("table");

        for entry in after.live().filter(|e| e.state() == EntryState::Cached) {
            let previous = before.get(entry.key());
            prop_assert!(previous.is_some());
            if let Some(previous) = previous {
                prop_assert_eq!(previous.last_value(), entry.last_value());
                prop_assert!(std::sync::Arc::ptr_eq(previous.value_arc(), entry.value_arc()));
            }
        }
    }

    /// Entries of removed roots are tombstoned for one generation, then gone.
    #[test]
    fn removal_correctness(first in inputs(), second in inputs()) {
        let mut f = fixture();
        run(&mut f.driver, &first);
        run(&mut f.driver, &second);
        let removed: Vec<&String> = first.keys().filter(|k| !second.contains_key(*k)).collect();

        let table = f.driver.table(f.upper).expect("table");
        for entry in table.entries() {
            let root = entry.key().root_key().unwrap_or_default().to_string();
            if removed.contains(&&root) {
                prop_assert_eq!(entry.state(), EntryState::Removed);
            }
        }

        run(&mut f.driver, &second);
        let table = f.driver.table(f.upper).expect("table");
        for entry in table.entries() {
            let root = entry.key().root_key().unwrap_or_default().to_string();
            prop_assert!(!removed.contains(&&root));
        }
    }

    /// Fan-out keeps emission order for inputs that stay cached.
    #[test]
    fn fan_out_order_preserved(map in inputs(), extra in "[a-z ]{0,10}") {
        let mut f = fixture();
        run(&mut f.driver, &map);
        let mut edited = map.clone();
        edited.insert("zz".to_string(), extra);
        run(&mut f.driver, &edited);

        let table = f.driver.table(f.words).expect("table");
        for (key, text) in &map {
            let produced: Vec<&String> = table
                .live()
                .filter(|e| e.key().root_key() == Some(key.as_str()))
                .map(|e| e.last_value())
                .collect();
            let expected: Vec<&str> = text.split_whitespace().collect();
            prop_assert_eq!(produced, expected);
        }
    }
}
