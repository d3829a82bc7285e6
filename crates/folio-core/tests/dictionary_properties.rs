//! Property tests for dictionary construction.

use folio_core::dictionary::{build_procedure, read_dictionary, DictionaryEntry, IdWidth};
use folio_store::{
    ColumnSpec, ColumnType, Engine, MemoryStore, RelationalStore, Statement, TableDef, Value,
};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

fn append(store: &MemoryStore, values: &[String]) {
    store
        .define_table(
            &TableDef::new("genre_disk", Engine::Durable)
                .column(ColumnSpec::new("bookid", ColumnType::UInt32))
                .column(ColumnSpec::new("genre", ColumnType::Varchar(255))),
        )
        .unwrap();
    let start = store.row_count("genre_disk").unwrap() as i64;
    store
        .execute(&Statement::Insert {
            table: "genre_disk".into(),
            columns: vec!["bookid".into(), "genre".into()],
            rows: values
                .iter()
                .enumerate()
                .map(|(i, v)| vec![Value::Int(start + i as i64), Value::text(v.as_str())])
                .collect(),
        })
        .unwrap();
}

fn build(store: &MemoryStore) -> Vec<DictionaryEntry> {
    store
        .run(&build_procedure("genre", "genre_disk", 255))
        .unwrap();
    read_dictionary(store, "genre").unwrap()
}

fn values_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-f]{1,2}", 1..200)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn independent_builds_agree(values in values_strategy()) {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        append(&a, &values);
        append(&b, &values);
        prop_assert_eq!(build(&a), build(&b));
    }

    #[test]
    fn initial_build_orders_by_descending_count(values in values_strategy()) {
        let store = MemoryStore::new();
        append(&store, &values);
        let dict = build(&store);

        let mut counts: HashMap<&str, u64> = HashMap::new();
        let mut first_seen: Vec<&str> = Vec::new();
        for v in &values {
            let n = counts.entry(v.as_str()).or_insert(0);
            if *n == 0 {
                first_seen.push(v.as_str());
            }
            *n += 1;
        }

        prop_assert_eq!(dict.len(), counts.len());
        for (expected_id, entry) in dict.iter().enumerate() {
            prop_assert_eq!(entry.id as usize, expected_id);
            prop_assert_eq!(entry.count, counts[entry.value.as_str()]);
        }
        for pair in dict.windows(2) {
            prop_assert!(pair[0].count >= pair[1].count);
            if pair[0].count == pair[1].count {
                let pos = |v: &str| first_seen.iter().position(|s| *s == v);
                prop_assert!(pos(&pair[0].value) < pos(&pair[1].value));
            }
        }
    }

    #[test]
    fn incremental_build_never_moves_identifiers(
        first in values_strategy(),
        second in values_strategy(),
    ) {
        let store = MemoryStore::new();
        append(&store, &first);
        let before = build(&store);
        append(&store, &second);
        let after = build(&store);

        for old in &before {
            let now = after.iter().find(|e| e.value == old.value);
            prop_assert_eq!(now.map(|e| e.id), Some(old.id));
        }
        let known: HashSet<&str> = first.iter().map(String::as_str).collect();
        let new_values: HashSet<&str> = second
            .iter()
            .map(String::as_str)
            .filter(|v| !known.contains(v))
            .collect();
        prop_assert_eq!(after.len(), before.len() + new_values.len());
        let ids: Vec<u32> = after.iter().map(|e| e.id).collect();
        prop_assert_eq!(ids, (0..after.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn width_is_monotonic_and_sufficient(a in 0u64..=u32::MAX as u64, b in 0u64..=u32::MAX as u64) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(IdWidth::for_cardinality(lo) <= IdWidth::for_cardinality(hi));

        let bits = IdWidth::for_cardinality(hi).bits();
        prop_assert!(bits == 32 || hi < (1u64 << bits));
    }
}

#[test]
fn width_boundaries() {
    let widths: Vec<u32> = [254, 255, 256, 65_535, 65_536]
        .into_iter()
        .map(|n| IdWidth::for_cardinality(n).bits())
        .collect();
    assert_eq!(widths, vec![8, 8, 16, 16, 24]);
}
