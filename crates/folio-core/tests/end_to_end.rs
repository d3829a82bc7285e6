//! Whole-pipeline tests against the in-process store.

mod common;

use common::{capture_events, categorical, Workspace};
use folio_common::{FieldDefinition, FieldKind};
use folio_core::dictionary::read_dictionary;
use folio_core::{AnchorStore, CompileRequest, Compiler, Registry};
use folio_store::{MemoryStore, OrderBy, RelationalStore, RowSet, Select, Statement, Value};

const SCENARIO: [&str; 3] = [
    r#"{"filename":"a.txt","genre":"fiction"}"#,
    r#"{"filename":"b.txt","genre":"fiction"}"#,
    r#"{"filename":"c.txt","genre":"nonfiction"}"#,
];

fn rows(store: &dyn RelationalStore, table: &str, order: &str) -> RowSet {
    store
        .execute(&Statement::Select(
            Select::from(table).order_by(OrderBy::asc(order)),
        ))
        .unwrap()
}

fn dictionary(store: &dyn RelationalStore, field: &str) -> Vec<(String, u32)> {
    read_dictionary(store, field)
        .unwrap()
        .into_iter()
        .map(|e| (e.value, e.id))
        .collect()
}

#[test]
fn test_scenario_builds_both_tiers() {
    let ws = Workspace::new();
    let input = ws.input("books.jsonl", &SCENARIO);
    let store = MemoryStore::new();
    let mut anchors = AnchorStore::open_in_memory(24).unwrap();

    let report = Compiler::new(&ws.cfg, &store)
        .compile(
            &CompileRequest::new(&input).with_schema(vec![categorical("genre", true)]),
            &mut anchors,
        )
        .unwrap();
    assert_eq!(report.ingest.retained, 3);

    assert_eq!(
        dictionary(&store, "genre"),
        vec![("fiction".into(), 0), ("nonfiction".into(), 1)]
    );

    let catalog = rows(&store, "catalog", "bookid");
    let anchors_seen: Vec<_> = catalog.rows.iter().map(|r| r[0].clone()).collect();
    assert_eq!(anchors_seen, vec![Value::Int(0), Value::Int(1), Value::Int(2)]);

    assert_eq!(store.row_count("genre_lookup").unwrap(), 2);
    assert_eq!(store.row_count("fastcat").unwrap(), 3);

    let heap = rows(&store, "fastcat", "bookid");
    let ids: Vec<_> = heap
        .rows
        .iter()
        .map(|r| heap.columns.iter().position(|c| c == "genre__id").map(|i| r[i].clone()))
        .collect();
    assert_eq!(
        ids,
        vec![Some(Value::Int(0)), Some(Value::Int(0)), Some(Value::Int(1))]
    );
}

#[test]
fn test_incremental_import_keeps_identifiers() {
    let ws = Workspace::new();
    let store = MemoryStore::new();
    let mut anchors = AnchorStore::open_in_memory(24).unwrap();
    let schema = vec![categorical("genre", true)];
    let compiler = Compiler::new(&ws.cfg, &store);

    let first = ws.input("batch1.jsonl", &SCENARIO);
    compiler
        .compile(&CompileRequest::new(&first).with_schema(schema.clone()), &mut anchors)
        .unwrap();

    let second = ws.input(
        "batch2.jsonl",
        &[
            r#"{"filename":"d.txt","genre":"poetry"}"#,
            r#"{"filename":"e.txt","genre":"nonfiction"}"#,
        ],
    );
    let report = compiler
        .compile(&CompileRequest::new(&second).with_schema(schema), &mut anchors)
        .unwrap();
    assert_eq!(report.ingest.minted, 2);

    let dict = read_dictionary(&store, "genre").unwrap();
    let summary: Vec<_> = dict.iter().map(|e| (e.value.as_str(), e.id, e.count)).collect();
    assert_eq!(
        summary,
        vec![("fiction", 0, 2), ("nonfiction", 1, 2), ("poetry", 2, 1)]
    );
    assert_eq!(store.row_count("catalog").unwrap(), 5);
    assert_eq!(store.row_count("fastcat").unwrap(), 5);
    assert_eq!(anchors.lookup("e.txt").unwrap().map(|a| a.0), Some(4));
}

#[test]
fn test_rehydration_reproduces_volatile_tier() {
    let ws = Workspace::new();
    let input = ws.input(
        "books.jsonl",
        &[
            r#"{"filename":"a.txt","genre":"fiction","tags":["sea","whale"],"year":1851}"#,
            r#"{"filename":"b.txt","genre":"fiction","tags":["sea"],"year":1900}"#,
            r#"{"filename":"c.txt","genre":"nonfiction","tags":"land","year":1901}"#,
        ],
    );
    let store = MemoryStore::new();
    let mut anchors = AnchorStore::open_in_memory(24).unwrap();
    Compiler::new(&ws.cfg, &store)
        .compile(
            &CompileRequest::new(&input).with_schema(vec![
                categorical("genre", true),
                categorical("tags", false),
                FieldDefinition::new("year", FieldKind::Time, true),
            ]),
            &mut anchors,
        )
        .unwrap();

    let volatile = [
        ("genre_lookup", "genre__id"),
        ("tags_lookup", "tags__id"),
        ("tags_heap", "bookid"),
        ("fastcat", "bookid"),
    ];
    let before: Vec<_> = volatile.iter().map(|(t, o)| rows(&store, t, o)).collect();

    store.restart().unwrap();
    for (table, _) in &volatile {
        assert_eq!(store.row_count(table).unwrap(), 0, "{table} survived restart");
    }

    let report = Registry::new(&store).rehydrate(false).unwrap();
    assert!(report.intact.contains(&"genre__id".to_string()));
    for (table, _) in &volatile {
        assert!(report.rebuilt.contains(&table.to_string()), "{table} not rebuilt");
    }

    let after: Vec<_> = volatile.iter().map(|(t, o)| rows(&store, t, o)).collect();
    assert_eq!(before, after);

    // Nothing left to do on a second pass.
    let again = Registry::new(&store).rehydrate(false).unwrap();
    assert!(again.rebuilt.is_empty());
}

#[test]
fn test_rehydration_after_reopening_snapshot() {
    let ws = Workspace::new();
    let input = ws.input("books.jsonl", &SCENARIO);
    let snapshot = ws.cfg.snapshot_path();
    let before = {
        let store = MemoryStore::open(&snapshot).unwrap();
        let mut anchors = AnchorStore::open(&ws.cfg.anchor_store_path(), 24).unwrap();
        Compiler::new(&ws.cfg, &store)
            .compile(
                &CompileRequest::new(&input).with_schema(vec![categorical("genre", true)]),
                &mut anchors,
            )
            .unwrap();
        rows(&store, "genre_lookup", "genre__id")
    };

    let reopened = MemoryStore::open(&snapshot).unwrap();
    assert!(reopened.row_count("genre_lookup").is_err());
    assert_eq!(reopened.row_count("catalog").unwrap(), 3);

    Registry::new(&reopened).rehydrate(false).unwrap();
    assert_eq!(rows(&reopened, "genre_lookup", "genre__id"), before);
    assert_eq!(reopened.row_count("fastcat").unwrap(), 3);
}

#[test]
fn test_malformed_record_skipped_with_one_warning() {
    let ws = Workspace::new();
    let input = ws.input(
        "books.jsonl",
        &[SCENARIO[0], "{\"filename\": \"broken.txt\", ", SCENARIO[1], SCENARIO[2]],
    );
    let store = MemoryStore::new();
    let mut anchors = AnchorStore::open_in_memory(24).unwrap();

    let (events, _guard) = capture_events();
    let report = Compiler::new(&ws.cfg, &store)
        .compile(
            &CompileRequest::new(&input).with_schema(vec![categorical("genre", true)]),
            &mut anchors,
        )
        .unwrap();

    assert_eq!(report.ingest.malformed, 1);
    assert_eq!(store.row_count("catalog").unwrap(), 3);
    let warnings = events.warnings();
    assert_eq!(warnings.len(), 1, "unexpected warnings: {warnings:?}");
    assert!(warnings[0].message.contains("malformed"));
    assert_eq!(warnings[0].fields.get("line").map(String::as_str), Some("2"));
}

#[test]
fn test_secondary_import_joins_existing_anchors() {
    let ws = Workspace::new();
    let store = MemoryStore::new();
    let mut anchors = AnchorStore::open_in_memory(24).unwrap();
    let compiler = Compiler::new(&ws.cfg, &store);
    compiler
        .compile(
            &CompileRequest::new(ws.input("books.jsonl", &SCENARIO))
                .with_schema(vec![categorical("genre", true)]),
            &mut anchors,
        )
        .unwrap();

    let reviews = ws.input(
        "reviews.jsonl",
        &[
            r#"{"filename":"b.txt","stars":4}"#,
            r#"{"filename":"zzz.txt","stars":1}"#,
        ],
    );
    let report = compiler
        .compile(
            &CompileRequest::new(&reviews)
                .with_set("reviews")
                .with_schema(vec![FieldDefinition::new("stars", FieldKind::Integer, true)]),
            &mut anchors,
        )
        .unwrap();

    assert_eq!(report.ingest.unknown_anchor, 1);
    assert_eq!(report.ingest.minted, 0);
    assert_eq!(report.heap_table, "reviewsheap");
    let heap = rows(&store, "reviewsheap", "bookid");
    assert_eq!(heap.rows, vec![vec![Value::Int(1), Value::Int(4)]]);
    assert_eq!(anchors.len().unwrap(), 3);
}

#[test]
fn test_second_inferred_batch_keeps_registered_types() {
    let ws = Workspace::new();
    let store = MemoryStore::new();
    let mut anchors = AnchorStore::open_in_memory(24).unwrap();
    let compiler = Compiler::new(&ws.cfg, &store);

    let first: Vec<String> = (0..9)
        .map(|i| format!(r#"{{"filename":"{i}.txt","genre":"g{}"}}"#, i % 3))
        .collect();
    let first: Vec<&str> = first.iter().map(String::as_str).collect();
    compiler
        .compile(&CompileRequest::new(ws.input("batch1.jsonl", &first)), &mut anchors)
        .unwrap();

    // Too few repeats to look categorical on its own.
    let second = ws.input(
        "batch2.jsonl",
        &[
            r#"{"filename":"j.txt","genre":"poetry"}"#,
            r#"{"filename":"k.txt","genre":"g0"}"#,
        ],
    );
    let report = compiler
        .compile(&CompileRequest::new(&second), &mut anchors)
        .unwrap();
    let kinds: Vec<_> = report.fields.iter().map(|f| (f.dbname.as_str(), f.datatype)).collect();
    assert_eq!(kinds, vec![("genre", FieldKind::Categorical)]);

    let dict = read_dictionary(&store, "genre").unwrap();
    let summary: Vec<_> = dict.iter().map(|e| (e.value.as_str(), e.id, e.count)).collect();
    assert_eq!(
        summary,
        vec![("g0", 0, 4), ("g1", 1, 3), ("g2", 2, 3), ("poetry", 3, 1)]
    );

    let heap = rows(&store, "fastcat", "bookid");
    assert!(heap.columns.contains(&"genre__id".to_string()));
    assert_eq!(heap.rows.len(), 11);

    let records = Registry::new(&store).fields().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].datatype, FieldKind::Categorical);
    assert_eq!(records[0].status, "public");
}

#[test]
fn test_recompiling_same_input_writes_documents_once() {
    let ws = Workspace::new();
    let input = ws.input(
        "books.jsonl",
        &[
            r#"{"filename":"a.txt","genre":"fiction","tags":["sea","whale"]}"#,
            r#"{"filename":"b.txt","genre":"fiction","tags":["sea"]}"#,
        ],
    );
    let store = MemoryStore::new();
    let mut anchors = AnchorStore::open_in_memory(24).unwrap();
    let compiler = Compiler::new(&ws.cfg, &store);
    let request = CompileRequest::new(&input)
        .with_schema(vec![categorical("genre", true), categorical("tags", false)]);

    compiler.compile(&request, &mut anchors).unwrap();
    let second = compiler.compile(&request, &mut anchors).unwrap();

    assert_eq!(second.ingest.already_loaded, 2);
    assert_eq!(second.ingest.retained, 0);
    assert_eq!(store.row_count("catalog").unwrap(), 2);
    assert_eq!(store.row_count("tags_disk").unwrap(), 3);
    assert_eq!(store.row_count("tags_heap").unwrap(), 3);

    let counts = |field: &str| -> Vec<(String, u64)> {
        read_dictionary(&store, field)
            .unwrap()
            .into_iter()
            .map(|e| (e.value, e.count))
            .collect()
    };
    assert_eq!(counts("genre"), vec![("fiction".to_string(), 2)]);
    assert_eq!(
        counts("tags"),
        vec![("sea".to_string(), 2), ("whale".to_string(), 1)]
    );
}

#[test]
fn test_secondary_set_cannot_take_over_primary_field() {
    let ws = Workspace::new();
    let store = MemoryStore::new();
    let mut anchors = AnchorStore::open_in_memory(24).unwrap();
    let compiler = Compiler::new(&ws.cfg, &store);
    compiler
        .compile(
            &CompileRequest::new(ws.input("books.jsonl", &SCENARIO))
                .with_schema(vec![categorical("genre", true)]),
            &mut anchors,
        )
        .unwrap();
    let before = read_dictionary(&store, "genre").unwrap();

    let reviews = ws.input(
        "reviews.jsonl",
        &[r#"{"filename":"a.txt","genre":"fiction","stars":4}"#],
    );
    let err = compiler
        .compile(
            &CompileRequest::new(&reviews)
                .with_set("reviews")
                .with_schema(vec![categorical("genre", true)]),
            &mut anchors,
        )
        .unwrap_err();
    assert_eq!(err.code(), 25);

    // Inferred, the shared name is left out and the rest still compiles.
    let report = compiler
        .compile(&CompileRequest::new(&reviews).with_set("reviews"), &mut anchors)
        .unwrap();
    let names: Vec<_> = report.fields.iter().map(|f| f.dbname.as_str()).collect();
    assert_eq!(names, vec!["stars"]);

    assert_eq!(read_dictionary(&store, "genre").unwrap(), before);
    let registry = Registry::new(&store);
    assert_eq!(registry.owner_of("genre").unwrap().as_deref(), Some("catalog"));
    assert_eq!(registry.owner_of("stars").unwrap().as_deref(), Some("reviews"));
}

#[test]
fn test_inference_skips_keys_that_cannot_be_fields() {
    let ws = Workspace::new();
    let input = ws.input(
        "books.jsonl",
        &[
            r#"{"filename":"a.txt","first-author":"Melville","pages":635}"#,
            r#"{"filename":"b.txt","first-author":"Austen","pages":279}"#,
        ],
    );
    let store = MemoryStore::new();
    let mut anchors = AnchorStore::open_in_memory(24).unwrap();

    let (events, _guard) = capture_events();
    let report = Compiler::new(&ws.cfg, &store)
        .compile(&CompileRequest::new(&input), &mut anchors)
        .unwrap();

    let names: Vec<_> = report.fields.iter().map(|f| f.dbname.as_str()).collect();
    assert_eq!(names, vec!["pages"]);
    assert_eq!(report.ingest.retained, 2);
    let skipped = events.warnings_containing("cannot be a field");
    assert_eq!(skipped.len(), 1);
    assert_eq!(
        skipped[0].fields.get("field").map(String::as_str),
        Some("first-author")
    );
}
