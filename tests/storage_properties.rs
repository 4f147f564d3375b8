//! Storage-level property tests: row round-trips through pages, buffer
//! transparency at the table-file layer, and constraint failures leaving
//! storage untouched.

use std::sync::{Arc, Mutex};

use minidb::executor::{EngineConfig, ExecutionEngine};
use minidb::storage::{
    decode_row, encode_row, BufferPool, EvictionPolicy, Page, PageManager, Row, TableFile, Value,
};

fn pool(dir: &std::path::Path, capacity: usize) -> Arc<Mutex<BufferPool>> {
    let disk = PageManager::new(dir);
    Arc::new(Mutex::new(BufferPool::new(
        capacity,
        EvictionPolicy::Lru,
        disk,
    )))
}

fn sample_rows() -> Vec<Row> {
    vec![
        vec![Value::Int(1), Value::from("plain"), Value::Float(1.25)],
        vec![Value::Int(-42), Value::from(""), Value::Null],
        vec![Value::Int(i64::MAX), Value::from("it's quoted"), Value::Float(-0.5)],
        vec![Value::Null, Value::from("ünïcodé"), Value::Float(1e9)],
    ]
}

#[test]
fn page_round_trip_is_byte_identical() {
    let mut page = Page::new(0);

    let encoded: Vec<Vec<u8>> = sample_rows().iter().map(|r| encode_row(r)).collect();
    let slots: Vec<u16> = encoded
        .iter()
        .map(|bytes| page.insert_row(bytes).unwrap())
        .collect();

    for (slot, bytes) in slots.iter().zip(&encoded) {
        assert_eq!(page.read_row(*slot), Some(bytes.as_slice()));
    }

    // Through the full image cycle as well.
    let restored = Page::from_bytes(0, page.as_bytes()).unwrap();
    for (slot, row) in slots.iter().zip(sample_rows()) {
        let bytes = restored.read_row(*slot).unwrap();
        assert_eq!(decode_row(bytes).unwrap(), row);
    }
}

#[test]
fn table_file_round_trip_survives_eviction_pressure() {
    let dir = tempfile::tempdir().unwrap();
    // Single frame: every page access evicts the previous page.
    let pool = pool(dir.path(), 1);
    let mut file = TableFile::new("t", vec![], pool);

    let filler = "row payload ".repeat(40);
    let mut expected = Vec::new();
    for i in 0..30 {
        let row = vec![Value::Int(i), Value::from(filler.as_str())];
        file.append(&row).unwrap();
        expected.push(row);
    }
    assert!(file.pages().len() > 1);

    let got: Vec<Row> = file.scan().map(|r| r.unwrap().1).collect();
    assert_eq!(got, expected);
}

#[test]
fn failed_insert_leaves_storage_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = ExecutionEngine::open(dir.path(), EngineConfig::default()).unwrap();

    let results = engine.run_sql(
        "CREATE TABLE d (id INT PRIMARY KEY, s VARCHAR(8));\n\
         INSERT INTO d VALUES (1, 'fits');",
    );
    assert!(results.iter().all(|r| r.is_ok()));

    let before = engine.run_sql("SELECT * FROM d;").remove(0).unwrap();

    // Over-length VARCHAR and duplicate key both fail.
    assert!(engine
        .run_sql("INSERT INTO d VALUES (2, 'Engineering');")
        .remove(0)
        .is_err());
    assert!(engine
        .run_sql("INSERT INTO d VALUES (1, 'dup');")
        .remove(0)
        .is_err());
    assert!(engine
        .run_sql("UPDATE d SET s = 'far too long here' WHERE id = 1;")
        .remove(0)
        .is_err());

    let after = engine.run_sql("SELECT * FROM d;").remove(0).unwrap();
    assert_eq!(before.rows, after.rows);
}

#[test]
fn catalog_file_is_json_with_page_lists() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut engine = ExecutionEngine::open(dir.path(), EngineConfig::default()).unwrap();
        let results = engine.run_sql(
            "CREATE TABLE t (id INT PRIMARY KEY, v VARCHAR);\n\
             INSERT INTO t VALUES (1, 'x');",
        );
        assert!(results.iter().all(|r| r.is_ok()));
        engine.shutdown().unwrap();
    }

    let raw = std::fs::read_to_string(dir.path().join("catalog.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();

    assert_eq!(json["page_layout"], "table-file");
    let pages = json["tables"]["t"]["pages"].as_array().unwrap();
    assert!(!pages.is_empty());

    // Pages live in one file per table.
    assert!(dir.path().join("pages").join("t.tbl").exists());
}

#[test]
fn dirty_pages_reach_disk_only_after_flush() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool(dir.path(), 8);
    let mut file = TableFile::new("t", vec![], Arc::clone(&pool));

    file.append(&[Value::Int(7)]).unwrap();
    let page_id = file.pages()[0];
    pool.lock().unwrap().flush_all().unwrap();

    // A fresh pool over the same directory sees the flushed row.
    let pool2 = PageManager::new(dir.path());
    let page = pool2.read_page("t", page_id).unwrap();
    let row = decode_row(page.read_row(0).unwrap()).unwrap();
    assert_eq!(row, vec![Value::Int(7)]);
}
