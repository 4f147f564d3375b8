//! End-to-end SQL tests driving the full pipeline: lexer, parser, semantic
//! analysis, planner, optimizer, and executor over real on-disk storage.

use minidb::executor::{EngineConfig, ExecutionEngine, QueryResult};
use minidb::storage::{EvictionPolicy, Row, Value};
use minidb::Error;

fn open(dir: &std::path::Path) -> ExecutionEngine {
    ExecutionEngine::open(dir, EngineConfig::default()).unwrap()
}

fn ok(engine: &mut ExecutionEngine, sql: &str) -> QueryResult {
    let mut results = engine.run_sql(sql);
    assert_eq!(results.len(), 1, "one statement expected in {:?}", sql);
    match results.remove(0) {
        Ok(r) => r,
        Err(e) => panic!("statement {:?} failed: {}", sql, e),
    }
}

fn fail(engine: &mut ExecutionEngine, sql: &str) -> Error {
    let mut results = engine.run_sql(sql);
    assert_eq!(results.len(), 1, "one statement expected in {:?}", sql);
    results.remove(0).unwrap_err()
}

fn seed_students(engine: &mut ExecutionEngine) {
    ok(
        engine,
        "CREATE TABLE students (id INT PRIMARY KEY, name VARCHAR(20), age INT);",
    );
    ok(
        engine,
        "INSERT INTO students VALUES (1, 'Alice', 20), (2, 'Bob', 22), (3, 'Cindy', 20);",
    );
}

#[test]
fn duplicate_primary_key_rejected_and_first_row_survives() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(dir.path());

    ok(&mut engine, "CREATE TABLE t(id INT PRIMARY KEY, n VARCHAR(4));");
    ok(&mut engine, "INSERT INTO t VALUES (1,'ab');");

    let err = fail(&mut engine, "INSERT INTO t VALUES (1,'cd');");
    assert!(matches!(err, Error::Constraint(_)));
    assert!(err.to_string().contains("primary key"));

    let result = ok(&mut engine, "SELECT * FROM t;");
    assert_eq!(result.rows, vec![vec![Value::Int(1), Value::from("ab")]]);
}

#[test]
fn varchar_overflow_rejected_and_table_stays_empty() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(dir.path());

    ok(&mut engine, "CREATE TABLE d(id INT PRIMARY KEY, s VARCHAR(8));");

    let err = fail(&mut engine, "INSERT INTO d VALUES (1,'Engineering');");
    assert!(matches!(err, Error::Constraint(_)));

    let result = ok(&mut engine, "SELECT * FROM d;");
    assert!(result.rows.is_empty());
}

#[test]
fn filter_projects_matching_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(dir.path());
    seed_students(&mut engine);

    let result = ok(&mut engine, "SELECT name, age FROM students WHERE age > 20;");
    assert_eq!(result.rows, vec![vec![Value::from("Bob"), Value::Int(22)]]);
}

#[test]
fn inner_join_matches_on_condition() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(dir.path());
    seed_students(&mut engine);

    ok(
        &mut engine,
        "CREATE TABLE courses (cid INT PRIMARY KEY, cname VARCHAR(10));",
    );
    ok(&mut engine, "INSERT INTO courses VALUES (1, 'CS'), (2, 'OS');");

    let result = ok(
        &mut engine,
        "SELECT s.name, c.cname FROM students s JOIN courses c ON s.id = c.cid;",
    );
    assert_eq!(
        result.rows,
        vec![
            vec![Value::from("Alice"), Value::from("CS")],
            vec![Value::from("Bob"), Value::from("OS")],
        ]
    );
}

#[test]
fn group_by_with_descending_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(dir.path());
    seed_students(&mut engine);

    let result = ok(
        &mut engine,
        "SELECT age, COUNT(*) FROM students GROUP BY age ORDER BY age DESC;",
    );
    assert_eq!(
        result.rows,
        vec![
            vec![Value::Int(22), Value::Int(1)],
            vec![Value::Int(20), Value::Int(2)],
        ]
    );
}

#[test]
fn join_without_on_reports_the_hint() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(dir.path());

    let err = fail(&mut engine, "SELECT s.id FROM student s JOIN class c;");
    assert!(matches!(err, Error::Parse { .. }));
    assert!(err.to_string().contains("after JOIN expected ON"));
}

#[test]
fn parse_error_recovery_keeps_later_statements_working() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(dir.path());

    ok(&mut engine, "CREATE TABLE t (id INT);");
    let results = engine.run_sql("SELECT FROM t; INSERT INTO t VALUES (7); SELECT * FROM t;");

    assert_eq!(results.len(), 3);
    assert!(results[0].is_err());
    assert!(results[1].is_ok());
    let rows = &results[2].as_ref().unwrap().rows;
    assert_eq!(rows, &vec![vec![Value::Int(7)]]);
}

#[test]
fn persistence_across_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut engine = open(dir.path());
        seed_students(&mut engine);
        ok(&mut engine, "DELETE FROM students WHERE id = 2;");
        ok(&mut engine, "UPDATE students SET age = 21 WHERE id = 1;");
        engine.shutdown().unwrap();
    }

    let mut engine = open(dir.path());
    let result = ok(&mut engine, "SELECT id, name, age FROM students ORDER BY id;");
    assert_eq!(
        result.rows,
        vec![
            vec![Value::Int(1), Value::from("Alice"), Value::Int(21)],
            vec![Value::Int(3), Value::from("Cindy"), Value::Int(20)],
        ]
    );

    // The schema survived too: constraints still apply.
    let err = fail(&mut engine, "INSERT INTO students VALUES (1, 'Dup', 30);");
    assert!(matches!(err, Error::Constraint(_)));
}

#[test]
fn foreign_key_requires_matching_primary_key() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(dir.path());

    ok(
        &mut engine,
        "CREATE TABLE courses (cid INT PRIMARY KEY, cname VARCHAR(10));",
    );
    ok(
        &mut engine,
        "CREATE TABLE enrollment (eid INT PRIMARY KEY, cid INT, \
         FOREIGN KEY (cid) REFERENCES courses(cid));",
    );
    ok(&mut engine, "INSERT INTO courses VALUES (1, 'CS');");

    let err = fail(&mut engine, "INSERT INTO enrollment VALUES (1, 42);");
    assert!(matches!(err, Error::Constraint(_)));
    assert!(err.to_string().contains("foreign key"));

    // A matching primary key exists at insertion time.
    ok(&mut engine, "INSERT INTO enrollment VALUES (1, 1);");
    let result = ok(&mut engine, "SELECT * FROM enrollment;");
    assert_eq!(result.rows.len(), 1);
}

#[test]
fn order_by_is_stable_for_equal_keys() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(dir.path());
    seed_students(&mut engine);

    // Alice and Cindy share age 20; scan order (by id) must survive.
    let result = ok(&mut engine, "SELECT name FROM students ORDER BY age;");
    assert_eq!(
        result.rows,
        vec![
            vec![Value::from("Alice")],
            vec![Value::from("Cindy")],
            vec![Value::from("Bob")],
        ]
    );

    let result = ok(&mut engine, "SELECT name FROM students ORDER BY age DESC;");
    assert_eq!(
        result.rows,
        vec![
            vec![Value::from("Bob")],
            vec![Value::from("Alice")],
            vec![Value::from("Cindy")],
        ]
    );
}

#[test]
fn nulls_sort_last_regardless_of_direction() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(dir.path());

    ok(&mut engine, "CREATE TABLE t (id INT PRIMARY KEY, v INT);");
    ok(&mut engine, "INSERT INTO t (id, v) VALUES (1, 5), (3, 2);");
    ok(&mut engine, "INSERT INTO t (id) VALUES (2);");

    let result = ok(&mut engine, "SELECT id FROM t ORDER BY v ASC;");
    assert_eq!(
        result.rows,
        vec![vec![Value::Int(3)], vec![Value::Int(1)], vec![Value::Int(2)]]
    );

    let result = ok(&mut engine, "SELECT id FROM t ORDER BY v DESC;");
    assert_eq!(
        result.rows,
        vec![vec![Value::Int(1)], vec![Value::Int(3)], vec![Value::Int(2)]]
    );
}

/// Run the same join workload with and without predicate push-down and
/// compare result multisets.
#[test]
fn push_down_is_result_equivalent() {
    let queries = [
        "SELECT s.name, c.cname FROM students s JOIN courses c ON s.id = c.cid \
         WHERE s.age > 19 AND c.cname != 'OS';",
        "SELECT s.name FROM students s JOIN courses c ON s.id = c.cid WHERE age = 20;",
        "SELECT name FROM students WHERE age > 18 AND id != 2;",
    ];

    let mut outputs: Vec<Vec<Vec<Row>>> = Vec::new();
    for push_down in [true, false] {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            push_down,
            ..EngineConfig::default()
        };
        let mut engine = ExecutionEngine::open(dir.path(), config).unwrap();
        seed_students(&mut engine);
        ok(
            &mut engine,
            "CREATE TABLE courses (cid INT PRIMARY KEY, cname VARCHAR(10));",
        );
        ok(&mut engine, "INSERT INTO courses VALUES (1, 'CS'), (2, 'OS');");

        let mut per_query = Vec::new();
        for q in &queries {
            let mut rows = ok(&mut engine, q).rows;
            rows.sort_by_key(|r| format!("{:?}", r));
            per_query.push(rows);
        }
        outputs.push(per_query);
    }

    assert_eq!(outputs[0], outputs[1]);
}

/// The buffer pool is transparent: any capacity and either policy produce
/// identical results for the same statement sequence.
#[test]
fn buffer_capacity_and_policy_are_transparent() {
    let mut reference: Option<Vec<Row>> = None;

    for (capacity, policy) in [
        (1, EvictionPolicy::Lru),
        (4, EvictionPolicy::Fifo),
        (16, EvictionPolicy::Lru),
        (1024, EvictionPolicy::Fifo),
    ] {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            pool_capacity: capacity,
            policy,
            ..EngineConfig::default()
        };
        let mut engine = ExecutionEngine::open(dir.path(), config).unwrap();

        ok(
            &mut engine,
            "CREATE TABLE logs (id INT PRIMARY KEY, body VARCHAR, n INT);",
        );
        // Rows are large enough that the table spans several pages.
        let filler = "z".repeat(300);
        for i in 0..50 {
            ok(
                &mut engine,
                &format!("INSERT INTO logs VALUES ({}, '{}', {});", i, filler, i % 7),
            );
        }
        ok(&mut engine, "DELETE FROM logs WHERE n = 3;");
        ok(&mut engine, "UPDATE logs SET n = n + 100 WHERE n = 5;");

        let result = ok(&mut engine, "SELECT id, n FROM logs ORDER BY id;");
        match &reference {
            None => reference = Some(result.rows),
            Some(expected) => assert_eq!(
                &result.rows, expected,
                "capacity {} diverged from reference",
                capacity
            ),
        }
    }
}

#[test]
fn drop_table_removes_data_and_persists() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut engine = open(dir.path());
        seed_students(&mut engine);
        ok(&mut engine, "DROP TABLE students;");
        engine.shutdown().unwrap();
    }

    let mut engine = open(dir.path());
    let err = fail(&mut engine, "SELECT * FROM students;");
    assert!(err.to_string().contains("does not exist"));

    // The name is reusable with a fresh schema.
    ok(&mut engine, "CREATE TABLE students (id INT PRIMARY KEY);");
    let result = ok(&mut engine, "SELECT * FROM students;");
    assert!(result.rows.is_empty());
}

#[test]
fn multi_statement_script_runs_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(dir.path());

    let results = engine.run_sql(
        "CREATE TABLE kv (k INT PRIMARY KEY, v VARCHAR(10));\n\
         INSERT INTO kv VALUES (1, 'one');\n\
         -- comments are skipped\n\
         INSERT INTO kv VALUES (2, 'two');\n\
         UPDATE kv SET v = 'uno' WHERE k = 1;\n\
         SELECT v FROM kv ORDER BY k;",
    );

    assert_eq!(results.len(), 5);
    let last = results.last().unwrap().as_ref().unwrap();
    assert_eq!(
        last.rows,
        vec![vec![Value::from("uno")], vec![Value::from("two")]]
    );
}

#[test]
fn float_and_int_promote_in_comparisons_and_aggregates() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = open(dir.path());

    ok(
        &mut engine,
        "CREATE TABLE m (id INT PRIMARY KEY, score FLOAT);",
    );
    ok(
        &mut engine,
        "INSERT INTO m VALUES (1, 2.5), (2, 4), (3, 1.5);",
    );

    let result = ok(&mut engine, "SELECT id FROM m WHERE score > 2;");
    assert_eq!(result.rows, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);

    let result = ok(&mut engine, "SELECT SUM(score), AVG(score) FROM m;");
    assert_eq!(
        result.rows,
        vec![vec![Value::Float(8.0), Value::Float(8.0 / 3.0)]]
    );
}
