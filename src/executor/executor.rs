//! Query executor for MiniDB
//!
//! The execution engine owns the catalog and the buffer pool. Queries run
//! as a pull-based pipeline of operators, each exposing open/next/close;
//! DML statements run eagerly against the table file manager with
//! constraint checks applied row by row.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::optimizer::Optimizer;
use super::planner::{LogicalPlan, Planner};
use crate::catalog::{Catalog, Column, DataType, Schema};
use crate::error::{Error, Result};
use crate::sql::ast::*;
use crate::sql::{Parser, SemanticAnalyzer};
use crate::storage::buffer_pool::PoolStats;
use crate::storage::{
    BufferPool, EvictionPolicy, PageManager, Row, RowId, ScanIter, TableFile, Value,
};
use tracing::{debug, warn};

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of buffer pool frames.
    pub pool_capacity: usize,
    /// Replacement policy for the buffer pool.
    pub policy: EvictionPolicy,
    /// Whether the optimizer pushes predicates into scans.
    pub push_down: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 16,
            policy: EvictionPolicy::Lru,
            push_down: true,
        }
    }
}

/// Query result
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Output column names
    pub columns: Vec<String>,
    /// Result rows
    pub rows: Vec<Row>,
    /// Number of affected rows (for INSERT/UPDATE/DELETE)
    pub affected_rows: usize,
    /// Summary message (for DDL/DML)
    pub message: Option<String>,
}

impl QueryResult {
    /// Create a result with a message
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: 0,
            message: Some(message.into()),
        }
    }

    /// Create a result with an affected-row count
    pub fn with_affected_rows(count: usize, message: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: count,
            message: Some(message.into()),
        }
    }
}

/// An output column of an operator: the column name plus the table binding
/// it came from, so qualified references resolve after a join.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLabel {
    pub qualifier: Option<String>,
    pub name: String,
}

impl ColumnLabel {
    fn matches(&self, qualifier: Option<&str>, name: &str) -> bool {
        match qualifier {
            Some(q) => self.qualifier.as_deref() == Some(q) && self.name == name,
            None => self.name == name,
        }
    }
}

/// Execution engine
pub struct ExecutionEngine {
    catalog: Catalog,
    pool: Arc<Mutex<BufferPool>>,
    config: EngineConfig,
}

impl ExecutionEngine {
    /// Open (or create) a database under `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>, config: EngineConfig) -> Result<Self> {
        let data_dir = data_dir.into();
        let pages_dir = data_dir.join("pages");
        std::fs::create_dir_all(&pages_dir)?;

        let catalog = Catalog::load(data_dir.join("catalog.json"))?;
        let disk = PageManager::new(&pages_dir);
        let pool = Arc::new(Mutex::new(BufferPool::new(
            config.pool_capacity,
            config.policy,
            disk,
        )));

        Ok(Self {
            catalog,
            pool,
            config,
        })
    }

    /// Read access to the catalog (for shell meta commands and tests).
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Buffer pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.lock().unwrap().stats()
    }

    /// Flush all pages and persist the catalog. Called on clean shutdown.
    pub fn shutdown(&mut self) -> Result<()> {
        self.pool.lock().unwrap().flush_all()?;
        self.catalog.save()
    }

    /// Parse and execute every statement in `sql`, one result per
    /// statement. Parse errors recover at the next `;`.
    pub fn run_sql(&mut self, sql: &str) -> Vec<Result<QueryResult>> {
        let mut parser = match Parser::new(sql) {
            Ok(p) => p,
            Err(e) => return vec![Err(e)],
        };

        parser
            .parse_script()
            .into_iter()
            .map(|parsed| parsed.and_then(|stmt| self.execute(stmt)))
            .collect()
    }

    /// Compile and execute one statement: analyze, plan, optimize, run.
    pub fn execute(&mut self, stmt: Statement) -> Result<QueryResult> {
        if let Err(mut errors) = SemanticAnalyzer::new(&self.catalog).analyze(&stmt) {
            for extra in errors.iter().skip(1) {
                warn!("{}", extra);
            }
            return Err(errors.remove(0));
        }

        let plan = Planner::new(&self.catalog).plan(stmt)?;
        debug!("logical plan:\n{}", plan.explain(0));
        let plan = Optimizer::new(&self.catalog, self.config.push_down).optimize(plan);
        debug!("optimized plan:\n{}", plan.explain(0));

        self.execute_plan(plan)
    }

    fn execute_plan(&mut self, plan: LogicalPlan) -> Result<QueryResult> {
        match plan {
            LogicalPlan::CreateTable {
                table,
                columns,
                primary_key,
                foreign_keys,
            } => self.execute_create_table(&table, columns, primary_key, foreign_keys),
            LogicalPlan::DropTable { table } => self.execute_drop_table(&table),
            LogicalPlan::Insert {
                table,
                columns,
                rows,
            } => self.execute_insert(&table, columns, rows),
            LogicalPlan::Update {
                table,
                assignments,
                predicate,
            } => self.execute_update(&table, assignments, predicate),
            LogicalPlan::Delete { table, predicate } => self.execute_delete(&table, predicate),
            query => self.execute_query(query),
        }
    }

    // ========== DDL ==========

    fn execute_create_table(
        &mut self,
        table: &str,
        columns: Vec<ColumnDef>,
        primary_key: Option<String>,
        foreign_keys: Vec<ForeignKeyDef>,
    ) -> Result<QueryResult> {
        let mut schema = Schema::new();
        for def in columns {
            let is_pk = def.primary_key || primary_key.as_deref() == Some(def.name.as_str());
            let mut column = Column::new(def.name, def.data_type).primary_key(is_pk);
            if let Some(fk) = foreign_keys.iter().find(|f| f.column == column.name) {
                column = column.references(fk.ref_table.clone(), fk.ref_column.clone());
            }
            schema.add_column(column);
        }

        self.catalog.create_table(table, schema)?;
        self.catalog.save()?;
        self.pool.lock().unwrap().flush_all()?;

        Ok(QueryResult::with_message(format!(
            "Table '{}' created",
            table
        )))
    }

    fn execute_drop_table(&mut self, table: &str) -> Result<QueryResult> {
        self.catalog.drop_table(table)?;
        self.catalog.save()?;

        let mut pool = self.pool.lock().unwrap();
        pool.discard_table(table);
        pool.disk().remove_table(table)?;
        pool.flush_all()?;
        drop(pool);

        Ok(QueryResult::with_message(format!(
            "Table '{}' dropped",
            table
        )))
    }

    // ========== DML ==========

    fn table_file(&self, table: &str) -> Result<TableFile> {
        let entry = self.catalog.get(table)?;
        Ok(TableFile::new(
            table,
            entry.pages.clone(),
            Arc::clone(&self.pool),
        ))
    }

    fn execute_insert(
        &mut self,
        table: &str,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expr>>,
    ) -> Result<QueryResult> {
        let schema = self.catalog.get(table)?.schema.clone();

        // Position of each VALUES entry within the full row.
        let targets: Vec<usize> = match &columns {
            Some(cols) => cols
                .iter()
                .map(|name| {
                    schema.column_index(name).ok_or_else(|| {
                        Error::Runtime(format!("column '{}' not found in '{}'", name, table))
                    })
                })
                .collect::<Result<_>>()?,
            None => (0..schema.column_count()).collect(),
        };

        let mut file = self.table_file(table)?;
        let mut inserted = 0usize;
        let mut failure = None;

        // Each row is checked and appended independently; a failure on a
        // later row keeps the earlier ones.
        for exprs in rows {
            match self.insert_one(&mut file, table, &schema, &targets, &exprs) {
                Ok(()) => inserted += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        self.catalog.set_pages(table, file.pages().to_vec())?;
        if let Some(e) = failure {
            return Err(e);
        }

        Ok(QueryResult::with_affected_rows(
            inserted,
            format!("{} row(s) inserted", inserted),
        ))
    }

    fn insert_one(
        &self,
        file: &mut TableFile,
        table: &str,
        schema: &Schema,
        targets: &[usize],
        exprs: &[Expr],
    ) -> Result<()> {
        let mut row: Row = vec![Value::Null; schema.column_count()];
        for (expr, &target) in exprs.iter().zip(targets) {
            let value = eval_expr(expr, &[], &[])?;
            row[target] = coerce_for_column(value, &schema.columns()[target])?;
        }

        // Primary-key uniqueness: scan before append.
        if let Some(pk) = schema.primary_key_index() {
            if !row[pk].is_null() {
                for item in file.scan() {
                    let (_, existing) = item?;
                    if existing[pk].compare(&row[pk])? == Some(Ordering::Equal) {
                        return Err(Error::Constraint(format!(
                            "primary key violation for table '{}': duplicate value {}",
                            table, row[pk]
                        )));
                    }
                }
            }
        }

        // Foreign keys: each non-NULL value must match a primary key in
        // the referenced table. A self-referential key scans the live
        // handle, whose page list includes pages allocated by earlier rows
        // of this statement; the catalog snapshot does not.
        for (idx, col, fk) in schema.foreign_keys() {
            if row[idx].is_null() {
                continue;
            }
            let found = if fk.table == table {
                let pk_idx = schema.column_index(&fk.column).ok_or_else(|| {
                    Error::Runtime(format!(
                        "column '{}' not found in '{}'",
                        fk.column, fk.table
                    ))
                })?;
                scan_contains(file.scan(), pk_idx, &row[idx])?
            } else {
                self.foreign_key_exists(&fk.table, &fk.column, &row[idx])?
            };
            if !found {
                return Err(Error::Constraint(format!(
                    "foreign key violation: no row in '{}' with {} = {} (column '{}')",
                    fk.table, fk.column, row[idx], col.name
                )));
            }
        }

        file.append(&row)?;
        Ok(())
    }

    /// Does the referenced table contain a row whose `column` equals
    /// `value`? Used to enforce FOREIGN KEY declarations against other
    /// tables; self-references go through the statement's live handle.
    fn foreign_key_exists(&self, table: &str, column: &str, value: &Value) -> Result<bool> {
        let entry = self.catalog.get(table)?;
        let idx = entry.schema.column_index(column).ok_or_else(|| {
            Error::Runtime(format!("column '{}' not found in '{}'", column, table))
        })?;

        let file = TableFile::new(table, entry.pages.clone(), Arc::clone(&self.pool));
        scan_contains(file.scan(), idx, value)
    }

    fn execute_update(
        &mut self,
        table: &str,
        assignments: Vec<Assignment>,
        predicate: Option<Expr>,
    ) -> Result<QueryResult> {
        let schema = self.catalog.get(table)?.schema.clone();
        let labels = table_labels(table, &schema);
        let mut file = self.table_file(table)?;

        // Snapshot matching rows first so relocated rows are not visited
        // twice by the ongoing scan.
        let mut matches: Vec<(RowId, Row)> = Vec::new();
        for item in file.scan() {
            let (id, row) = item?;
            let keep = match &predicate {
                Some(pred) => eval_predicate(pred, &row, &labels)?.unwrap_or(false),
                None => true,
            };
            if keep {
                matches.push((id, row));
            }
        }

        let mut updated = 0usize;
        let mut failure = None;
        for (id, old_row) in matches {
            match self.update_one(&mut file, &schema, &labels, id, &old_row, &assignments) {
                Ok(()) => updated += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        self.catalog.set_pages(table, file.pages().to_vec())?;
        if let Some(e) = failure {
            return Err(e);
        }

        Ok(QueryResult::with_affected_rows(
            updated,
            format!("{} row(s) updated", updated),
        ))
    }

    fn update_one(
        &self,
        file: &mut TableFile,
        schema: &Schema,
        labels: &[ColumnLabel],
        id: RowId,
        old_row: &[Value],
        assignments: &[Assignment],
    ) -> Result<()> {
        let mut new_row = old_row.to_vec();
        for assignment in assignments {
            let idx = schema.column_index(&assignment.column).ok_or_else(|| {
                Error::Runtime(format!("column '{}' disappeared", assignment.column))
            })?;
            let value = eval_expr(&assignment.value, old_row, labels)?;
            new_row[idx] = coerce_for_column(value, &schema.columns()[idx])?;
        }
        file.update_in_place(id, &new_row)?;
        Ok(())
    }

    fn execute_delete(&mut self, table: &str, predicate: Option<Expr>) -> Result<QueryResult> {
        let schema = self.catalog.get(table)?.schema.clone();
        let labels = table_labels(table, &schema);
        let mut file = self.table_file(table)?;

        let mut doomed: Vec<RowId> = Vec::new();
        for item in file.scan() {
            let (id, row) = item?;
            let matches = match &predicate {
                Some(pred) => eval_predicate(pred, &row, &labels)?.unwrap_or(false),
                None => true,
            };
            if matches {
                doomed.push(id);
            }
        }

        let deleted = doomed.len();
        for id in doomed {
            file.delete(id)?;
        }

        self.catalog.set_pages(table, file.pages().to_vec())?;
        Ok(QueryResult::with_affected_rows(
            deleted,
            format!("{} row(s) deleted", deleted),
        ))
    }

    // ========== Queries ==========

    fn execute_query(&mut self, plan: LogicalPlan) -> Result<QueryResult> {
        let mut op = self.build_operator(plan)?;
        op.open()?;

        let mut rows = Vec::new();
        loop {
            match op.next() {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break,
                Err(e) => {
                    op.close();
                    return Err(e);
                }
            }
        }
        op.close();

        let columns = render_columns(op.labels());
        Ok(QueryResult {
            columns,
            rows,
            affected_rows: 0,
            message: None,
        })
    }

    fn build_operator(&self, plan: LogicalPlan) -> Result<Box<dyn Operator>> {
        match plan {
            LogicalPlan::SeqScan {
                table,
                alias,
                predicate,
            } => {
                let entry = self.catalog.get(&table)?;
                let binding = alias.unwrap_or_else(|| table.clone());
                let labels = entry
                    .schema
                    .columns()
                    .iter()
                    .map(|c| ColumnLabel {
                        qualifier: Some(binding.clone()),
                        name: c.name.clone(),
                    })
                    .collect();
                let file = TableFile::new(&table, entry.pages.clone(), Arc::clone(&self.pool));
                Ok(Box::new(SeqScanOp::new(file, labels, predicate)))
            }
            LogicalPlan::Filter { input, predicate } => {
                let input = self.build_operator(*input)?;
                Ok(Box::new(FilterOp::new(input, predicate)))
            }
            LogicalPlan::NestedLoopJoin {
                left,
                right,
                predicate,
            } => {
                let left = self.build_operator(*left)?;
                let right = self.build_operator(*right)?;
                Ok(Box::new(NestedLoopJoinOp::new(left, right, predicate)))
            }
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let input = self.build_operator(*input)?;
                Ok(Box::new(AggregateOp::new(input, group_by, aggregates)))
            }
            LogicalPlan::Sort {
                input,
                key,
                descending,
            } => {
                let input = self.build_operator(*input)?;
                Ok(Box::new(SortOp::new(input, key, descending)))
            }
            LogicalPlan::Project { input, items } => {
                let input = self.build_operator(*input)?;
                Ok(Box::new(ProjectOp::new(input, items)))
            }
            other => Err(Error::Plan(format!(
                "plan node {:?} is not a query operator",
                other
            ))),
        }
    }
}

/// Labels for a single table's columns, qualified by its name.
fn table_labels(table: &str, schema: &Schema) -> Vec<ColumnLabel> {
    schema
        .columns()
        .iter()
        .map(|c| ColumnLabel {
            qualifier: Some(table.to_string()),
            name: c.name.clone(),
        })
        .collect()
}

/// Render output column names, qualifying only where a bare name would be
/// ambiguous.
fn render_columns(labels: &[ColumnLabel]) -> Vec<String> {
    labels
        .iter()
        .map(|label| {
            let duplicated = labels.iter().filter(|l| l.name == label.name).count() > 1;
            match (&label.qualifier, duplicated) {
                (Some(q), true) => format!("{}.{}", q, label.name),
                _ => label.name.clone(),
            }
        })
        .collect()
}

/// Whether any scanned row's `idx`-th column equals `value`.
fn scan_contains(iter: ScanIter, idx: usize, value: &Value) -> Result<bool> {
    for item in iter {
        let (_, row) = item?;
        if row[idx].compare(value)? == Some(Ordering::Equal) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Check a runtime value against a column type, promoting INT to FLOAT and
/// enforcing VARCHAR(n).
fn coerce_for_column(value: Value, col: &Column) -> Result<Value> {
    match (&value, &col.data_type) {
        (Value::Null, _) => Ok(value),
        (Value::Int(_), DataType::Int) => Ok(value),
        (Value::Int(i), DataType::Float) => Ok(Value::Float(*i as f64)),
        (Value::Float(_), DataType::Float) => Ok(value),
        (Value::Varchar(s), DataType::Varchar(limit)) => {
            if let Some(n) = limit {
                if s.chars().count() > *n {
                    return Err(Error::Constraint(format!(
                        "value '{}' exceeds VARCHAR({}) for column '{}'",
                        s, n, col.name
                    )));
                }
            }
            Ok(value)
        }
        _ => Err(Error::Type(format!(
            "{} value is not assignable to column '{}' of type {}",
            value.type_name(),
            col.name,
            col.data_type
        ))),
    }
}

// ========== Expression evaluation ==========

fn resolve_column(qualifier: Option<&str>, name: &str, labels: &[ColumnLabel]) -> Result<usize> {
    labels
        .iter()
        .position(|l| l.matches(qualifier, name))
        .ok_or_else(|| {
            let shown = match qualifier {
                Some(q) => format!("{}.{}", q, name),
                None => name.to_string(),
            };
            Error::Runtime(format!("column '{}' not found in row", shown))
        })
}

/// Evaluate a scalar expression against one row.
pub fn eval_expr(expr: &Expr, row: &[Value], labels: &[ColumnLabel]) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Column(c) => {
            let idx = resolve_column(c.qualifier.as_deref(), &c.name, labels)?;
            Ok(row[idx].clone())
        }
        Expr::BinaryOp { left, op, right } => {
            if op.is_comparison() || *op == BinaryOperator::And {
                return match eval_predicate(expr, row, labels)? {
                    Some(b) => Ok(Value::Int(b as i64)),
                    None => Ok(Value::Null),
                };
            }
            let l = eval_expr(left, row, labels)?;
            let r = eval_expr(right, row, labels)?;
            match op {
                BinaryOperator::Add => l.add(&r),
                BinaryOperator::Sub => l.sub(&r),
                BinaryOperator::Mul => l.mul(&r),
                BinaryOperator::Div => l.div(&r),
                _ => unreachable!("comparisons handled above"),
            }
        }
        // After aggregation the value is already a column of the row,
        // labeled with the aggregate's display text.
        Expr::Aggregate { .. } => {
            let idx = resolve_column(None, &expr.to_string(), labels)?;
            Ok(row[idx].clone())
        }
    }
}

/// Evaluate a predicate against one row. `Ok(None)` means the comparison
/// involved NULL; filters treat that as false.
pub fn eval_predicate(expr: &Expr, row: &[Value], labels: &[ColumnLabel]) -> Result<Option<bool>> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let l = eval_predicate(left, row, labels)?;
            let r = eval_predicate(right, row, labels)?;
            Ok(match (l, r) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            })
        }
        Expr::BinaryOp { left, op, right } if op.is_comparison() => {
            let l = eval_expr(left, row, labels)?;
            let r = eval_expr(right, row, labels)?;
            let ord = l.compare(&r)?;
            Ok(ord.map(|o| match op {
                BinaryOperator::Eq => o == Ordering::Equal,
                BinaryOperator::Neq => o != Ordering::Equal,
                BinaryOperator::Lt => o == Ordering::Less,
                BinaryOperator::Gt => o == Ordering::Greater,
                BinaryOperator::Lte => o != Ordering::Greater,
                BinaryOperator::Gte => o != Ordering::Less,
                _ => unreachable!("non-comparison handled above"),
            }))
        }
        _ => Err(Error::Runtime(format!(
            "expression '{}' is not a boolean condition",
            expr
        ))),
    }
}

// ========== Operators ==========

/// A pull-based plan operator.
pub trait Operator {
    fn open(&mut self) -> Result<()>;
    fn next(&mut self) -> Result<Option<Row>>;
    fn close(&mut self);
    fn labels(&self) -> &[ColumnLabel];
}

/// Sequential scan with an optional absorbed predicate.
struct SeqScanOp {
    file: TableFile,
    labels: Vec<ColumnLabel>,
    predicate: Option<Expr>,
    iter: Option<ScanIter>,
}

impl SeqScanOp {
    fn new(file: TableFile, labels: Vec<ColumnLabel>, predicate: Option<Expr>) -> Self {
        Self {
            file,
            labels,
            predicate,
            iter: None,
        }
    }
}

impl Operator for SeqScanOp {
    fn open(&mut self) -> Result<()> {
        self.iter = Some(self.file.scan());
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>> {
        let iter = self
            .iter
            .as_mut()
            .ok_or_else(|| Error::Runtime("scan used before open".to_string()))?;

        for item in iter {
            let (_, row) = item?;
            let keep = match &self.predicate {
                Some(pred) => eval_predicate(pred, &row, &self.labels)?.unwrap_or(false),
                None => true,
            };
            if keep {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.iter = None;
    }

    fn labels(&self) -> &[ColumnLabel] {
        &self.labels
    }
}

/// Residual filter above a join (or a scan when push-down is off).
struct FilterOp {
    input: Box<dyn Operator>,
    predicate: Expr,
}

impl FilterOp {
    fn new(input: Box<dyn Operator>, predicate: Expr) -> Self {
        Self { input, predicate }
    }
}

impl Operator for FilterOp {
    fn open(&mut self) -> Result<()> {
        self.input.open()
    }

    fn next(&mut self) -> Result<Option<Row>> {
        while let Some(row) = self.input.next()? {
            if eval_predicate(&self.predicate, &row, self.input.labels())?.unwrap_or(false) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.input.close()
    }

    fn labels(&self) -> &[ColumnLabel] {
        self.input.labels()
    }
}

/// Inner nested-loop join; the right input is materialized once.
struct NestedLoopJoinOp {
    left: Box<dyn Operator>,
    right: Box<dyn Operator>,
    predicate: Expr,
    labels: Vec<ColumnLabel>,
    right_rows: Vec<Row>,
    current_left: Option<Row>,
    right_pos: usize,
}

impl NestedLoopJoinOp {
    fn new(left: Box<dyn Operator>, right: Box<dyn Operator>, predicate: Expr) -> Self {
        let mut labels = left.labels().to_vec();
        labels.extend(right.labels().to_vec());
        Self {
            left,
            right,
            predicate,
            labels,
            right_rows: Vec::new(),
            current_left: None,
            right_pos: 0,
        }
    }
}

impl Operator for NestedLoopJoinOp {
    fn open(&mut self) -> Result<()> {
        self.left.open()?;
        self.right.open()?;
        self.right_rows.clear();
        while let Some(row) = self.right.next()? {
            self.right_rows.push(row);
        }
        self.right.close();
        self.current_left = None;
        self.right_pos = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if self.current_left.is_none() {
                self.current_left = self.left.next()?;
                self.right_pos = 0;
                if self.current_left.is_none() {
                    return Ok(None);
                }
            }

            let left_row = self.current_left.as_ref().unwrap();
            while self.right_pos < self.right_rows.len() {
                let right_row = &self.right_rows[self.right_pos];
                self.right_pos += 1;

                let mut combined = left_row.clone();
                combined.extend(right_row.iter().cloned());

                if eval_predicate(&self.predicate, &combined, &self.labels)?.unwrap_or(false) {
                    return Ok(Some(combined));
                }
            }
            self.current_left = None;
        }
    }

    fn close(&mut self) {
        self.left.close();
        self.right_rows.clear();
    }

    fn labels(&self) -> &[ColumnLabel] {
        &self.labels
    }
}

/// One running aggregate within a group.
enum Acc {
    Count(i64),
    Sum(Option<Value>),
    Avg { sum: f64, count: i64 },
}

impl Acc {
    fn new(func: AggregateFunc) -> Self {
        match func {
            AggregateFunc::Count => Acc::Count(0),
            AggregateFunc::Sum => Acc::Sum(None),
            AggregateFunc::Avg => Acc::Avg { sum: 0.0, count: 0 },
        }
    }

    fn update(&mut self, value: Option<&Value>) -> Result<()> {
        match self {
            Acc::Count(n) => {
                // COUNT(*) is fed None; COUNT(col) counts non-NULLs.
                match value {
                    None => *n += 1,
                    Some(v) if !v.is_null() => *n += 1,
                    Some(_) => {}
                }
            }
            Acc::Sum(total) => {
                if let Some(v) = value {
                    if !v.is_null() {
                        *total = Some(match total.take() {
                            Some(t) => t.add(v)?,
                            None => v.clone(),
                        });
                    }
                }
            }
            Acc::Avg { sum, count } => {
                if let Some(v) = value {
                    if !v.is_null() {
                        let f = v.as_f64().ok_or_else(|| {
                            Error::Type(format!("AVG over non-numeric value {}", v))
                        })?;
                        *sum += f;
                        *count += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Acc::Count(n) => Value::Int(n),
            Acc::Sum(total) => total.unwrap_or(Value::Null),
            Acc::Avg { sum, count } => {
                if count > 0 {
                    Value::Float(sum / count as f64)
                } else {
                    Value::Null
                }
            }
        }
    }
}

/// Hash aggregation preserving first-seen group order.
struct AggregateOp {
    input: Box<dyn Operator>,
    group_by: Vec<ColumnRef>,
    aggregates: Vec<Expr>,
    labels: Vec<ColumnLabel>,
    output: Option<std::vec::IntoIter<Row>>,
}

impl AggregateOp {
    fn new(input: Box<dyn Operator>, group_by: Vec<ColumnRef>, aggregates: Vec<Expr>) -> Self {
        let mut labels: Vec<ColumnLabel> = group_by
            .iter()
            .map(|c| ColumnLabel {
                qualifier: c.qualifier.clone(),
                name: c.name.clone(),
            })
            .collect();
        labels.extend(aggregates.iter().map(|a| ColumnLabel {
            qualifier: None,
            name: a.to_string(),
        }));

        Self {
            input,
            group_by,
            aggregates,
            labels,
            output: None,
        }
    }

    fn compute(&mut self) -> Result<Vec<Row>> {
        let in_labels = self.input.labels().to_vec();

        let mut key_order: Vec<Vec<Value>> = Vec::new();
        let mut group_index: HashMap<Vec<Value>, usize> = HashMap::new();
        let mut states: Vec<Vec<Acc>> = Vec::new();

        while let Some(row) = self.input.next()? {
            let key: Vec<Value> = self
                .group_by
                .iter()
                .map(|c| {
                    let idx = resolve_column(c.qualifier.as_deref(), &c.name, &in_labels)?;
                    Ok(row[idx].clone())
                })
                .collect::<Result<_>>()?;

            let slot = match group_index.get(&key) {
                Some(&i) => i,
                None => {
                    let i = states.len();
                    group_index.insert(key.clone(), i);
                    key_order.push(key);
                    states.push(
                        self.aggregates
                            .iter()
                            .map(|a| match a {
                                Expr::Aggregate { func, .. } => Acc::new(*func),
                                _ => unreachable!("planner collects only aggregate calls"),
                            })
                            .collect(),
                    );
                    i
                }
            };

            for (acc, agg) in states[slot].iter_mut().zip(&self.aggregates) {
                let Expr::Aggregate { arg, .. } = agg else {
                    unreachable!("planner collects only aggregate calls");
                };
                match arg {
                    AggregateArg::Star => acc.update(None)?,
                    AggregateArg::Column(c) => {
                        let idx = resolve_column(c.qualifier.as_deref(), &c.name, &in_labels)?;
                        acc.update(Some(&row[idx]))?;
                    }
                }
            }
        }

        // No grouping keys: exactly one output row, even over zero input.
        if states.is_empty() && self.group_by.is_empty() {
            key_order.push(Vec::new());
            states.push(self.aggregates.iter().map(|a| match a {
                Expr::Aggregate { func, .. } => Acc::new(*func),
                _ => unreachable!("planner collects only aggregate calls"),
            }).collect());
        }

        let mut rows = Vec::with_capacity(states.len());
        for (key, accs) in key_order.into_iter().zip(states) {
            let mut row = key;
            row.extend(accs.into_iter().map(Acc::finish));
            rows.push(row);
        }
        Ok(rows)
    }
}

impl Operator for AggregateOp {
    fn open(&mut self) -> Result<()> {
        self.input.open()?;
        self.output = None;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>> {
        if self.output.is_none() {
            let rows = self.compute()?;
            self.input.close();
            self.output = Some(rows.into_iter());
        }
        Ok(self.output.as_mut().unwrap().next())
    }

    fn close(&mut self) {
        self.output = None;
    }

    fn labels(&self) -> &[ColumnLabel] {
        &self.labels
    }
}

/// Full-materialization sort. The comparator is stable and places NULLs
/// last regardless of direction.
struct SortOp {
    input: Box<dyn Operator>,
    key: ColumnRef,
    descending: bool,
    output: Option<std::vec::IntoIter<Row>>,
}

impl SortOp {
    fn new(input: Box<dyn Operator>, key: ColumnRef, descending: bool) -> Self {
        Self {
            input,
            key,
            descending,
            output: None,
        }
    }
}

impl Operator for SortOp {
    fn open(&mut self) -> Result<()> {
        self.input.open()?;
        self.output = None;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>> {
        if self.output.is_none() {
            let labels = self.input.labels().to_vec();
            let idx = resolve_column(self.key.qualifier.as_deref(), &self.key.name, &labels)?;

            let mut rows: Vec<Row> = Vec::new();
            while let Some(row) = self.input.next()? {
                rows.push(row);
            }
            self.input.close();

            let descending = self.descending;
            rows.sort_by(|a, b| {
                let (va, vb) = (&a[idx], &b[idx]);
                match (va.is_null(), vb.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => {
                        let ord = va.compare(vb).ok().flatten().unwrap_or(Ordering::Equal);
                        if descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    }
                }
            });

            self.output = Some(rows.into_iter());
        }
        Ok(self.output.as_mut().unwrap().next())
    }

    fn close(&mut self) {
        self.output = None;
    }

    fn labels(&self) -> &[ColumnLabel] {
        self.input.labels()
    }
}

/// Final projection: evaluates each select item and names the outputs.
struct ProjectOp {
    input: Box<dyn Operator>,
    items: Vec<SelectItem>,
    labels: Vec<ColumnLabel>,
    labels_ready: bool,
}

impl ProjectOp {
    fn new(input: Box<dyn Operator>, items: Vec<SelectItem>) -> Self {
        Self {
            input,
            items,
            labels: Vec::new(),
            labels_ready: false,
        }
    }

    fn build_labels(&mut self) {
        if self.labels_ready {
            return;
        }
        let mut labels = Vec::new();
        for item in &self.items {
            match item {
                SelectItem::Wildcard => labels.extend(self.input.labels().to_vec()),
                SelectItem::Expr { expr, alias } => labels.push(ColumnLabel {
                    qualifier: None,
                    name: alias.clone().unwrap_or_else(|| expr.to_string()),
                }),
            }
        }
        self.labels = labels;
        self.labels_ready = true;
    }
}

impl Operator for ProjectOp {
    fn open(&mut self) -> Result<()> {
        self.input.open()?;
        self.build_labels();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>> {
        let Some(row) = self.input.next()? else {
            return Ok(None);
        };

        let mut out = Vec::new();
        for item in &self.items {
            match item {
                SelectItem::Wildcard => out.extend(row.iter().cloned()),
                SelectItem::Expr { expr, .. } => {
                    out.push(eval_expr(expr, &row, self.input.labels())?)
                }
            }
        }
        Ok(Some(out))
    }

    fn close(&mut self) {
        self.input.close()
    }

    fn labels(&self) -> &[ColumnLabel] {
        &self.labels
    }
}
