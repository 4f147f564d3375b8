//! Semantic analysis
//!
//! Validates an AST against the catalog before planning: tables exist,
//! columns resolve unambiguously, literals are assignable to their target
//! columns, comparisons are variant-compatible, and aggregates appear only
//! where they are allowed. Analysis keeps going after the first problem so
//! one pass reports as many errors as it cheaply can.

use std::collections::BTreeMap;

use super::ast::*;
use crate::catalog::{Catalog, DataType, Schema};
use crate::error::Error;
use crate::storage::Value;

/// Semantic analyzer
pub struct SemanticAnalyzer<'a> {
    catalog: &'a Catalog,
}

impl<'a> SemanticAnalyzer<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Validate one statement. Returns every error found.
    pub fn analyze(&self, stmt: &Statement) -> std::result::Result<(), Vec<Error>> {
        let span = stmt.span();
        let mut errors = Vec::new();

        match stmt {
            Statement::CreateTable(s) => self.analyze_create_table(s, span, &mut errors),
            Statement::DropTable(s) => self.analyze_drop_table(s, span, &mut errors),
            Statement::Insert(s) => self.analyze_insert(s, span, &mut errors),
            Statement::Select(s) => self.analyze_select(s, span, &mut errors),
            Statement::Update(s) => self.analyze_update(s, span, &mut errors),
            Statement::Delete(s) => self.analyze_delete(s, span, &mut errors),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    // ========== CREATE TABLE ==========

    fn analyze_create_table(&self, s: &CreateTableStmt, span: Span, errors: &mut Vec<Error>) {
        if self.catalog.table_exists(&s.table) {
            errors.push(err(span, format!("table '{}' already exists", s.table)));
        }
        if s.columns.is_empty() {
            errors.push(err(span, "a table needs at least one column".to_string()));
        }

        let mut seen = Vec::new();
        for col in &s.columns {
            if seen.contains(&&col.name) {
                errors.push(err(span, format!("duplicate column '{}'", col.name)));
            }
            seen.push(&col.name);
        }

        // At most one primary key, whether column-level or table-level.
        let mut pk_count = s.columns.iter().filter(|c| c.primary_key).count();
        if let Some(pk) = &s.primary_key {
            pk_count += 1;
            if !s.columns.iter().any(|c| &c.name == pk) {
                errors.push(err(
                    span,
                    format!("PRIMARY KEY names unknown column '{}'", pk),
                ));
            }
        }
        if pk_count > 1 {
            errors.push(err(
                span,
                format!("table '{}' declares more than one primary key", s.table),
            ));
        }

        for fk in &s.foreign_keys {
            if !s.columns.iter().any(|c| c.name == fk.column) {
                errors.push(err(
                    span,
                    format!("FOREIGN KEY names unknown column '{}'", fk.column),
                ));
            }
            // A self-referential key validates against the columns being
            // declared; the table is not in the catalog yet.
            if fk.ref_table == s.table {
                let target = s.columns.iter().find(|c| c.name == fk.ref_column);
                let is_pk = target.map(|c| c.primary_key).unwrap_or(false)
                    || s.primary_key.as_deref() == Some(fk.ref_column.as_str());
                match target {
                    None => errors.push(err(
                        span,
                        format!(
                            "referenced column '{}.{}' does not exist",
                            fk.ref_table, fk.ref_column
                        ),
                    )),
                    Some(_) if !is_pk => errors.push(err(
                        span,
                        format!(
                            "foreign key target '{}.{}' is not a primary key",
                            fk.ref_table, fk.ref_column
                        ),
                    )),
                    Some(_) => {}
                }
                continue;
            }
            match self.catalog.get(&fk.ref_table) {
                Err(_) => errors.push(err(
                    span,
                    format!("referenced table '{}' does not exist", fk.ref_table),
                )),
                Ok(entry) => match entry.schema.get_column(&fk.ref_column) {
                    None => errors.push(err(
                        span,
                        format!(
                            "referenced column '{}.{}' does not exist",
                            fk.ref_table, fk.ref_column
                        ),
                    )),
                    Some(target) if !target.primary_key => errors.push(err(
                        span,
                        format!(
                            "foreign key target '{}.{}' is not a primary key",
                            fk.ref_table, fk.ref_column
                        ),
                    )),
                    Some(_) => {}
                },
            }
        }
    }

    fn analyze_drop_table(&self, s: &DropTableStmt, span: Span, errors: &mut Vec<Error>) {
        if !self.catalog.table_exists(&s.table) {
            errors.push(err(span, format!("table '{}' does not exist", s.table)));
        }
    }

    // ========== INSERT ==========

    fn analyze_insert(&self, s: &InsertStmt, span: Span, errors: &mut Vec<Error>) {
        let Ok(entry) = self.catalog.get(&s.table) else {
            errors.push(err(span, format!("table '{}' does not exist", s.table)));
            return;
        };
        let schema = &entry.schema;

        // Types of the insert targets, in VALUES order.
        let target_types: Vec<(String, DataType)> = match &s.columns {
            Some(cols) => {
                let mut out = Vec::new();
                for name in cols {
                    match schema.get_column(name) {
                        Some(c) => out.push((c.name.clone(), c.data_type.clone())),
                        None => errors.push(err(
                            span,
                            format!("column '{}' does not exist in table '{}'", name, s.table),
                        )),
                    }
                }
                out
            }
            None => schema
                .columns()
                .iter()
                .map(|c| (c.name.clone(), c.data_type.clone()))
                .collect(),
        };

        for (i, row) in s.rows.iter().enumerate() {
            if row.len() != target_types.len() {
                errors.push(err(
                    span,
                    format!(
                        "row {} has {} values but {} columns are expected",
                        i + 1,
                        row.len(),
                        target_types.len()
                    ),
                ));
                continue;
            }
            for (expr, (col_name, col_type)) in row.iter().zip(&target_types) {
                match expr {
                    Expr::Literal(v) => {
                        if let Some(e) = assignability_error(v, col_name, col_type, span) {
                            errors.push(e);
                        }
                    }
                    _ => errors.push(err(
                        span,
                        format!("INSERT value for '{}' must be a literal", col_name),
                    )),
                }
            }
        }
    }

    // ========== SELECT ==========

    fn analyze_select(&self, s: &SelectStmt, span: Span, errors: &mut Vec<Error>) {
        let Some(scope) = self.build_scope(&s.from, s.join.as_ref(), span, errors) else {
            return;
        };

        for item in &s.items {
            if let SelectItem::Expr { expr, .. } = item {
                self.check_expr(expr, &scope, span, errors, true);
            }
        }

        if let Some(join) = &s.join {
            self.check_predicate(&join.on, &scope, span, errors);
        }
        if let Some(pred) = &s.where_clause {
            self.check_predicate(pred, &scope, span, errors);
        }

        if let Some(group) = &s.group_by {
            self.check_column(group, &scope, span, errors);
        }
        if let Some(order) = &s.order_by {
            self.check_column(&order.column, &scope, span, errors);
        }

        let has_aggregate = s.items.iter().any(|i| {
            matches!(i, SelectItem::Expr { expr, .. } if expr.contains_aggregate())
        });

        if has_aggregate || s.group_by.is_some() {
            // Aggregation collapses rows, so the wildcard and any column
            // outside the grouping key no longer have a meaning. Columns are
            // compared by their owning binding, not just their bare name,
            // so `c.age` does not slip through a `GROUP BY s.age`.
            let grouped = s.group_by.as_ref();
            let group_owner = grouped.map(|g| scope.resolve_owner(g));
            for item in &s.items {
                match item {
                    SelectItem::Wildcard => errors.push(err(
                        span,
                        "SELECT * cannot be combined with aggregation".to_string(),
                    )),
                    SelectItem::Expr { expr, .. } if !expr.contains_aggregate() => {
                        let mut bad = None;
                        expr.walk(&mut |e| {
                            if let Expr::Column(c) = e {
                                let matches_group = match (grouped, &group_owner) {
                                    (Some(g), Some(owner)) => {
                                        g.name == c.name && *owner == scope.resolve_owner(c)
                                    }
                                    _ => false,
                                };
                                if !matches_group && bad.is_none() {
                                    bad = Some(c.clone());
                                }
                            }
                        });
                        if let Some(c) = bad {
                            errors.push(err(
                                span,
                                format!(
                                    "column '{}' must appear in GROUP BY or inside an aggregate",
                                    c
                                ),
                            ));
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    // ========== UPDATE ==========

    fn analyze_update(&self, s: &UpdateStmt, span: Span, errors: &mut Vec<Error>) {
        let Ok(entry) = self.catalog.get(&s.table) else {
            errors.push(err(span, format!("table '{}' does not exist", s.table)));
            return;
        };
        let schema = entry.schema.clone();
        let scope = Scope::single(&s.table, &schema);

        for a in &s.assignments {
            let Some(col) = schema.get_column(&a.column) else {
                errors.push(err(
                    span,
                    format!("column '{}' does not exist in table '{}'", a.column, s.table),
                ));
                continue;
            };
            self.check_expr(&a.value, &scope, span, errors, false);
            if let Expr::Literal(v) = &a.value {
                if let Some(e) = assignability_error(v, &col.name, &col.data_type, span) {
                    errors.push(e);
                }
            }
        }

        if let Some(pred) = &s.where_clause {
            self.check_predicate(pred, &scope, span, errors);
        }
    }

    // ========== DELETE ==========

    fn analyze_delete(&self, s: &DeleteStmt, span: Span, errors: &mut Vec<Error>) {
        let Ok(entry) = self.catalog.get(&s.table) else {
            errors.push(err(span, format!("table '{}' does not exist", s.table)));
            return;
        };
        let schema = entry.schema.clone();
        let scope = Scope::single(&s.table, &schema);

        if let Some(pred) = &s.where_clause {
            self.check_predicate(pred, &scope, span, errors);
        }
    }

    // ========== Name resolution ==========

    fn build_scope(
        &self,
        from: &TableRef,
        join: Option<&JoinClause>,
        span: Span,
        errors: &mut Vec<Error>,
    ) -> Option<Scope> {
        let mut scope = Scope::default();
        let mut ok = true;

        for table_ref in std::iter::once(from).chain(join.map(|j| &j.table)) {
            match self.catalog.get(&table_ref.name) {
                Ok(entry) => {
                    scope
                        .bindings
                        .insert(table_ref.binding().to_string(), entry.schema.clone());
                }
                Err(_) => {
                    errors.push(err(
                        span,
                        format!("table '{}' does not exist", table_ref.name),
                    ));
                    ok = false;
                }
            }
        }

        ok.then_some(scope)
    }

    fn check_column(&self, c: &ColumnRef, scope: &Scope, span: Span, errors: &mut Vec<Error>) {
        match &c.qualifier {
            Some(q) => match scope.bindings.get(q) {
                None => errors.push(err(span, format!("unknown table or alias '{}'", q))),
                Some(schema) => {
                    if !schema.has_column(&c.name) {
                        errors.push(err(
                            span,
                            format!("column '{}' does not exist in '{}'", c.name, q),
                        ));
                    }
                }
            },
            None => {
                let hits = scope
                    .bindings
                    .iter()
                    .filter(|(_, schema)| schema.has_column(&c.name))
                    .count();
                if hits == 0 {
                    errors.push(err(
                        span,
                        format!("column '{}' does not exist in any table", c.name),
                    ));
                } else if hits > 1 {
                    errors.push(err(
                        span,
                        format!("column '{}' is ambiguous; qualify it", c.name),
                    ));
                }
            }
        }
    }

    fn check_expr(
        &self,
        expr: &Expr,
        scope: &Scope,
        span: Span,
        errors: &mut Vec<Error>,
        aggregates_allowed: bool,
    ) {
        match expr {
            Expr::Column(c) => self.check_column(c, scope, span, errors),
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, op, right } => {
                self.check_expr(left, scope, span, errors, aggregates_allowed);
                self.check_expr(right, scope, span, errors, aggregates_allowed);
                if op.is_comparison() {
                    self.check_comparison(left, right, scope, span, errors);
                }
            }
            Expr::Aggregate { func, arg } => {
                if !aggregates_allowed {
                    errors.push(err(
                        span,
                        "aggregates are only allowed in the SELECT list".to_string(),
                    ));
                }
                match arg {
                    AggregateArg::Star => {
                        if *func != AggregateFunc::Count {
                            errors.push(err(
                                span,
                                format!("{}(*) is not valid; only COUNT(*) may use '*'", func),
                            ));
                        }
                    }
                    AggregateArg::Column(c) => self.check_column(c, scope, span, errors),
                }
            }
        }
    }

    fn check_predicate(&self, pred: &Expr, scope: &Scope, span: Span, errors: &mut Vec<Error>) {
        self.check_expr(pred, scope, span, errors, false);
    }

    /// Reject comparisons whose operand variants can never be compared.
    fn check_comparison(
        &self,
        left: &Expr,
        right: &Expr,
        scope: &Scope,
        span: Span,
        errors: &mut Vec<Error>,
    ) {
        let (Some(lt), Some(rt)) = (self.expr_type(left, scope), self.expr_type(right, scope))
        else {
            return; // NULL literals or unresolved columns: nothing to check
        };
        if !lt.is_comparable_with(&rt) {
            errors.push(err(
                span,
                format!("cannot compare {} with {} in '{} ... {}'", lt, rt, left, right),
            ));
        }
    }

    fn expr_type(&self, expr: &Expr, scope: &Scope) -> Option<DataType> {
        match expr {
            Expr::Literal(Value::Int(_)) => Some(DataType::Int),
            Expr::Literal(Value::Float(_)) => Some(DataType::Float),
            Expr::Literal(Value::Varchar(_)) => Some(DataType::Varchar(None)),
            Expr::Literal(Value::Null) => None,
            Expr::Column(c) => scope.column_type(c),
            Expr::BinaryOp { left, op, right } => {
                if op.is_comparison() || *op == BinaryOperator::And {
                    return None;
                }
                let lt = self.expr_type(left, scope)?;
                let rt = self.expr_type(right, scope)?;
                match (lt, rt) {
                    (DataType::Int, DataType::Int) => Some(DataType::Int),
                    (a, b) if a.is_numeric() && b.is_numeric() => Some(DataType::Float),
                    _ => None,
                }
            }
            Expr::Aggregate { func, .. } => match func {
                AggregateFunc::Count => Some(DataType::Int),
                AggregateFunc::Avg => Some(DataType::Float),
                AggregateFunc::Sum => None,
            },
        }
    }
}

/// Tables visible to a statement, keyed by alias or table name.
#[derive(Default)]
struct Scope {
    bindings: BTreeMap<String, Schema>,
}

impl Scope {
    fn single(table: &str, schema: &Schema) -> Self {
        let mut scope = Scope::default();
        scope.bindings.insert(table.to_string(), schema.clone());
        scope
    }

    /// The binding (alias or table name) a column reference belongs to, or
    /// None when it is unknown or ambiguous (reported elsewhere).
    fn resolve_owner(&self, c: &ColumnRef) -> Option<String> {
        match &c.qualifier {
            Some(q) => self
                .bindings
                .get(q)
                .filter(|schema| schema.has_column(&c.name))
                .map(|_| q.clone()),
            None => {
                let mut found = None;
                for (binding, schema) in &self.bindings {
                    if schema.has_column(&c.name) {
                        if found.is_some() {
                            return None;
                        }
                        found = Some(binding.clone());
                    }
                }
                found
            }
        }
    }

    fn column_type(&self, c: &ColumnRef) -> Option<DataType> {
        match &c.qualifier {
            Some(q) => self
                .bindings
                .get(q)
                .and_then(|s| s.get_column(&c.name))
                .map(|col| col.data_type.clone()),
            None => {
                let mut found = None;
                for schema in self.bindings.values() {
                    if let Some(col) = schema.get_column(&c.name) {
                        if found.is_some() {
                            return None; // ambiguous, reported elsewhere
                        }
                        found = Some(col.data_type.clone());
                    }
                }
                found
            }
        }
    }
}

fn err(span: Span, message: String) -> Error {
    Error::semantic(message, span.line, span.column)
}

/// Check that a literal can be stored in a column of the given type.
/// Over-length VARCHAR values are constraint violations, detected here
/// before any storage is touched.
fn assignability_error(
    value: &Value,
    col_name: &str,
    col_type: &DataType,
    span: Span,
) -> Option<Error> {
    match (value, col_type) {
        (Value::Null, _) => None,
        (Value::Int(_), DataType::Int) => None,
        (Value::Int(_), DataType::Float) => None,
        (Value::Float(_), DataType::Float) => None,
        (Value::Varchar(s), DataType::Varchar(limit)) => match limit {
            Some(n) if s.chars().count() > *n => Some(Error::Constraint(format!(
                "value '{}' exceeds VARCHAR({}) for column '{}'",
                s, n, col_name
            ))),
            _ => None,
        },
        _ => Some(err(
            span,
            format!(
                "{} value is not assignable to column '{}' of type {}",
                value.type_name(),
                col_name,
                col_type
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Column;
    use crate::sql::parser::Parser;

    fn test_catalog() -> Catalog {
        let mut catalog = Catalog::new("unused.json");
        catalog
            .create_table(
                "students",
                Schema::from_columns(vec![
                    Column::new("id", DataType::Int).primary_key(true),
                    Column::new("name", DataType::Varchar(Some(20))),
                    Column::new("age", DataType::Int),
                ]),
            )
            .unwrap();
        catalog
            .create_table(
                "courses",
                Schema::from_columns(vec![
                    Column::new("cid", DataType::Int).primary_key(true),
                    Column::new("cname", DataType::Varchar(Some(20))),
                ]),
            )
            .unwrap();
        catalog
    }

    fn analyze_sql(sql: &str) -> std::result::Result<(), Vec<Error>> {
        let catalog = test_catalog();
        let stmt = Parser::new(sql).unwrap().parse_statement().unwrap();
        SemanticAnalyzer::new(&catalog).analyze(&stmt)
    }

    fn first_message(sql: &str) -> String {
        analyze_sql(sql).unwrap_err()[0].to_string()
    }

    #[test]
    fn test_valid_statements_pass() {
        analyze_sql("SELECT name, age FROM students WHERE age > 20;").unwrap();
        analyze_sql("SELECT s.name, c.cname FROM students s JOIN courses c ON s.id = c.cid;")
            .unwrap();
        analyze_sql("INSERT INTO students VALUES (1, 'Alice', 20);").unwrap();
        analyze_sql("UPDATE students SET age = age + 1 WHERE id = 1;").unwrap();
        analyze_sql("SELECT age, COUNT(*) FROM students GROUP BY age;").unwrap();
    }

    #[test]
    fn test_unknown_table() {
        assert!(first_message("SELECT * FROM ghosts;").contains("does not exist"));
    }

    #[test]
    fn test_unknown_column() {
        assert!(first_message("SELECT salary FROM students;")
            .contains("column 'salary' does not exist"));
    }

    #[test]
    fn test_unknown_alias() {
        assert!(first_message(
            "SELECT x.name FROM students s JOIN courses c ON s.id = c.cid;"
        )
        .contains("unknown table or alias 'x'"));
    }

    #[test]
    fn test_insert_arity_mismatch() {
        assert!(first_message("INSERT INTO students VALUES (1, 'Alice');")
            .contains("2 values but 3 columns"));
    }

    #[test]
    fn test_insert_type_mismatch() {
        assert!(first_message("INSERT INTO students VALUES ('one', 'Alice', 20);")
            .contains("not assignable"));
    }

    #[test]
    fn test_varchar_length_is_a_constraint_violation() {
        let errors =
            analyze_sql("INSERT INTO students VALUES (1, 'an unreasonably long name', 20);")
                .unwrap_err();
        assert!(matches!(errors[0], Error::Constraint(_)));
    }

    #[test]
    fn test_incompatible_comparison() {
        assert!(first_message("SELECT * FROM students WHERE name > 3;").contains("cannot compare"));
    }

    #[test]
    fn test_aggregate_in_where_rejected() {
        assert!(first_message("SELECT age FROM students WHERE COUNT(*) > 1;")
            .contains("only allowed in the SELECT list"));
    }

    #[test]
    fn test_star_only_for_count() {
        assert!(first_message("SELECT SUM(*) FROM students;").contains("only COUNT(*)"));
    }

    #[test]
    fn test_group_by_rule() {
        assert!(first_message("SELECT name, COUNT(*) FROM students GROUP BY age;")
            .contains("must appear in GROUP BY"));
    }

    #[test]
    fn test_self_referential_foreign_key_in_create_table() {
        let catalog = Catalog::new("unused.json");
        let stmt = Parser::new(
            "CREATE TABLE tree (id INT PRIMARY KEY, parent INT, \
             FOREIGN KEY (parent) REFERENCES tree(id));",
        )
        .unwrap()
        .parse_statement()
        .unwrap();
        SemanticAnalyzer::new(&catalog).analyze(&stmt).unwrap();

        // The self-reference must still target the primary key.
        let stmt = Parser::new(
            "CREATE TABLE tree (id INT PRIMARY KEY, parent INT, \
             FOREIGN KEY (parent) REFERENCES tree(parent));",
        )
        .unwrap()
        .parse_statement()
        .unwrap();
        let errors = SemanticAnalyzer::new(&catalog).analyze(&stmt).unwrap_err();
        assert!(errors[0].to_string().contains("is not a primary key"));
    }

    fn catalog_with_shared_column() -> Catalog {
        let mut catalog = Catalog::new("unused.json");
        catalog
            .create_table(
                "students",
                Schema::from_columns(vec![
                    Column::new("id", DataType::Int).primary_key(true),
                    Column::new("age", DataType::Int),
                ]),
            )
            .unwrap();
        catalog
            .create_table(
                "courses",
                Schema::from_columns(vec![
                    Column::new("cid", DataType::Int).primary_key(true),
                    Column::new("age", DataType::Int),
                ]),
            )
            .unwrap();
        catalog
    }

    #[test]
    fn test_group_by_distinguishes_same_named_columns_across_tables() {
        let catalog = catalog_with_shared_column();
        let stmt = Parser::new(
            "SELECT s.age, c.age FROM students s JOIN courses c ON s.id = c.cid GROUP BY s.age;",
        )
        .unwrap()
        .parse_statement()
        .unwrap();

        // `c.age` shares the grouping column's bare name but belongs to a
        // different table, so it is not determined by the grouping key.
        let errors = SemanticAnalyzer::new(&catalog).analyze(&stmt).unwrap_err();
        assert!(errors[0].to_string().contains("must appear in GROUP BY"));
        assert!(errors[0].to_string().contains("c.age"));
    }

    #[test]
    fn test_group_by_qualified_column_accepts_matching_references() {
        let catalog = catalog_with_shared_column();
        let stmt = Parser::new(
            "SELECT s.age, COUNT(*) FROM students s JOIN courses c ON s.id = c.cid \
             GROUP BY s.age;",
        )
        .unwrap()
        .parse_statement()
        .unwrap();
        SemanticAnalyzer::new(&catalog).analyze(&stmt).unwrap();
    }

    #[test]
    fn test_group_by_bare_name_still_matches_qualified_reference() {
        // Only students has a `name` column, so the bare grouping column
        // and its qualified use resolve to the same binding.
        let stmt = Parser::new(
            "SELECT s.name, COUNT(*) FROM students s JOIN courses c ON s.id = c.cid \
             GROUP BY name;",
        )
        .unwrap()
        .parse_statement()
        .unwrap();
        SemanticAnalyzer::new(&test_catalog()).analyze(&stmt).unwrap();
    }

    #[test]
    fn test_multiple_errors_collected() {
        let errors = analyze_sql("SELECT salary, dept FROM students;").unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
