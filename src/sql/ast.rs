//! SQL Abstract Syntax Tree (AST)
//!
//! Statements and expressions are tagged variants so every consumer matches
//! exhaustively on the node kinds it handles.

use crate::catalog::DataType;
use crate::storage::Value;
use std::fmt;

/// A source position attached to a statement for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A SQL statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable(CreateTableStmt),
    DropTable(DropTableStmt),
    Insert(InsertStmt),
    Select(SelectStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
}

impl Statement {
    /// Source position of the statement's first token.
    pub fn span(&self) -> Span {
        match self {
            Statement::CreateTable(s) => s.span,
            Statement::DropTable(s) => s.span,
            Statement::Insert(s) => s.span,
            Statement::Select(s) => s.span,
            Statement::Update(s) => s.span,
            Statement::Delete(s) => s.span,
        }
    }
}

/// CREATE TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStmt {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    /// Table-level `PRIMARY KEY(col)` constraint, if present.
    pub primary_key: Option<String>,
    /// `FOREIGN KEY (col) REFERENCES table(col)` constraints.
    pub foreign_keys: Vec<ForeignKeyDef>,
    pub span: Span,
}

/// Column definition
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    /// Column-level `PRIMARY KEY`.
    pub primary_key: bool,
}

/// Table-level foreign key constraint
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyDef {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

/// DROP TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub struct DropTableStmt {
    pub table: String,
    pub span: Span,
}

/// INSERT statement
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table: String,
    /// Explicit column list, if present.
    pub columns: Option<Vec<String>>,
    /// One expression row per VALUES tuple.
    pub rows: Vec<Vec<Expr>>,
    pub span: Span,
}

/// SELECT statement
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    pub items: Vec<SelectItem>,
    pub from: TableRef,
    pub join: Option<JoinClause>,
    pub where_clause: Option<Expr>,
    /// Single grouping column, optionally qualified.
    pub group_by: Option<ColumnRef>,
    pub order_by: Option<OrderBy>,
    pub span: Span,
}

/// A single item in the SELECT list
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// All columns (*)
    Wildcard,
    /// An expression with optional `AS` alias
    Expr { expr: Expr, alias: Option<String> },
}

/// Table reference with optional alias
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// The name other clauses use to refer to this table.
    pub fn binding(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Inner join clause
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub table: TableRef,
    pub on: Expr,
}

/// ORDER BY clause
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub descending: bool,
}

/// UPDATE statement
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub table: String,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expr>,
    pub span: Span,
}

/// Column assignment (for UPDATE)
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

/// DELETE statement
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub table: String,
    pub where_clause: Option<Expr>,
    pub span: Span,
}

/// A possibly-qualified column reference
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(qualifier: Option<String>, name: impl Into<String>) -> Self {
        Self {
            qualifier,
            name: name.into(),
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            qualifier: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}.{}", q, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// SQL expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference
    Column(ColumnRef),
    /// Literal value
    Literal(Value),
    /// Binary operation
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    /// Aggregate call
    Aggregate { func: AggregateFunc, arg: AggregateArg },
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Comparison
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    // Logical
    And,
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::Neq
                | BinaryOperator::Lt
                | BinaryOperator::Gt
                | BinaryOperator::Lte
                | BinaryOperator::Gte
        )
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::Neq => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Gt => ">",
            BinaryOperator::Lte => "<=",
            BinaryOperator::Gte => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate function kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunc::Count => write!(f, "COUNT"),
            AggregateFunc::Sum => write!(f, "SUM"),
            AggregateFunc::Avg => write!(f, "AVG"),
        }
    }
}

/// Aggregate argument: `*` (COUNT only) or a scalar column.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateArg {
    Star,
    Column(ColumnRef),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{}", c),
            Expr::Literal(Value::Varchar(s)) => write!(f, "'{}'", s),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::BinaryOp { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Expr::Aggregate { func, arg } => match arg {
                AggregateArg::Star => write!(f, "{}(*)", func),
                AggregateArg::Column(c) => write!(f, "{}({})", func, c),
            },
        }
    }
}

impl Expr {
    /// Walk the expression, calling `f` on every node.
    pub fn walk(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        if let Expr::BinaryOp { left, right, .. } = self {
            left.walk(f);
            right.walk(f);
        }
    }

    /// Whether any node in the expression is an aggregate call.
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, Expr::Aggregate { .. }) {
                found = true;
            }
        });
        found
    }

    /// Split a predicate on its top-level ANDs, preserving order.
    pub fn split_conjuncts(self) -> Vec<Expr> {
        match self {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                let mut out = left.split_conjuncts();
                out.extend(right.split_conjuncts());
                out
            }
            other => vec![other],
        }
    }

    /// Rebuild a predicate from conjuncts, preserving order.
    pub fn join_conjuncts(conjuncts: Vec<Expr>) -> Option<Expr> {
        let mut iter = conjuncts.into_iter();
        let first = iter.next()?;
        Some(iter.fold(first, |acc, c| Expr::BinaryOp {
            left: Box::new(acc),
            op: BinaryOperator::And,
            right: Box::new(c),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str) -> Expr {
        Expr::Column(ColumnRef::bare(name))
    }

    fn cmp(name: &str, op: BinaryOperator, v: i64) -> Expr {
        Expr::BinaryOp {
            left: Box::new(col(name)),
            op,
            right: Box::new(Expr::Literal(Value::Int(v))),
        }
    }

    #[test]
    fn test_expr_display() {
        let e = cmp("age", BinaryOperator::Gt, 20);
        assert_eq!(e.to_string(), "age > 20");

        let agg = Expr::Aggregate {
            func: AggregateFunc::Count,
            arg: AggregateArg::Star,
        };
        assert_eq!(agg.to_string(), "COUNT(*)");

        let qualified = Expr::Column(ColumnRef::new(Some("s".into()), "name"));
        assert_eq!(qualified.to_string(), "s.name");
    }

    #[test]
    fn test_split_and_join_conjuncts() {
        let a = cmp("a", BinaryOperator::Eq, 1);
        let b = cmp("b", BinaryOperator::Gt, 2);
        let c = cmp("c", BinaryOperator::Lt, 3);
        let pred = Expr::join_conjuncts(vec![a.clone(), b.clone(), c.clone()]).unwrap();

        let parts = pred.split_conjuncts();
        assert_eq!(parts, vec![a, b, c]);
    }

    #[test]
    fn test_contains_aggregate() {
        let plain = cmp("a", BinaryOperator::Eq, 1);
        assert!(!plain.contains_aggregate());

        let nested = Expr::BinaryOp {
            left: Box::new(Expr::Aggregate {
                func: AggregateFunc::Sum,
                arg: AggregateArg::Column(ColumnRef::bare("age")),
            }),
            op: BinaryOperator::Add,
            right: Box::new(Expr::Literal(Value::Int(1))),
        };
        assert!(nested.contains_aggregate());
    }
}
