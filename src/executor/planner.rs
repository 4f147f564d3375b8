//! Query planner for MiniDB
//!
//! Lowers a validated AST into a logical plan tree of relational
//! operators. The tree is independent of the physical execution strategy;
//! the optimizer rewrites it and the executor interprets it.

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::sql::ast::*;

/// Logical plan node
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    /// Scan a table under a binding name, filtering with an absorbed
    /// predicate when the optimizer pushed one down.
    SeqScan {
        table: String,
        alias: Option<String>,
        predicate: Option<Expr>,
    },
    /// Filter rows
    Filter {
        input: Box<LogicalPlan>,
        predicate: Expr,
    },
    /// Inner nested-loop join
    NestedLoopJoin {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        predicate: Expr,
    },
    /// Project expressions into output columns
    Project {
        input: Box<LogicalPlan>,
        items: Vec<SelectItem>,
    },
    /// Group and aggregate
    Aggregate {
        input: Box<LogicalPlan>,
        group_by: Vec<ColumnRef>,
        aggregates: Vec<Expr>,
    },
    /// Sort rows
    Sort {
        input: Box<LogicalPlan>,
        key: ColumnRef,
        descending: bool,
    },
    /// Insert rows into a table
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expr>>,
    },
    /// Update rows in a table
    Update {
        table: String,
        assignments: Vec<Assignment>,
        predicate: Option<Expr>,
    },
    /// Delete rows from a table
    Delete {
        table: String,
        predicate: Option<Expr>,
    },
    /// Create a table
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
        primary_key: Option<String>,
        foreign_keys: Vec<ForeignKeyDef>,
    },
    /// Drop a table
    DropTable { table: String },
}

impl LogicalPlan {
    /// Render the plan as an indented tree, one operator per line.
    pub fn explain(&self, indent: usize) -> String {
        let pad = "  ".repeat(indent);
        match self {
            LogicalPlan::SeqScan {
                table,
                alias,
                predicate,
            } => {
                let mut s = format!("{}SeqScan({}", pad, table);
                if let Some(a) = alias {
                    s.push_str(&format!(" AS {}", a));
                }
                if let Some(p) = predicate {
                    s.push_str(&format!(", cond={}", p));
                }
                s.push(')');
                s
            }
            LogicalPlan::Filter { input, predicate } => {
                format!("{}Filter({})\n{}", pad, predicate, input.explain(indent + 1))
            }
            LogicalPlan::NestedLoopJoin {
                left,
                right,
                predicate,
            } => format!(
                "{}NestedLoopJoin(cond={})\n{}\n{}",
                pad,
                predicate,
                left.explain(indent + 1),
                right.explain(indent + 1)
            ),
            LogicalPlan::Project { input, items } => {
                let cols: Vec<String> = items
                    .iter()
                    .map(|i| match i {
                        SelectItem::Wildcard => "*".to_string(),
                        SelectItem::Expr { expr, alias } => match alias {
                            Some(a) => format!("{} AS {}", expr, a),
                            None => expr.to_string(),
                        },
                    })
                    .collect();
                format!(
                    "{}Project({})\n{}",
                    pad,
                    cols.join(", "),
                    input.explain(indent + 1)
                )
            }
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let keys: Vec<String> = group_by.iter().map(|c| c.to_string()).collect();
                let aggs: Vec<String> = aggregates.iter().map(|a| a.to_string()).collect();
                format!(
                    "{}Aggregate(keys=[{}], aggs=[{}])\n{}",
                    pad,
                    keys.join(", "),
                    aggs.join(", "),
                    input.explain(indent + 1)
                )
            }
            LogicalPlan::Sort {
                input,
                key,
                descending,
            } => format!(
                "{}Sort({} {})\n{}",
                pad,
                key,
                if *descending { "DESC" } else { "ASC" },
                input.explain(indent + 1)
            ),
            LogicalPlan::Insert { table, rows, .. } => {
                format!("{}Insert({}, {} row(s))", pad, table, rows.len())
            }
            LogicalPlan::Update { table, .. } => format!("{}Update({})", pad, table),
            LogicalPlan::Delete { table, .. } => format!("{}Delete({})", pad, table),
            LogicalPlan::CreateTable { table, .. } => format!("{}CreateTable({})", pad, table),
            LogicalPlan::DropTable { table } => format!("{}DropTable({})", pad, table),
        }
    }
}

/// Query planner
pub struct Planner<'a> {
    #[allow(dead_code)]
    catalog: &'a Catalog,
}

impl<'a> Planner<'a> {
    /// Create a new planner
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Plan a statement
    pub fn plan(&self, stmt: Statement) -> Result<LogicalPlan> {
        match stmt {
            Statement::Select(select) => self.plan_select(select),
            Statement::Insert(insert) => Ok(LogicalPlan::Insert {
                table: insert.table,
                columns: insert.columns,
                rows: insert.rows,
            }),
            Statement::Update(update) => Ok(LogicalPlan::Update {
                table: update.table,
                assignments: update.assignments,
                predicate: update.where_clause,
            }),
            Statement::Delete(delete) => Ok(LogicalPlan::Delete {
                table: delete.table,
                predicate: delete.where_clause,
            }),
            Statement::CreateTable(create) => Ok(LogicalPlan::CreateTable {
                table: create.table,
                columns: create.columns,
                primary_key: create.primary_key,
                foreign_keys: create.foreign_keys,
            }),
            Statement::DropTable(drop) => Ok(LogicalPlan::DropTable { table: drop.table }),
        }
    }

    fn plan_select(&self, select: SelectStmt) -> Result<LogicalPlan> {
        // Scans, then the join.
        let mut plan = LogicalPlan::SeqScan {
            table: select.from.name.clone(),
            alias: select.from.alias.clone(),
            predicate: None,
        };

        if let Some(join) = select.join {
            let right = LogicalPlan::SeqScan {
                table: join.table.name.clone(),
                alias: join.table.alias.clone(),
                predicate: None,
            };
            plan = LogicalPlan::NestedLoopJoin {
                left: Box::new(plan),
                right: Box::new(right),
                predicate: join.on,
            };
        }

        // WHERE stays a Filter here; push-down is the optimizer's rewrite.
        if let Some(predicate) = select.where_clause {
            plan = LogicalPlan::Filter {
                input: Box::new(plan),
                predicate,
            };
        }

        // Any aggregate or a GROUP BY inserts an Aggregate node.
        let aggregates = collect_aggregates(&select.items);
        if !aggregates.is_empty() || select.group_by.is_some() {
            let group_by: Vec<ColumnRef> = select.group_by.into_iter().collect();
            plan = LogicalPlan::Aggregate {
                input: Box::new(plan),
                group_by,
                aggregates,
            };
        }

        // ORDER BY is the outermost non-projection operator.
        if let Some(order) = select.order_by {
            plan = LogicalPlan::Sort {
                input: Box::new(plan),
                key: order.column,
                descending: order.descending,
            };
        }

        if select.items.is_empty() {
            return Err(Error::Plan("empty select list".to_string()));
        }

        Ok(LogicalPlan::Project {
            input: Box::new(plan),
            items: select.items,
        })
    }
}

/// Every distinct aggregate call in the select list, in first-seen order.
fn collect_aggregates(items: &[SelectItem]) -> Vec<Expr> {
    let mut out: Vec<Expr> = Vec::new();
    for item in items {
        if let SelectItem::Expr { expr, .. } = item {
            expr.walk(&mut |e| {
                if matches!(e, Expr::Aggregate { .. }) && !out.contains(e) {
                    out.push(e.clone());
                }
            });
        }
    }
    out
}
