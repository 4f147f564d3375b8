use crate::catalog::Catalog;
use crate::executor::planner::LogicalPlan;
use crate::sql::ast::Expr;
use tracing::debug;

/// Predicate push-down as a pure plan rewrite.
///
/// A WHERE clause is split on its top-level ANDs. A conjunct whose column
/// references all resolve to one scan binding is absorbed into that scan's
/// predicate; everything else stays in a Filter above the join. The join's
/// ON predicate is untouched. Conjunct order is preserved on both sides so
/// execution order stays deterministic. The rewrite never changes the
/// result set, only the plan shape, which makes it safe to disable.
pub struct Optimizer<'a> {
    catalog: &'a Catalog,
    push_down: bool,
}

impl<'a> Optimizer<'a> {
    pub fn new(catalog: &'a Catalog, push_down: bool) -> Self {
        Self { catalog, push_down }
    }

    /// Optimize a logical plan.
    pub fn optimize(&self, plan: LogicalPlan) -> LogicalPlan {
        if !self.push_down {
            return plan;
        }
        self.rewrite(plan)
    }

    fn rewrite(&self, plan: LogicalPlan) -> LogicalPlan {
        match plan {
            LogicalPlan::Filter { input, predicate } => {
                let input = self.rewrite(*input);
                self.push_into(input, predicate)
            }
            LogicalPlan::Project { input, items } => LogicalPlan::Project {
                input: Box::new(self.rewrite(*input)),
                items,
            },
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
            } => LogicalPlan::Aggregate {
                input: Box::new(self.rewrite(*input)),
                group_by,
                aggregates,
            },
            LogicalPlan::Sort {
                input,
                key,
                descending,
            } => LogicalPlan::Sort {
                input: Box::new(self.rewrite(*input)),
                key,
                descending,
            },
            LogicalPlan::NestedLoopJoin {
                left,
                right,
                predicate,
            } => LogicalPlan::NestedLoopJoin {
                left: Box::new(self.rewrite(*left)),
                right: Box::new(self.rewrite(*right)),
                predicate,
            },
            other => other,
        }
    }

    /// Distribute a filter's conjuncts over the scans below it.
    fn push_into(&self, mut tree: LogicalPlan, predicate: Expr) -> LogicalPlan {
        let bindings = scan_bindings(&tree);
        let mut residual = Vec::new();

        for conjunct in predicate.split_conjuncts() {
            match self.sole_binding(&conjunct, &bindings) {
                Some(binding) if absorb(&mut tree, &binding, &conjunct) => {
                    debug!(conjunct = %conjunct, scan = %binding, "pushed predicate into scan");
                }
                _ => residual.push(conjunct),
            }
        }

        match Expr::join_conjuncts(residual) {
            Some(predicate) => LogicalPlan::Filter {
                input: Box::new(tree),
                predicate,
            },
            None => tree,
        }
    }

    /// The single scan binding a conjunct refers to, or None when it spans
    /// several bindings (or none, e.g. a literal-only predicate).
    fn sole_binding(&self, conjunct: &Expr, bindings: &[(String, String)]) -> Option<String> {
        let mut found: Option<String> = None;
        let mut conflict = false;

        conjunct.walk(&mut |e| {
            if let Expr::Column(c) = e {
                let owner = match &c.qualifier {
                    Some(q) => bindings
                        .iter()
                        .find(|(binding, _)| binding == q)
                        .map(|(binding, _)| binding.clone()),
                    // A bare column belongs to whichever table declares it;
                    // the analyzer already rejected ambiguous names.
                    None => {
                        let mut owner = None;
                        for (binding, table) in bindings {
                            let has = self
                                .catalog
                                .get(table)
                                .map(|e| e.schema.has_column(&c.name))
                                .unwrap_or(false);
                            if has {
                                owner = Some(binding.clone());
                                break;
                            }
                        }
                        owner
                    }
                };

                match (&found, owner) {
                    (_, None) => conflict = true,
                    (None, Some(b)) => found = Some(b),
                    (Some(prev), Some(b)) if *prev != b => conflict = true,
                    _ => {}
                }
            }
        });

        if conflict {
            None
        } else {
            found
        }
    }
}

/// `(binding, table)` pairs for every scan in the subtree.
fn scan_bindings(plan: &LogicalPlan) -> Vec<(String, String)> {
    match plan {
        LogicalPlan::SeqScan { table, alias, .. } => {
            let binding = alias.clone().unwrap_or_else(|| table.clone());
            vec![(binding, table.clone())]
        }
        LogicalPlan::NestedLoopJoin { left, right, .. } => {
            let mut out = scan_bindings(left);
            out.extend(scan_bindings(right));
            out
        }
        LogicalPlan::Filter { input, .. } => scan_bindings(input),
        _ => Vec::new(),
    }
}

/// Absorb a conjunct into the scan with the given binding, appending with
/// AND so earlier pushed conjuncts evaluate first.
fn absorb(plan: &mut LogicalPlan, binding: &str, conjunct: &Expr) -> bool {
    match plan {
        LogicalPlan::SeqScan {
            table,
            alias,
            predicate,
        } => {
            let scan_binding = alias.as_deref().unwrap_or(table);
            if scan_binding != binding {
                return false;
            }
            *predicate = match predicate.take() {
                Some(existing) => Expr::join_conjuncts(vec![existing, conjunct.clone()]),
                None => Some(conjunct.clone()),
            };
            true
        }
        LogicalPlan::NestedLoopJoin { left, right, .. } => {
            absorb(left, binding, conjunct) || absorb(right, binding, conjunct)
        }
        LogicalPlan::Filter { input, .. } => absorb(input, binding, conjunct),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType, Schema};
    use crate::executor::planner::Planner;
    use crate::sql::Parser;

    fn test_catalog() -> Catalog {
        let mut catalog = Catalog::new("unused.json");
        catalog
            .create_table(
                "students",
                Schema::from_columns(vec![
                    Column::new("id", DataType::Int).primary_key(true),
                    Column::new("name", DataType::Varchar(None)),
                    Column::new("age", DataType::Int),
                ]),
            )
            .unwrap();
        catalog
            .create_table(
                "courses",
                Schema::from_columns(vec![
                    Column::new("cid", DataType::Int).primary_key(true),
                    Column::new("cname", DataType::Varchar(None)),
                ]),
            )
            .unwrap();
        catalog
    }

    fn optimize_sql(sql: &str) -> LogicalPlan {
        let catalog = test_catalog();
        let stmt = Parser::new(sql).unwrap().parse_statement().unwrap();
        let plan = Planner::new(&catalog).plan(stmt).unwrap();
        Optimizer::new(&catalog, true).optimize(plan)
    }

    #[test]
    fn test_single_table_filter_absorbed_into_scan() {
        let plan = optimize_sql("SELECT * FROM students WHERE age > 20;");

        match plan {
            LogicalPlan::Project { input, .. } => match *input {
                LogicalPlan::SeqScan { predicate, .. } => {
                    assert_eq!(predicate.unwrap().to_string(), "age > 20");
                }
                other => panic!("expected SeqScan, got {:?}", other),
            },
            other => panic!("expected Project, got {:?}", other),
        }
    }

    #[test]
    fn test_join_conjuncts_split_between_scans() {
        let plan = optimize_sql(
            "SELECT s.name FROM students s JOIN courses c ON s.id = c.cid \
             WHERE s.age > 20 AND c.cname = 'CS';",
        );

        match plan {
            LogicalPlan::Project { input, .. } => match *input {
                LogicalPlan::NestedLoopJoin {
                    left,
                    right,
                    predicate,
                } => {
                    // ON predicate stays on the join.
                    assert_eq!(predicate.to_string(), "s.id = c.cid");
                    match *left {
                        LogicalPlan::SeqScan { predicate, .. } => {
                            assert_eq!(predicate.unwrap().to_string(), "s.age > 20");
                        }
                        other => panic!("expected left SeqScan, got {:?}", other),
                    }
                    match *right {
                        LogicalPlan::SeqScan { predicate, .. } => {
                            assert_eq!(predicate.unwrap().to_string(), "c.cname = 'CS'");
                        }
                        other => panic!("expected right SeqScan, got {:?}", other),
                    }
                }
                other => panic!("expected join without residual filter, got {:?}", other),
            },
            other => panic!("expected Project, got {:?}", other),
        }
    }

    #[test]
    fn test_cross_table_conjunct_stays_in_filter() {
        let plan = optimize_sql(
            "SELECT s.name FROM students s JOIN courses c ON s.id = c.cid \
             WHERE s.age > c.cid AND s.age > 20;",
        );

        match plan {
            LogicalPlan::Project { input, .. } => match *input {
                LogicalPlan::Filter { input, predicate } => {
                    assert_eq!(predicate.to_string(), "s.age > c.cid");
                    match *input {
                        LogicalPlan::NestedLoopJoin { left, .. } => match *left {
                            LogicalPlan::SeqScan { predicate, .. } => {
                                assert_eq!(predicate.unwrap().to_string(), "s.age > 20");
                            }
                            other => panic!("expected SeqScan, got {:?}", other),
                        },
                        other => panic!("expected join, got {:?}", other),
                    }
                }
                other => panic!("expected residual Filter, got {:?}", other),
            },
            other => panic!("expected Project, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_columns_resolve_through_catalog() {
        let plan = optimize_sql(
            "SELECT s.name FROM students s JOIN courses c ON s.id = c.cid WHERE age > 20;",
        );

        // `age` only exists in students, so the conjunct lands on its scan.
        match plan {
            LogicalPlan::Project { input, .. } => match *input {
                LogicalPlan::NestedLoopJoin { left, .. } => match *left {
                    LogicalPlan::SeqScan { predicate, .. } => {
                        assert_eq!(predicate.unwrap().to_string(), "age > 20");
                    }
                    other => panic!("expected SeqScan, got {:?}", other),
                },
                other => panic!("expected join, got {:?}", other),
            },
            other => panic!("expected Project, got {:?}", other),
        }
    }

    #[test]
    fn test_disabled_optimizer_is_identity() {
        let catalog = test_catalog();
        let stmt = Parser::new("SELECT * FROM students WHERE age > 20;")
            .unwrap()
            .parse_statement()
            .unwrap();
        let plan = Planner::new(&catalog).plan(stmt).unwrap();
        let optimized = Optimizer::new(&catalog, false).optimize(plan.clone());
        assert_eq!(optimized, plan);
    }

    #[test]
    fn test_pushed_conjunct_order_preserved() {
        let plan = optimize_sql("SELECT * FROM students WHERE age > 20 AND age < 30 AND id != 2;");

        match plan {
            LogicalPlan::Project { input, .. } => match *input {
                LogicalPlan::SeqScan { predicate, .. } => {
                    assert_eq!(
                        predicate.unwrap().to_string(),
                        "age > 20 AND age < 30 AND id != 2"
                    );
                }
                other => panic!("expected SeqScan, got {:?}", other),
            },
            other => panic!("expected Project, got {:?}", other),
        }
    }
}
