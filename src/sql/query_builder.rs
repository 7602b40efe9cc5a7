//! Lowers compiled query plans into SQL statements. Identifiers are always
//! quoted; literal values are rendered as escaped SQL literals.

use super::ast::{
    BinaryOperator, Expr, Function, FunctionArgExpr, Ident, Join, JoinOperator, ObjectName,
    OrderByExpr, Query, SelectItem, Statement, TableFactor, TableWithJoins, UnaryOperator, Value,
};
use crate::engine::{
    compiler::{ColumnRef, CountPlan, PlanJoin, PlanTarget, Predicate, QueryPlan, ORIGIN_ALIAS},
    expr::ast::{AggregateFunction, CompareOp},
    result::ScalarValue,
};

/// The output column of a count statement.
pub const COUNT_COLUMN: &str = "Count";

fn aggregate_function_name(function: &AggregateFunction) -> &'static str {
    match function {
        AggregateFunction::Sum => "SUM",
        AggregateFunction::Count => "COUNT",
        AggregateFunction::Min => "MIN",
        AggregateFunction::Max => "MAX",
        AggregateFunction::Avg => "AVG",
    }
}

fn sql_function(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Function(Function {
        name: ObjectName(vec![Ident::unquoted(name)]),
        args: args.into_iter().map(FunctionArgExpr::Expr).collect(),
        distinct: false,
    })
}

fn column_expr(column: &ColumnRef) -> Expr {
    Expr::CompoundIdentifier(vec![
        Ident::quoted(&column.table_alias),
        Ident::quoted(&column.column),
    ])
}

fn target_expr(target: &PlanTarget) -> Expr {
    match target {
        PlanTarget::Column(column) => column_expr(column),
        PlanTarget::Aggregate { function, column } => sql_function(
            aggregate_function_name(function),
            vec![column_expr(column)],
        ),
    }
}

fn value_expr(value: &ScalarValue) -> Expr {
    Expr::Value(match value {
        ScalarValue::Null => Value::Null,
        ScalarValue::Bool(b) => Value::Boolean(*b),
        ScalarValue::Int(n) => Value::Number(n.to_string()),
        ScalarValue::Decimal(n) => Value::Number(n.to_string()),
        ScalarValue::String(s) => Value::SingleQuotedString(s.clone()),
    })
}

/// Escapes the LIKE metacharacters so a searched-for `%` matches literally.
fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn like_text(value: &ScalarValue) -> String {
    match value {
        ScalarValue::String(s) => escape_like(s),
        ScalarValue::Int(n) => n.to_string(),
        ScalarValue::Decimal(n) => n.to_string(),
        ScalarValue::Bool(b) => b.to_string(),
        ScalarValue::Null => String::new(),
    }
}

// composite operands keep their own parentheses so precedence survives rendering
fn maybe_nested(expr: Expr) -> Expr {
    match expr {
        Expr::BinaryOp {
            op: BinaryOperator::And | BinaryOperator::Or,
            ..
        } => Expr::Nested(Box::new(expr)),
        other => other,
    }
}

fn predicate_expr(predicate: &Predicate) -> Expr {
    match predicate {
        Predicate::And(left, right) => Expr::BinaryOp {
            left: Box::new(maybe_nested(predicate_expr(left))),
            op: BinaryOperator::And,
            right: Box::new(maybe_nested(predicate_expr(right))),
        },
        Predicate::Or(left, right) => Expr::BinaryOp {
            left: Box::new(maybe_nested(predicate_expr(left))),
            op: BinaryOperator::Or,
            right: Box::new(maybe_nested(predicate_expr(right))),
        },
        Predicate::Not(inner) => Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: Box::new(Expr::Nested(Box::new(predicate_expr(inner)))),
        },
        Predicate::Compare { target, op, value } => {
            let left = Box::new(target_expr(target));
            let (op, right) = match op {
                CompareOp::Eq => (BinaryOperator::Eq, value_expr(value)),
                CompareOp::Ne => (BinaryOperator::NotEq, value_expr(value)),
                CompareOp::Gt => (BinaryOperator::Gt, value_expr(value)),
                CompareOp::Ge => (BinaryOperator::GtEq, value_expr(value)),
                CompareOp::Lt => (BinaryOperator::Lt, value_expr(value)),
                CompareOp::Le => (BinaryOperator::LtEq, value_expr(value)),
                CompareOp::Contains => (
                    BinaryOperator::Like,
                    Expr::Value(Value::SingleQuotedString(format!(
                        "%{}%",
                        like_text(value)
                    ))),
                ),
                CompareOp::Startswith => (
                    BinaryOperator::Like,
                    Expr::Value(Value::SingleQuotedString(format!("{}%", like_text(value)))),
                ),
            };
            Expr::BinaryOp {
                left,
                op,
                right: Box::new(right),
            }
        }
        Predicate::In { target, values } => Expr::InList {
            expr: Box::new(target_expr(target)),
            list: values.iter().map(value_expr).collect(),
        },
        Predicate::IsNull(target) => Expr::IsNull(Box::new(target_expr(target))),
        Predicate::IsNotNull(target) => Expr::IsNotNull(Box::new(target_expr(target))),
    }
}

fn join_clause(join: &PlanJoin) -> Join {
    let constraint = Expr::BinaryOp {
        left: Box::new(Expr::CompoundIdentifier(vec![
            Ident::quoted(&join.parent_alias),
            Ident::quoted(&join.parent_column),
        ])),
        op: BinaryOperator::Eq,
        right: Box::new(Expr::CompoundIdentifier(vec![
            Ident::quoted(&join.alias),
            Ident::quoted(&join.child_column),
        ])),
    };
    Join {
        relation: TableFactor::Table {
            name: ObjectName(vec![Ident::quoted(&join.table)]),
            alias: Some(Ident::quoted(&join.alias)),
        },
        join_operator: JoinOperator::LeftOuter(constraint),
    }
}

fn from_clause(source_table: &str, joins: &[PlanJoin]) -> Vec<TableWithJoins> {
    vec![TableWithJoins {
        relation: TableFactor::Table {
            name: ObjectName(vec![Ident::quoted(source_table)]),
            alias: Some(Ident::quoted(ORIGIN_ALIAS)),
        },
        joins: joins.iter().map(join_clause).collect(),
    }]
}

pub fn build_query_statement(plan: &QueryPlan) -> Statement {
    let projection = plan
        .columns
        .iter()
        .map(|column| SelectItem::ExprWithAlias {
            expr: target_expr(&column.target),
            alias: Ident::quoted(&column.name),
        })
        .collect();

    let order_by = plan
        .order_by
        .iter()
        .map(|item| OrderByExpr {
            expr: target_expr(&item.target),
            asc: Some(!item.descending),
        })
        .collect();

    let query = Query::new(projection)
        .from(from_clause(&plan.source_table, &plan.joins))
        .predicate(plan.predicate.as_ref().map(predicate_expr))
        .group_by(plan.group_by.iter().map(column_expr).collect())
        .having(plan.having.as_ref().map(predicate_expr))
        .order_by(order_by)
        .limit(plan.fetch_limit)
        .offset((plan.skip > 0).then_some(plan.skip));

    Statement(query)
}

/// `SELECT COUNT(*) FROM (SELECT 1 … LIMIT cap + 1)`: the inner limit keeps
/// the backend from paying for an exact count past the cap.
pub fn build_count_statement(plan: &CountPlan) -> Statement {
    let inner = Query::new(vec![SelectItem::UnnamedExpr(Expr::Value(Value::Number(
        "1".to_owned(),
    )))])
    .from(from_clause(&plan.source_table, &plan.joins))
    .predicate(plan.predicate.as_ref().map(predicate_expr))
    .limit(Some(plan.cap.saturating_add(1)))
    .boxed();

    let count = Expr::Function(Function {
        name: ObjectName(vec![Ident::unquoted("COUNT")]),
        args: vec![FunctionArgExpr::Wildcard],
        distinct: false,
    });

    let query = Query::new(vec![SelectItem::ExprWithAlias {
        expr: count,
        alias: Ident::quoted(COUNT_COLUMN),
    }])
    .from(vec![TableWithJoins {
        relation: TableFactor::Derived {
            subquery: inner,
            alias: Some(Ident::quoted("_count")),
        },
        joins: vec![],
    }]);

    Statement(query)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::engine::{
        binder::{bind_expansion, bind_filter},
        compiler::{self, QueryLimits},
        expr::parser,
        fixtures,
    };

    fn customer_plan(filter: Option<&str>, skip: u64, top: Option<u64>) -> QueryPlan {
        let model = fixtures::model();
        let root = model.entity_type("Customer").unwrap();
        let select = parser::parse_paths("Name, Code").unwrap();
        let expansion = bind_expansion(Some(&select), None, root, &model).unwrap();
        let filter = filter.map(|text| {
            bind_filter(&parser::parse_filter(text).unwrap(), root, &model).unwrap()
        });
        compiler::compile_flat(
            root,
            &model,
            None,
            filter.as_ref(),
            &[],
            &expansion,
            skip,
            top,
            &QueryLimits::default(),
        )
        .unwrap()
    }

    #[test]
    fn renders_contains_and_eq_as_like_and_equals() {
        let plan = customer_plan(Some("Name contains 'Jo' or Code eq 'C1'"), 0, Some(10));
        let sql = build_query_statement(&plan).to_string();
        assert!(
            sql.contains(r#"WHERE "_origin"."Name" LIKE '%Jo%' OR "_origin"."Code" = 'C1'"#),
            "unexpected sql: {sql}"
        );
    }

    #[test]
    fn renders_full_statement_with_paging() {
        let plan = customer_plan(None, 10, Some(5));
        let sql = build_query_statement(&plan).to_string();
        assert_eq!(
            sql,
            concat!(
                r#"SELECT "_origin"."Id" AS "Id", "_origin"."Name" AS "Name", "_origin"."Code" AS "Code""#,
                r#" FROM "Customers" AS "_origin""#,
                r#" ORDER BY "_origin"."Id" ASC"#,
                r#" LIMIT 6 OFFSET 10;"#,
            ),
        );
    }

    #[test]
    fn renders_navigation_joins() {
        let model = fixtures::model();
        let root = model.entity_type("Document").unwrap();
        let select = parser::parse_paths("Memo, Customer.Region.Name").unwrap();
        let expansion = bind_expansion(Some(&select), None, root, &model).unwrap();
        let plan = compiler::compile_flat(
            root,
            &model,
            None,
            None,
            &[],
            &expansion,
            0,
            None,
            &QueryLimits::default(),
        )
        .unwrap();
        let sql = build_query_statement(&plan).to_string();
        assert!(sql.contains(
            r#"LEFT JOIN "Customers" AS "_nav.Customer" ON "_origin"."CustomerId" = "_nav.Customer"."Id""#
        ));
        assert!(sql.contains(
            r#"LEFT JOIN "Regions" AS "_nav.Customer.Region" ON "_nav.Customer"."RegionId" = "_nav.Customer.Region"."Id""#
        ));
    }

    #[test]
    fn renders_aggregates_with_group_by_and_having() {
        let model = fixtures::model();
        let root = model.entity_type("Document").unwrap();
        let select = parser::parse_aggregate_select("Account, sum(Amount)").unwrap();
        let (dimensions, measures) =
            crate::engine::binder::bind_aggregate_select(&select, root, &model).unwrap();
        let having = crate::engine::binder::bind_having(
            &parser::parse_having("sum(Amount) gt 100").unwrap(),
            root,
            &model,
        )
        .unwrap();
        let plan = compiler::compile_aggregate(
            root,
            &model,
            None,
            None,
            &dimensions,
            &measures,
            Some(&having),
            None,
            &QueryLimits::default(),
        )
        .unwrap();
        let sql = build_query_statement(&plan).to_string();
        assert!(sql.contains(r#"SUM("_origin"."Amount") AS "sum(Amount)""#));
        assert!(sql.contains(r#"GROUP BY "_origin"."AccountId""#));
        assert!(sql.contains(r#"HAVING SUM("_origin"."Amount") > 100"#));
    }

    #[test]
    fn escapes_quotes_and_like_metacharacters() {
        let plan = customer_plan(Some("Name contains '50%_off'''"), 0, None);
        let sql = build_query_statement(&plan).to_string();
        assert!(
            sql.contains(r#""_origin"."Name" LIKE '%50\%\_off''%'"#),
            "unexpected sql: {sql}"
        );
    }

    #[test]
    fn count_statement_caps_the_inner_scan() {
        let plan = customer_plan(None, 0, None);
        let count = compiler::compile_count(&plan, &QueryLimits::default());
        let sql = build_count_statement(&count).to_string();
        assert_eq!(
            sql,
            concat!(
                r#"SELECT COUNT(*) AS "Count" FROM "#,
                r#"(SELECT 1 FROM "Customers" AS "_origin" LIMIT 20001) AS "_count";"#,
            ),
        );
    }
}
