use std::str::FromStr;

use peg::{error::ParseError, str::LineCol};

use super::ast::{
    AggregateFunction, AggregateItem, AggregateSelectExpr, CompareOp, FilterExpr, HavingExpr,
    Literal, OrderByExpr, OrderByItem, PathExpr, PathSetExpr,
};
use crate::engine::error::EngineError;

peg::parser! {
    grammar expressions() for str {
        rule _() = quiet!{ [' ' | '\t' | '\r' | '\n']* }

        rule word() -> &'input str
            = $(['a'..='z' | 'A'..='Z']+)

        rule kw(expected: &'static str)
            = found:word() {?
                if found.eq_ignore_ascii_case(expected) {
                    Ok(())
                } else {
                    Err(expected)
                }
            }

        rule ident() -> &'input str
            = quiet!{ $(['a'..='z' | 'A'..='Z' | '_'] ['a'..='z' | 'A'..='Z' | '0'..='9' | '_']*) }
            / expected!("identifier")

        rule path() -> PathExpr
            = parts:(ident() **<1,> ".") {
                let mut segments: Vec<String> = parts.into_iter().map(str::to_owned).collect();
                let property = segments.pop().unwrap();
                PathExpr::new(segments, property)
            }

        rule string_literal() -> String
            = "'" chars:$(("''" / [^ '\''])*) "'" { chars.replace("''", "'") }

        rule decimal_literal() -> Literal
            = n:$("-"? ['0'..='9']+ "." ['0'..='9']+) {?
                n.parse().map(Literal::Decimal).or(Err("decimal"))
            }

        rule int_literal() -> Literal
            = n:$("-"? ['0'..='9']+) {?
                n.parse().map(Literal::Int).or(Err("integer"))
            }

        rule literal() -> Literal
            = s:string_literal() { Literal::String(s) }
            / n:decimal_literal() { n }
            / n:int_literal() { n }
            / kw("null") { Literal::Null }
            / kw("true") { Literal::Bool(true) }
            / kw("false") { Literal::Bool(false) }

        rule compare_op() -> CompareOp
            = found:word() {? CompareOp::from_str(found).or(Err("comparison operator")) }

        rule comparison() -> FilterExpr
            = path:path() _ op:compare_op() _ literal:literal() {
                FilterExpr::Comparison { path, op, literal }
            }

        rule unary_expr() -> FilterExpr
            = kw("not") _ e:unary_expr() { FilterExpr::Not(Box::new(e)) }
            / "(" _ e:or_expr() _ ")" { e }
            / comparison()

        rule and_expr() -> FilterExpr
            = first:unary_expr() rest:(_ kw("and") _ e:unary_expr() { e })* {
                rest.into_iter().fold(first, FilterExpr::and)
            }

        rule or_expr() -> FilterExpr
            = first:and_expr() rest:(_ kw("or") _ e:and_expr() { e })* {
                rest.into_iter().fold(first, FilterExpr::or)
            }

        pub rule filter() -> FilterExpr
            = _ e:or_expr() _ { e }

        rule direction() -> bool
            = found:word() {?
                if found.eq_ignore_ascii_case("desc") {
                    Ok(true)
                } else if found.eq_ignore_ascii_case("asc") {
                    Ok(false)
                } else {
                    Err("sort direction")
                }
            }

        rule order_by_item() -> OrderByItem
            = path:path() descending:(_ d:direction() { d })? {
                OrderByItem { path, descending }
            }

        pub rule order_by() -> OrderByExpr
            = _ items:(order_by_item() **<1,> (_ "," _)) _ { OrderByExpr { items } }

        pub rule paths() -> Vec<PathExpr>
            = _ items:(path() **<1,> (_ "," _)) _ { items }

        rule aggregate_function() -> AggregateFunction
            = found:word() {? AggregateFunction::from_str(found).or(Err("aggregate function")) }

        rule measure() -> AggregateItem
            = function:aggregate_function() _ "(" _ path:path() _ ")" {
                AggregateItem::Measure { function, path }
            }

        rule aggregate_item() -> AggregateItem
            = measure()
            / path:path() { AggregateItem::Dimension(path) }

        pub rule aggregate_select() -> AggregateSelectExpr
            = _ items:(aggregate_item() **<1,> (_ "," _)) _ { AggregateSelectExpr { items } }

        rule having_comparison() -> HavingExpr
            = m:measure() _ op:compare_op() _ literal:literal() {
                match m {
                    AggregateItem::Measure { function, path } => {
                        HavingExpr::Comparison { function, path, op, literal }
                    }
                    AggregateItem::Dimension(_) => unreachable!(),
                }
            }

        rule having_unary() -> HavingExpr
            = kw("not") _ e:having_unary() { HavingExpr::Not(Box::new(e)) }
            / "(" _ e:having_or() _ ")" { e }
            / having_comparison()

        rule having_and() -> HavingExpr
            = first:having_unary() rest:(_ kw("and") _ e:having_unary() { e })* {
                rest.into_iter().fold(first, |l, r| HavingExpr::And(Box::new(l), Box::new(r)))
            }

        rule having_or() -> HavingExpr
            = first:having_and() rest:(_ kw("or") _ e:having_and() { e })* {
                rest.into_iter().fold(first, |l, r| HavingExpr::Or(Box::new(l), Box::new(r)))
            }

        pub rule having() -> HavingExpr
            = _ e:having_or() _ { e }
    }
}

fn syntax_error(text: &str, err: ParseError<LineCol>) -> EngineError {
    let position = err.location.offset.min(text.len());
    let fragment = text[position..].chars().take(24).collect();
    EngineError::Parse { fragment, position }
}

pub fn parse_filter(text: &str) -> Result<FilterExpr, EngineError> {
    expressions::filter(text).map_err(|err| syntax_error(text, err))
}

pub fn parse_order_by(text: &str) -> Result<OrderByExpr, EngineError> {
    expressions::order_by(text).map_err(|err| syntax_error(text, err))
}

pub fn parse_paths(text: &str) -> Result<PathSetExpr, EngineError> {
    let paths = expressions::paths(text).map_err(|err| syntax_error(text, err))?;
    Ok(PathSetExpr::new(paths))
}

pub fn parse_aggregate_select(text: &str) -> Result<AggregateSelectExpr, EngineError> {
    let select = expressions::aggregate_select(text).map_err(|err| syntax_error(text, err))?;
    if select.measures().next().is_none() {
        return Err(EngineError::Bind(
            "Aggregate select must contain at least one measure, e.g. sum(Amount)".to_string(),
        ));
    }
    Ok(select)
}

pub fn parse_having(text: &str) -> Result<HavingExpr, EngineError> {
    expressions::having(text).map_err(|err| syntax_error(text, err))
}
