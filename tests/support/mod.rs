//! Test support: the fixture entity model, seeded tables, and an in-memory
//! backend that interprets compiled query plans over those tables.

use std::collections::HashMap;

use axum::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};

use entity_query::engine::{
    compiler::{ColumnRef, CountPlan, PlanTarget, Predicate, QueryPlan},
    error::EngineError,
    executor::{Backend, SqlRow},
    expr::ast::{AggregateFunction, CompareOp},
    metadata::{
        CollectionDescriptor, DataType, EntityModel, EntityTypeMetadata, NavigationDescriptor,
        PropertyDescriptor,
    },
    result::ScalarValue,
};

fn property(name: &str, data_type: DataType) -> PropertyDescriptor {
    PropertyDescriptor {
        name: name.to_owned(),
        data_type,
        nullable: false,
        foreign_key_of: None,
    }
}

fn foreign_key(name: &str, navigation: &str) -> PropertyDescriptor {
    PropertyDescriptor {
        name: name.to_owned(),
        data_type: DataType::Int,
        nullable: true,
        foreign_key_of: Some(navigation.to_owned()),
    }
}

fn navigation(name: &str, target: &str, foreign_key: &str) -> NavigationDescriptor {
    NavigationDescriptor {
        name: name.to_owned(),
        target_type: target.to_owned(),
        foreign_key_property: foreign_key.to_owned(),
    }
}

pub fn model() -> EntityModel {
    let document = EntityTypeMetadata {
        type_name: "Document".to_owned(),
        table_name: "Documents".to_owned(),
        collection_name: "Documents".to_owned(),
        properties: vec![
            property("Id", DataType::Int),
            property("Memo", DataType::String),
            property("Code", DataType::String),
            property("Amount", DataType::Decimal),
            property("PostingDate", DataType::Date),
            property("IsActive", DataType::Bool),
            foreign_key("CustomerId", "Customer"),
            foreign_key("AccountId", "Account"),
        ],
        navigations: vec![
            navigation("Customer", "Customer", "CustomerId"),
            navigation("Account", "Account", "AccountId"),
        ],
        collections: vec![CollectionDescriptor {
            name: "Lines".to_owned(),
            target_type: "DocumentLine".to_owned(),
            inverse_foreign_key: "DocumentId".to_owned(),
        }],
        search_properties: vec!["Memo".to_owned(), "Code".to_owned()],
        is_active_property: Some("IsActive".to_owned()),
        tree_parent_navigation: None,
    };

    let line = EntityTypeMetadata {
        type_name: "DocumentLine".to_owned(),
        table_name: "DocumentLines".to_owned(),
        collection_name: "DocumentLines".to_owned(),
        properties: vec![
            property("Id", DataType::Int),
            property("Memo", DataType::String),
            property("Quantity", DataType::Decimal),
            foreign_key("DocumentId", "Document"),
        ],
        navigations: vec![navigation("Document", "Document", "DocumentId")],
        collections: vec![],
        search_properties: vec![],
        is_active_property: None,
        tree_parent_navigation: None,
    };

    let customer = EntityTypeMetadata {
        type_name: "Customer".to_owned(),
        table_name: "Customers".to_owned(),
        collection_name: "Customers".to_owned(),
        properties: vec![
            property("Id", DataType::Int),
            property("Name", DataType::String),
            property("Code", DataType::String),
            foreign_key("RegionId", "Region"),
        ],
        navigations: vec![navigation("Region", "Region", "RegionId")],
        collections: vec![],
        search_properties: vec!["Name".to_owned(), "Code".to_owned()],
        is_active_property: None,
        tree_parent_navigation: None,
    };

    let region = EntityTypeMetadata {
        type_name: "Region".to_owned(),
        table_name: "Regions".to_owned(),
        collection_name: "Regions".to_owned(),
        properties: vec![
            property("Id", DataType::Int),
            property("Name", DataType::String),
        ],
        navigations: vec![],
        collections: vec![],
        search_properties: vec![],
        is_active_property: None,
        tree_parent_navigation: None,
    };

    let account = EntityTypeMetadata {
        type_name: "Account".to_owned(),
        table_name: "Accounts".to_owned(),
        collection_name: "Accounts".to_owned(),
        properties: vec![
            property("Id", DataType::Int),
            property("Code", DataType::String),
            property("Name", DataType::String),
            foreign_key("ParentId", "Parent"),
        ],
        navigations: vec![navigation("Parent", "Account", "ParentId")],
        collections: vec![],
        search_properties: vec![],
        is_active_property: None,
        tree_parent_navigation: Some("Parent".to_owned()),
    };

    let mut types = IndexMap::new();
    for entity_type in [document, line, customer, region, account] {
        types.insert(entity_type.type_name.clone(), entity_type);
    }
    EntityModel { types }
}

fn row(pairs: Vec<(&str, Value)>) -> SqlRow {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value))
        .collect()
}

/// Twelve active documents, three customers, a three-level account tree
/// (A=1 → B=2 → D=4, plus an unreferenced C=3 under A), and three lines.
pub fn backend() -> MemoryBackend {
    let mut tables = HashMap::new();

    tables.insert(
        "Customers".to_owned(),
        vec![
            row(vec![
                ("Id", json!(1)),
                ("Name", json!("Joe")),
                ("Code", json!("C0")),
                ("RegionId", json!(1)),
            ]),
            row(vec![
                ("Id", json!(2)),
                ("Name", json!("Ann")),
                ("Code", json!("C1")),
                ("RegionId", json!(1)),
            ]),
            row(vec![
                ("Id", json!(3)),
                ("Name", json!("Bob")),
                ("Code", json!("C9")),
                ("RegionId", Value::Null),
            ]),
        ],
    );

    tables.insert(
        "Regions".to_owned(),
        vec![row(vec![("Id", json!(1)), ("Name", json!("North"))])],
    );

    tables.insert(
        "Accounts".to_owned(),
        vec![
            row(vec![
                ("Id", json!(1)),
                ("Code", json!("A")),
                ("Name", json!("Assets")),
                ("ParentId", Value::Null),
            ]),
            row(vec![
                ("Id", json!(2)),
                ("Code", json!("B")),
                ("Name", json!("Bank")),
                ("ParentId", json!(1)),
            ]),
            row(vec![
                ("Id", json!(3)),
                ("Code", json!("C")),
                ("Name", json!("Cash")),
                ("ParentId", json!(1)),
            ]),
            row(vec![
                ("Id", json!(4)),
                ("Code", json!("D")),
                ("Name", json!("Deposits")),
                ("ParentId", json!(2)),
            ]),
        ],
    );

    let documents = (1..=12)
        .map(|id| {
            row(vec![
                ("Id", json!(id)),
                ("Memo", json!(format!("Document {}", id))),
                ("Code", json!(format!("D{:03}", id))),
                ("Amount", json!(id as f64 * 10.0)),
                ("PostingDate", json!("2023-04-01")),
                ("IsActive", json!(true)),
                ("CustomerId", json!(if id % 3 == 0 { 2 } else { 1 })),
                ("AccountId", json!(4)),
            ])
        })
        .collect();
    tables.insert("Documents".to_owned(), documents);

    tables.insert(
        "DocumentLines".to_owned(),
        vec![
            row(vec![
                ("Id", json!(1)),
                ("Memo", json!("first")),
                ("Quantity", json!(2.0)),
                ("DocumentId", json!(1)),
            ]),
            row(vec![
                ("Id", json!(2)),
                ("Memo", json!("second")),
                ("Quantity", json!(5.0)),
                ("DocumentId", json!(1)),
            ]),
            row(vec![
                ("Id", json!(3)),
                ("Memo", json!("third")),
                ("Quantity", json!(1.0)),
                ("DocumentId", json!(2)),
            ]),
        ],
    );

    MemoryBackend { tables }
}

/// Interprets query plans over in-memory tables: joins, predicate, grouping,
/// having, ordering, paging. Faithful enough for the engine's semantics
/// without a SQL parser.
pub struct MemoryBackend {
    pub tables: HashMap<String, Vec<SqlRow>>,
}

/// One logical row during evaluation: table alias to its matched base row
/// (None when a LEFT join found no partner).
type JoinedRow = HashMap<String, Option<SqlRow>>;

impl MemoryBackend {
    fn joined_rows(&self, source_table: &str, joins: &[entity_query::engine::compiler::PlanJoin]) -> Vec<JoinedRow> {
        let base = self.tables.get(source_table).cloned().unwrap_or_default();
        let mut rows: Vec<JoinedRow> = base
            .into_iter()
            .map(|row| {
                let mut joined = HashMap::new();
                joined.insert("_origin".to_owned(), Some(row));
                joined
            })
            .collect();

        for join in joins {
            let table = self.tables.get(&join.table).cloned().unwrap_or_default();
            let mut next = vec![];
            for joined in rows {
                let parent_value = joined
                    .get(&join.parent_alias)
                    .and_then(|row| row.as_ref())
                    .and_then(|row| row.get(&join.parent_column))
                    .cloned()
                    .unwrap_or(Value::Null);
                let matches: Vec<&SqlRow> = table
                    .iter()
                    .filter(|candidate| {
                        !parent_value.is_null()
                            && candidate.get(&join.child_column) == Some(&parent_value)
                    })
                    .collect();
                if matches.is_empty() {
                    let mut with_null = joined.clone();
                    with_null.insert(join.alias.clone(), None);
                    next.push(with_null);
                } else {
                    for matched in matches {
                        let mut with_match = joined.clone();
                        with_match.insert(join.alias.clone(), Some(matched.clone()));
                        next.push(with_match);
                    }
                }
            }
            rows = next;
        }
        rows
    }

    fn column_value(joined: &JoinedRow, column: &ColumnRef) -> ScalarValue {
        joined
            .get(&column.table_alias)
            .and_then(|row| row.as_ref())
            .and_then(|row| row.get(&column.column))
            .map(ScalarValue::from_json)
            .unwrap_or(ScalarValue::Null)
    }

    fn eval_predicate(joined: &JoinedRow, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::And(left, right) => {
                Self::eval_predicate(joined, left) && Self::eval_predicate(joined, right)
            }
            Predicate::Or(left, right) => {
                Self::eval_predicate(joined, left) || Self::eval_predicate(joined, right)
            }
            Predicate::Not(inner) => !Self::eval_predicate(joined, inner),
            Predicate::Compare { target, op, value } => {
                let actual = match target {
                    PlanTarget::Column(column) => Self::column_value(joined, column),
                    PlanTarget::Aggregate { .. } => panic!("aggregate target outside a group"),
                };
                compare(&actual, *op, value)
            }
            Predicate::In { target, values } => {
                let actual = match target {
                    PlanTarget::Column(column) => Self::column_value(joined, column),
                    PlanTarget::Aggregate { .. } => panic!("aggregate target outside a group"),
                };
                values
                    .iter()
                    .any(|value| compare(&actual, CompareOp::Eq, value))
            }
            Predicate::IsNull(target) => match target {
                PlanTarget::Column(column) => Self::column_value(joined, column).is_null(),
                PlanTarget::Aggregate { .. } => panic!("aggregate target outside a group"),
            },
            Predicate::IsNotNull(target) => match target {
                PlanTarget::Column(column) => !Self::column_value(joined, column).is_null(),
                PlanTarget::Aggregate { .. } => panic!("aggregate target outside a group"),
            },
        }
    }

    fn sort_key(value: &ScalarValue) -> (u8, f64, String) {
        match value {
            ScalarValue::Null => (0, 0.0, String::new()),
            ScalarValue::Bool(b) => (1, *b as u8 as f64, String::new()),
            ScalarValue::Int(n) => (2, *n as f64, String::new()),
            ScalarValue::Decimal(n) => (2, *n, String::new()),
            ScalarValue::String(s) => (3, 0.0, s.clone()),
        }
    }
}

fn as_number(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Int(n) => Some(*n as f64),
        ScalarValue::Decimal(n) => Some(*n),
        _ => None,
    }
}

fn compare(actual: &ScalarValue, op: CompareOp, expected: &ScalarValue) -> bool {
    use std::cmp::Ordering;

    if matches!(expected, ScalarValue::Null) {
        // the compiler lowers null comparisons to IsNull/IsNotNull
        return false;
    }
    if actual.is_null() {
        return false;
    }

    match op {
        CompareOp::Contains => match (actual, expected) {
            (ScalarValue::String(haystack), ScalarValue::String(needle)) => {
                haystack.contains(needle.as_str())
            }
            _ => false,
        },
        CompareOp::Startswith => match (actual, expected) {
            (ScalarValue::String(haystack), ScalarValue::String(needle)) => {
                haystack.starts_with(needle.as_str())
            }
            _ => false,
        },
        _ => {
            let ordering = match (as_number(actual), as_number(expected)) {
                (Some(left), Some(right)) => left.partial_cmp(&right),
                _ => match (actual, expected) {
                    (ScalarValue::String(left), ScalarValue::String(right)) => {
                        Some(left.cmp(right))
                    }
                    (ScalarValue::Bool(left), ScalarValue::Bool(right)) => Some(left.cmp(right)),
                    _ => None,
                },
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::Ne => ordering != Ordering::Equal,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Contains | CompareOp::Startswith => unreachable!(),
            }
        }
    }
}

fn scalar_to_json(value: ScalarValue) -> Value {
    match value {
        ScalarValue::Null => Value::Null,
        ScalarValue::Bool(b) => json!(b),
        ScalarValue::Int(n) => json!(n),
        ScalarValue::Decimal(n) => json!(n),
        ScalarValue::String(s) => json!(s),
    }
}

fn aggregate_over(
    function: &AggregateFunction,
    values: Vec<ScalarValue>,
) -> ScalarValue {
    let non_null: Vec<ScalarValue> = values.into_iter().filter(|v| !v.is_null()).collect();
    match function {
        AggregateFunction::Count => ScalarValue::Int(non_null.len() as i64),
        AggregateFunction::Sum => {
            ScalarValue::Decimal(non_null.iter().filter_map(as_number).sum())
        }
        AggregateFunction::Avg => {
            if non_null.is_empty() {
                ScalarValue::Null
            } else {
                let sum: f64 = non_null.iter().filter_map(as_number).sum();
                ScalarValue::Decimal(sum / non_null.len() as f64)
            }
        }
        AggregateFunction::Min => non_null
            .into_iter()
            .min_by(|a, b| {
                MemoryBackend::sort_key(a)
                    .partial_cmp(&MemoryBackend::sort_key(b))
                    .unwrap()
            })
            .unwrap_or(ScalarValue::Null),
        AggregateFunction::Max => non_null
            .into_iter()
            .max_by(|a, b| {
                MemoryBackend::sort_key(a)
                    .partial_cmp(&MemoryBackend::sort_key(b))
                    .unwrap()
            })
            .unwrap_or(ScalarValue::Null),
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn run(&self, plan: &QueryPlan) -> Result<Vec<SqlRow>, EngineError> {
        let mut rows = self.joined_rows(&plan.source_table, &plan.joins);

        if let Some(predicate) = &plan.predicate {
            rows.retain(|joined| Self::eval_predicate(joined, predicate));
        }

        let is_aggregate = !plan.group_by.is_empty()
            || plan
                .columns
                .iter()
                .any(|column| matches!(column.target, PlanTarget::Aggregate { .. }));

        let mut output: Vec<SqlRow> = if is_aggregate {
            // group, aggregate, having
            let mut groups: Vec<(Vec<ScalarValue>, Vec<JoinedRow>)> = vec![];
            for joined in rows {
                let key: Vec<ScalarValue> = plan
                    .group_by
                    .iter()
                    .map(|column| Self::column_value(&joined, column))
                    .collect();
                match groups.iter_mut().find(|(existing, _)| *existing == key) {
                    Some((_, members)) => members.push(joined),
                    None => groups.push((key, vec![joined])),
                }
            }

            let group_value = |members: &[JoinedRow], target: &PlanTarget| match target {
                PlanTarget::Column(column) => members
                    .first()
                    .map(|joined| Self::column_value(joined, column))
                    .unwrap_or(ScalarValue::Null),
                PlanTarget::Aggregate { function, column } => aggregate_over(
                    function,
                    members
                        .iter()
                        .map(|joined| Self::column_value(joined, column))
                        .collect(),
                ),
            };

            let eval_group = |members: &[JoinedRow], predicate: &Predicate| -> bool {
                fn eval(
                    members: &[JoinedRow],
                    predicate: &Predicate,
                    group_value: &dyn Fn(&[JoinedRow], &PlanTarget) -> ScalarValue,
                ) -> bool {
                    match predicate {
                        Predicate::And(l, r) => {
                            eval(members, l, group_value) && eval(members, r, group_value)
                        }
                        Predicate::Or(l, r) => {
                            eval(members, l, group_value) || eval(members, r, group_value)
                        }
                        Predicate::Not(inner) => !eval(members, inner, group_value),
                        Predicate::Compare { target, op, value } => {
                            compare(&group_value(members, target), *op, value)
                        }
                        Predicate::In { target, values } => values.iter().any(|value| {
                            compare(&group_value(members, target), CompareOp::Eq, value)
                        }),
                        Predicate::IsNull(target) => group_value(members, target).is_null(),
                        Predicate::IsNotNull(target) => !group_value(members, target).is_null(),
                    }
                }
                eval(members, predicate, &group_value)
            };

            if let Some(having) = &plan.having {
                groups.retain(|(_, members)| eval_group(members, having));
            }

            groups.sort_by(|(_, a), (_, b)| {
                for item in &plan.order_by {
                    let left = MemoryBackend::sort_key(&group_value(a, &item.target));
                    let right = MemoryBackend::sort_key(&group_value(b, &item.target));
                    let ordering = left.partial_cmp(&right).unwrap();
                    let ordering = if item.descending {
                        ordering.reverse()
                    } else {
                        ordering
                    };
                    if !ordering.is_eq() {
                        return ordering;
                    }
                }
                std::cmp::Ordering::Equal
            });

            groups
                .into_iter()
                .map(|(_, members)| {
                    plan.columns
                        .iter()
                        .map(|column| {
                            (
                                column.name.clone(),
                                scalar_to_json(group_value(&members, &column.target)),
                            )
                        })
                        .collect()
                })
                .collect()
        } else {
            rows.sort_by(|a, b| {
                for item in &plan.order_by {
                    let target = match &item.target {
                        PlanTarget::Column(column) => column,
                        PlanTarget::Aggregate { .. } => panic!("aggregate order in flat plan"),
                    };
                    let left = MemoryBackend::sort_key(&Self::column_value(a, target));
                    let right = MemoryBackend::sort_key(&Self::column_value(b, target));
                    let ordering = left.partial_cmp(&right).unwrap();
                    let ordering = if item.descending {
                        ordering.reverse()
                    } else {
                        ordering
                    };
                    if !ordering.is_eq() {
                        return ordering;
                    }
                }
                std::cmp::Ordering::Equal
            });

            rows.into_iter()
                .map(|joined| {
                    plan.columns
                        .iter()
                        .map(|column| {
                            let value = match &column.target {
                                PlanTarget::Column(column_ref) => {
                                    Self::column_value(&joined, column_ref)
                                }
                                PlanTarget::Aggregate { .. } => {
                                    panic!("aggregate column in flat plan")
                                }
                            };
                            (column.name.clone(), scalar_to_json(value))
                        })
                        .collect()
                })
                .collect()
        };

        let skip = plan.skip as usize;
        output = output.into_iter().skip(skip).collect();
        if let Some(fetch_limit) = plan.fetch_limit {
            output.truncate(fetch_limit as usize);
        }

        Ok(output)
    }

    async fn count(&self, plan: &CountPlan) -> Result<u64, EngineError> {
        let mut rows = self.joined_rows(&plan.source_table, &plan.joins);
        if let Some(predicate) = &plan.predicate {
            rows.retain(|joined| Self::eval_predicate(joined, predicate));
        }
        // mirrors the capped inner scan of the rendered count statement
        Ok((rows.len() as u64).min(plan.cap.saturating_add(1)))
    }
}
