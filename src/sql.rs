pub mod ast;
pub mod query_builder;

pub use query_builder::{build_count_statement, build_query_statement};
