use axum::async_trait;
use serde::Deserialize;

use crate::{
    engine::{
        compiler::{CountPlan, QueryPlan},
        error::EngineError,
        executor::{Backend, SqlRow},
    },
    sql::{self, query_builder::COUNT_COLUMN},
};

use super::config::BackendConfig;

/// Executes rendered SQL statements against an HTTP SQL gateway that answers
/// with JSON rows. Errors come back verbatim; retry policy belongs to the
/// caller of the engine, not here.
pub struct HttpBackend {
    url: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            url: config.url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            client: reqwest::Client::new(),
        }
    }

    async fn post_statement(&self, statement: &str) -> Result<Vec<SqlRow>, EngineError> {
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .body(statement.to_owned())
            .send()
            .await
            .map_err(|err| EngineError::Backend(err.to_string()))?;

        if response.error_for_status_ref().is_err() {
            let body = response
                .text()
                .await
                .map_err(|err| EngineError::Backend(err.to_string()))?;
            return Err(EngineError::Backend(body));
        }

        let payload: RowsResponse = response
            .json()
            .await
            .map_err(|err| EngineError::Backend(err.to_string()))?;

        Ok(payload.data)
    }

    pub async fn ping(&self) -> Result<(), EngineError> {
        self.post_statement("SELECT 1;").await.map(|_rows| ())
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn run(&self, plan: &QueryPlan) -> Result<Vec<SqlRow>, EngineError> {
        let statement = sql::build_query_statement(plan).to_string();
        self.post_statement(&statement).await
    }

    async fn count(&self, plan: &CountPlan) -> Result<u64, EngineError> {
        let statement = sql::build_count_statement(plan).to_string();
        let rows = self.post_statement(&statement).await?;
        rows.first()
            .and_then(|row| row.get(COUNT_COLUMN))
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| {
                EngineError::Backend("the count statement returned no count row".to_string())
            })
    }
}

#[derive(Debug, Deserialize)]
struct RowsResponse {
    data: Vec<SqlRow>,
    // row count and timing also arrive; nothing here reads them
    #[allow(dead_code)]
    #[serde(default)]
    rows: Option<u64>,
}
