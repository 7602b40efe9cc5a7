use std::{error::Error, path::PathBuf, sync::Arc};

use clap::Parser;

use entity_query::{
    engine::compiler::QueryLimits,
    server::{self, AppState, BackendConfig},
};

#[derive(Parser)]
struct ServerOptions {
    #[arg(long, env, default_value_t = 8080)]
    port: u16,
    /// The url of the SQL gateway queries execute against
    #[arg(long, env)]
    backend_url: String,
    #[arg(long, env)]
    backend_username: String,
    #[arg(long, env)]
    backend_password: String,
    /// Directory holding one entity model file per tenant
    #[arg(long, env, default_value = "metadata")]
    metadata_dir: PathBuf,
    #[arg(long, env, default_value_t = 500)]
    max_page_size: u64,
    #[arg(long, env, default_value_t = 10_000)]
    max_aggregate_result_size: u64,
    #[arg(long, env, default_value_t = 20_000)]
    max_count_size: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let options = ServerOptions::parse();

    let _tracing = init_tracing_opentelemetry::tracing_subscriber_ext::init_subscribers()?;

    let state = Arc::new(AppState::new(
        BackendConfig {
            url: options.backend_url,
            username: options.backend_username,
            password: options.backend_password,
        },
        options.metadata_dir,
        QueryLimits {
            max_page_size: options.max_page_size,
            max_aggregate_result_size: options.max_aggregate_result_size,
            max_count_size: options.max_count_size,
        },
    ));

    let router = server::router(state)
        .layer(axum_tracing_opentelemetry::opentelemetry_tracing_layer());

    let address = format!("0.0.0.0:{}", options.port).parse()?;

    tracing::info!("Starting server on {}", address);

    axum::Server::bind(&address)
        .serve(router.into_make_service())
        .await?;

    Ok(())
}
