use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::runtime::TokioCurrentThread;
use tracing_actix_web::TracingLogger;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use knowledge_corner::app_config::config_app;
use knowledge_corner::documents_repository::{
    DocumentsRepository, InMemoryDocumentsRepository, PostgresDocumentsRepository,
};
use knowledge_corner::settings::Settings;
use knowledge_corner::token_service::TokenService;

// Based on https://github.com/LukeMathWalker/tracing-actix-web/blob/main/examples/opentelemetry/src/main.rs#L15
fn init_telemetry() -> anyhow::Result<()> {
    let app_name = "knowledge_corner";

    global::set_text_map_propagator(TraceContextPropagator::new());
    #[allow(deprecated)]
    let tracer = opentelemetry_jaeger::new_agent_pipeline()
        .with_service_name(app_name)
        .install_batch(TokioCurrentThread)
        .context("Failed to install OpenTelemetry tracer")?;

    // Tunable via `RUST_LOG` env variable
    let env_filter = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("info"));
    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
    let formatting_layer = BunyanFormattingLayer::new(app_name.into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(telemetry)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install `tracing` subscriber")
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry()?;
    let settings = Settings::load()?;

    let documents_repository: Arc<dyn DocumentsRepository> = if settings.use_in_memory_db {
        tracing::info!("Using in-memory documents repository");
        Arc::new(InMemoryDocumentsRepository::default())
    } else {
        Arc::new(
            PostgresDocumentsRepository::init(settings.postgres_config())
                .await
                .context("Failed to init postgres")?,
        )
    };
    let token_service = web::Data::new(TokenService::new(&settings.access_token_secret));

    let port = settings.port;
    let cors_allowed_origin = settings.cors_allowed_origin.clone();
    tracing::info!("Starting HTTP server at http://0.0.0.0:{}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&cors_allowed_origin)
            .allow_any_method()
            .allow_any_header()
            .supports_credentials();
        App::new()
            .app_data(web::Data::new(documents_repository.clone()))
            .app_data(token_service.clone())
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(config_app)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;
    Ok(())
}
