//! Sortstation Server
//!
//! Main entry point for the waste-sorting station.

use sortstation::{
    actuation::{SerialActuator, SerialConfig},
    classifier::{GeminiClient, GeminiConfig},
    frame_source::HttpFrameSource,
    history::HistoryService,
    orchestrator::{Orchestrator, OrchestratorConfig},
    speech::SpeechQueue,
    state::{AppConfig, AppState},
    vision::{DetectionState, VisionConfig, VisionEngine},
    web_api,
    workflow::ClassificationWorkflow,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sortstation=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sortstation Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        camera_url = %config.camera_url,
        serial_port = %config.serial_port,
        "Configuration loaded"
    );

    // Create database pool
    let connect_options =
        SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options)
        .await?;

    tracing::info!("Database connected");

    // Initialize components
    let history = Arc::new(HistoryService::new(pool.clone()));
    history.init().await?;
    tracing::info!("HistoryService initialized");

    let detection = Arc::new(DetectionState::new(config.stability_duration));
    let speech = Arc::new(SpeechQueue::new());

    let classifier = Arc::new(GeminiClient::new(GeminiConfig {
        api_keys: config.gemini_api_keys.clone(),
        ..GeminiConfig::default()
    })?);
    tracing::info!("GeminiClient initialized");

    let actuator = Arc::new(SerialActuator::new(SerialConfig {
        port: config.serial_port.clone(),
        baud_rate: config.serial_baud,
        ..SerialConfig::default()
    }));
    tracing::info!(port = %config.serial_port, "SerialActuator initialized");

    let workflow = Arc::new(ClassificationWorkflow::new(
        detection.clone(),
        classifier,
        actuator,
        history.clone(),
        speech.clone(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        detection.clone(),
        workflow.clone(),
        speech.clone(),
        OrchestratorConfig {
            stability_timeout: config.stability_timeout,
            cooldown: config.cooldown,
            ..OrchestratorConfig::default()
        },
    ));
    let phase = orchestrator.phase_handle();

    let state = AppState {
        pool,
        config,
        detection: detection.clone(),
        history,
        workflow,
        speech,
        phase,
    };

    // Start the vision loop
    let frame_source = Box::new(HttpFrameSource::new(state.config.camera_url.clone())?);
    let vision = Arc::new(VisionEngine::new(
        frame_source,
        detection,
        VisionConfig::default(),
    ));
    vision.spawn();
    tracing::info!("VisionEngine started");

    // Start the automatic classification state machine
    orchestrator.spawn();
    tracing::info!("Orchestrator started");

    // Serve the station UI
    let static_dir = std::env::var("STATIC_DIR").unwrap_or_else(|_| "./static".to_string());
    let serve_dir = ServeDir::new(&static_dir)
        .not_found_service(ServeFile::new(format!("{}/index.html", static_dir)));

    let app = web_api::create_router(state.clone())
        .fallback_service(serve_dir)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    tracing::info!(static_dir = %static_dir, "Static file serving enabled");

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
