//! # Live Transcribe Backend - Main Application Entry Point
//!
//! Boots the transcription worker: loads configuration, brings up the one
//! shared recognizer instance, and serves the socket-mode WebSocket plus
//! the health/config HTTP surface.
//!
//! ## Startup Sequence:
//! 1. **Load configuration** from config.toml and environment variables
//! 2. **Set up logging** via tracing with an env-controlled filter
//! 3. **Load the acoustic model once**: both delivery modes share it; a
//!    load failure is logged and the server still comes up (transcripts
//!    stay empty until the model situation is fixed and the process
//!    restarted)
//! 4. **Serve HTTP/WebSocket** with CORS, logging and metrics middleware
//! 5. **Shut down gracefully** on SIGTERM/SIGINT

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use live_transcribe_backend::config::AppConfig;
use live_transcribe_backend::middleware::{MetricsMiddleware, RequestLogging};
use live_transcribe_backend::recognizer::RecognizerService;
use live_transcribe_backend::state::AppState;
use live_transcribe_backend::{handlers, health, websocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!(
        "Starting live-transcribe-backend v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "Configuration loaded: {}:{} ({} model, {:.1}s windows, gate {})",
        config.server.host,
        config.server.port,
        config.recognizer.model,
        config.audio.chunk_duration_secs,
        config.audio.silence_threshold
    );

    // One recognizer instance for the whole process; every stream
    // processor in either delivery mode transcribes through it
    let recognizer = Arc::new(RecognizerService::new(config.recognizer_settings()?));
    recognizer.load().await;

    let app_state = AppState::new(config.clone(), recognizer);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(MetricsMiddleware)
            .wrap(RequestLogging)
            // Socket-mode audio streaming
            .route("/ws/transcribe", web::get().to(websocket::transcribe_socket))
            // API routes under /api/v1
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            // Health check at root level for orchestrator probes
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Race the server against the shutdown signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: controls what gets logged; defaults to
///   "live_transcribe_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_transcribe_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and set the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Resolve once the shutdown flag has been set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
