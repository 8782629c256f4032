use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "audio": {
                "sample_rate": config.audio.sample_rate,
                "channels": config.audio.channels,
                "chunk_duration_secs": config.audio.chunk_duration_secs,
                "silence_threshold": config.audio.silence_threshold
            },
            "recognizer": {
                "model": config.recognizer.model,
                "default_language": config.recognizer.default_language,
                "min_silence_ms": config.recognizer.min_silence_ms,
                "vad_threshold": config.recognizer.vad_threshold,
                "no_speech_threshold": config.recognizer.no_speech_threshold
            },
            "performance": {
                "max_concurrent_streams": config.performance.max_concurrent_streams
            }
        }
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "server": {
                "host": current_config.server.host,
                "port": current_config.server.port
            },
            "audio": {
                "sample_rate": current_config.audio.sample_rate,
                "channels": current_config.audio.channels,
                "chunk_duration_secs": current_config.audio.chunk_duration_secs,
                "silence_threshold": current_config.audio.silence_threshold
            },
            "recognizer": {
                "model": current_config.recognizer.model,
                "default_language": current_config.recognizer.default_language,
                "min_silence_ms": current_config.recognizer.min_silence_ms,
                "vad_threshold": current_config.recognizer.vad_threshold,
                "no_speech_threshold": current_config.recognizer.no_speech_threshold
            },
            "performance": {
                "max_concurrent_streams": current_config.performance.max_concurrent_streams
            }
        }
    })))
}
