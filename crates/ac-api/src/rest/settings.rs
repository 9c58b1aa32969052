use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ApiErrorResponse;
use crate::state::AppState;
use ac_config::TerminalSettings;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub log_dir: String,
    pub log_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vite_port: Option<u16>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub log_dir: Option<String>,
    pub log_enabled: Option<bool>,
}

#[derive(Serialize)]
pub struct RecentReposResponse {
    pub repos: Vec<String>,
}

pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsResponse> {
    let config = state.config.read().unwrap_or_else(|e| e.into_inner());
    let log_dir = config
        .log_dir
        .clone()
        .unwrap_or_else(|| state.paths.logs_dir());
    Json(SettingsResponse {
        log_dir: log_dir.to_string_lossy().into_owned(),
        log_enabled: config.log_enabled,
        port: Some(config.port),
        vite_port: Some(config.vite_port),
    })
}

pub async fn put_settings(
    State(state): State<AppState>,
    Json(body): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsResponse>, ApiErrorResponse> {
    let updated = {
        let mut config = state.config.write().unwrap_or_else(|e| e.into_inner());
        if let Some(log_dir) = body.log_dir {
            config.log_dir = Some(PathBuf::from(log_dir));
        }
        if let Some(log_enabled) = body.log_enabled {
            config.log_enabled = log_enabled;
        }
        config.clone()
    };

    if let Err(err) = updated.save_to(&state.config_dir) {
        tracing::warn!(error = %err, "could not persist config.json");
    }

    let log_dir = updated
        .log_dir
        .clone()
        .unwrap_or_else(|| state.paths.logs_dir());
    Ok(Json(SettingsResponse {
        log_dir: log_dir.to_string_lossy().into_owned(),
        log_enabled: updated.log_enabled,
        port: None,
        vite_port: None,
    }))
}

pub async fn get_terminal_settings(State(state): State<AppState>) -> Json<TerminalSettings> {
    Json(state.store.terminal_settings())
}

pub async fn put_terminal_settings(
    State(state): State<AppState>,
    Json(settings): Json<TerminalSettings>,
) -> Json<TerminalSettings> {
    state.store.set_terminal_settings(settings.clone());
    Json(settings)
}

pub async fn recent_repos(State(state): State<AppState>) -> Json<RecentReposResponse> {
    Json(RecentReposResponse {
        repos: state.store.recent_repos(),
    })
}
