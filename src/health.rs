use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tracing::instrument;

use crate::{error::ApiError, state::AppState, users::repo_types::UserFilter};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
    pub success: bool,
    pub connected: bool,
    pub users_count: i64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/check-database", get(check_database))
}

#[instrument(skip(state))]
pub async fn check_database(State(state): State<AppState>) -> Result<Json<DatabaseStatus>, ApiError> {
    let users_count = state.users.count(&UserFilter::default()).await?;
    Ok(Json(DatabaseStatus {
        success: true,
        connected: true,
        users_count,
    }))
}
