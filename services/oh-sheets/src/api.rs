//! Google Sheets and Monday.com endpoints
//!
//! Thin JSON wrappers over the integration clients. List endpoints return
//! arrays of `{id, name, title, value}` options.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use integrations::{AppendResult, SelectOption};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::oauth::SubjectRequest;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SpreadsheetRequest {
    pub subject_id: String,
    pub spreadsheet_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AppendRowRequest {
    pub subject_id: String,
    pub spreadsheet_id: String,
    pub sheet: String,
    pub values: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct MondayQueryRequest {
    pub subject_id: String,
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct BoardRequest {
    pub subject_id: String,
    pub board_id: String,
}

/// POST /google/spreadsheets
pub async fn google_spreadsheets(
    State(state): State<AppState>,
    payload: Result<Json<SubjectRequest>, JsonRejection>,
) -> Result<Json<Vec<SelectOption>>, ApiError> {
    let Json(body) = payload?;
    let options = state.google()?.list_spreadsheets(&body.subject_id).await?;
    Ok(Json(options))
}

/// POST /google/sheets
pub async fn google_sheets(
    State(state): State<AppState>,
    payload: Result<Json<SpreadsheetRequest>, JsonRejection>,
) -> Result<Json<Vec<SelectOption>>, ApiError> {
    let Json(body) = payload?;
    let options = state
        .google()?
        .list_sheets(&body.subject_id, &body.spreadsheet_id)
        .await?;
    Ok(Json(options))
}

/// POST /google/append-row
pub async fn google_append_row(
    State(state): State<AppState>,
    payload: Result<Json<AppendRowRequest>, JsonRejection>,
) -> Result<Json<AppendResult>, ApiError> {
    let Json(body) = payload?;
    let result = state
        .google()?
        .append_row(&body.subject_id, &body.spreadsheet_id, &body.sheet, body.values)
        .await?;
    Ok(Json(result))
}

/// POST /monday/query
pub async fn monday_query(
    State(state): State<AppState>,
    payload: Result<Json<MondayQueryRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let data = state
        .monday()?
        .query(&body.subject_id, &body.query, body.variables)
        .await?;
    Ok(Json(json!({ "data": data })))
}

/// POST /monday/boards
pub async fn monday_boards(
    State(state): State<AppState>,
    payload: Result<Json<SubjectRequest>, JsonRejection>,
) -> Result<Json<Vec<SelectOption>>, ApiError> {
    let Json(body) = payload?;
    let options = state.monday()?.list_boards(&body.subject_id).await?;
    Ok(Json(options))
}

/// POST /monday/columns
pub async fn monday_columns(
    State(state): State<AppState>,
    payload: Result<Json<BoardRequest>, JsonRejection>,
) -> Result<Json<Vec<SelectOption>>, ApiError> {
    let Json(body) = payload?;
    let options = state
        .monday()?
        .list_columns(&body.subject_id, &body.board_id)
        .await?;
    Ok(Json(options))
}
