//! Google Drive and Sheets operations
//!
//! Listing spreadsheets goes through the Drive files API (the Sheets API
//! has no list endpoint). Everything else uses Sheets v4.

use reqwest::Url;
use serde::Serialize;
use serde_json::{Value, json};
use sheets_auth::{GOOGLE_DRIVE_API, GOOGLE_SHEETS_API};
use tracing::debug;

use crate::caller::{ApiCaller, ApiRequest};
use crate::error::{Error, Result};
use crate::options::SelectOption;

const SPREADSHEET_MIME_QUERY: &str =
    "mimeType='application/vnd.google-apps.spreadsheet' and trashed=false";

/// Base URLs for the two Google APIs.
#[derive(Debug, Clone)]
pub struct GoogleEndpoints {
    pub drive_api: String,
    pub sheets_api: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            drive_api: GOOGLE_DRIVE_API.to_string(),
            sheets_api: GOOGLE_SHEETS_API.to_string(),
        }
    }
}

/// Summary of an append, as reported by Sheets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppendResult {
    pub spreadsheet_id: String,
    pub updated_range: String,
    pub updated_rows: u64,
}

pub struct GoogleApi {
    caller: ApiCaller,
    endpoints: GoogleEndpoints,
}

impl GoogleApi {
    pub fn new(caller: ApiCaller, endpoints: GoogleEndpoints) -> Self {
        Self { caller, endpoints }
    }

    /// Spreadsheets visible to the subject, most recently modified first.
    pub async fn list_spreadsheets(&self, subject_id: &str) -> Result<Vec<SelectOption>> {
        let request = ApiRequest::get(format!("{}/files", self.endpoints.drive_api))
            .query("q", SPREADSHEET_MIME_QUERY)
            .query("fields", "files(id,name)")
            .query("orderBy", "modifiedTime desc")
            .query("pageSize", "1000");
        let body = self.caller.call(subject_id, &request).await?;
        let options = parse_drive_files(&body)?;
        debug!(subject_id, count = options.len(), "listed spreadsheets");
        Ok(options)
    }

    /// Worksheet tabs of one spreadsheet, in tab order. Option ids are the
    /// tab titles, which is what `append_row` addresses.
    pub async fn list_sheets(
        &self,
        subject_id: &str,
        spreadsheet_id: &str,
    ) -> Result<Vec<SelectOption>> {
        require("spreadsheet_id", spreadsheet_id)?;
        let url = self.sheets_url(&["spreadsheets", spreadsheet_id])?;
        let request = ApiRequest::get(url).query("fields", "sheets.properties(sheetId,title,index)");
        let body = self.caller.call(subject_id, &request).await?;
        parse_sheet_tabs(&body)
    }

    /// Append one row after the last row of `sheet`'s data table.
    /// Values are interpreted as if typed by a user (formulas, dates).
    pub async fn append_row(
        &self,
        subject_id: &str,
        spreadsheet_id: &str,
        sheet: &str,
        values: Vec<Value>,
    ) -> Result<AppendResult> {
        require("spreadsheet_id", spreadsheet_id)?;
        require("sheet", sheet)?;
        if values.is_empty() {
            return Err(Error::Validation("values must not be empty".into()));
        }

        let range = format!("{sheet}!A1:append");
        let url = self.sheets_url(&["spreadsheets", spreadsheet_id, "values", &range])?;
        let request = ApiRequest::post_json(
            url,
            json!({ "majorDimension": "ROWS", "values": [values] }),
        )
        .query("valueInputOption", "USER_ENTERED")
        .query("insertDataOption", "INSERT_ROWS");

        let body = self.caller.call(subject_id, &request).await?;
        let updates = body.get("updates").ok_or_else(|| Error::shape("sheets", "updates"))?;
        Ok(AppendResult {
            spreadsheet_id: spreadsheet_id.to_string(),
            updated_range: updates
                .get("updatedRange")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            updated_rows: updates
                .get("updatedRows")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        })
    }

    /// Percent-encodes each segment; sheet names may contain spaces or `/`.
    fn sheets_url(&self, segments: &[&str]) -> Result<String> {
        let mut url = Url::parse(&self.endpoints.sheets_api)
            .map_err(|e| Error::Validation(format!("invalid sheets api url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::Validation("sheets api url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.to_string())
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Drive `files.list` response to options.
pub fn parse_drive_files(body: &Value) -> Result<Vec<SelectOption>> {
    let files = body
        .get("files")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::shape("drive", "files"))?;
    Ok(files
        .iter()
        .filter_map(|file| {
            let id = file.get("id")?.as_str()?;
            let name = file.get("name").and_then(Value::as_str).unwrap_or(id);
            Some(SelectOption::new(id, name))
        })
        .collect())
}

/// Sheets `spreadsheets.get` response to one option per tab.
pub fn parse_sheet_tabs(body: &Value) -> Result<Vec<SelectOption>> {
    let sheets = body
        .get("sheets")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::shape("sheets", "sheets"))?;
    let mut tabs: Vec<(i64, &str)> = sheets
        .iter()
        .filter_map(|sheet| {
            let props = sheet.get("properties")?;
            let title = props.get("title")?.as_str()?;
            let index = props.get("index").and_then(Value::as_i64).unwrap_or(0);
            Some((index, title))
        })
        .collect();
    tabs.sort_by_key(|(index, _)| *index);
    Ok(tabs
        .into_iter()
        .map(|(_, title)| SelectOption::new(title, title))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caller::AuthScheme;
    use crate::test_support::{MockApi, manager_with_token_server, start_api};
    use axum::http::StatusCode;

    async fn google_api(api_url: &str) -> GoogleApi {
        let (manager, _) =
            manager_with_token_server(StatusCode::OK, json!({"access_token": "a2"}), 3600).await;
        let caller = ApiCaller::new(reqwest::Client::new(), manager, AuthScheme::Bearer, "google");
        GoogleApi::new(
            caller,
            GoogleEndpoints {
                drive_api: format!("{api_url}/drive/v3"),
                sheets_api: format!("{api_url}/v4"),
            },
        )
    }

    #[tokio::test]
    async fn lists_spreadsheets_as_options() {
        let api = start_api(MockApi::accepting(
            "Bearer a1",
            json!({"files": [
                {"id": "f1", "name": "Budget"},
                {"id": "f2", "name": "Roster"}
            ]}),
        ))
        .await;
        let google = google_api(&api.url).await;

        let options = google.list_spreadsheets("u1").await.unwrap();
        assert_eq!(
            options,
            vec![SelectOption::new("f1", "Budget"), SelectOption::new("f2", "Roster")]
        );
        assert_eq!(options[0].value, "f1");
        assert_eq!(options[0].title, "Budget");

        let seen = api.last();
        assert_eq!(seen.method, "GET");
        assert!(seen.uri.starts_with("/drive/v3/files?"), "uri: {}", seen.uri);
        assert!(seen.uri.contains("google-apps.spreadsheet"));
    }

    #[tokio::test]
    async fn lists_tabs_in_order() {
        let api = start_api(MockApi::accepting(
            "Bearer a1",
            json!({"sheets": [
                {"properties": {"sheetId": 7, "title": "Archive", "index": 1}},
                {"properties": {"sheetId": 0, "title": "Sheet1", "index": 0}}
            ]}),
        ))
        .await;
        let google = google_api(&api.url).await;

        let options = google.list_sheets("u1", "f1").await.unwrap();
        assert_eq!(options[0].name, "Sheet1");
        assert_eq!(options[1].id, "Archive");
        assert!(api.last().uri.starts_with("/v4/spreadsheets/f1?"));
    }

    #[tokio::test]
    async fn appends_row_with_user_entered_values() {
        let api = start_api(MockApi::accepting(
            "Bearer a1",
            json!({
                "spreadsheetId": "f1",
                "updates": {"updatedRange": "'My Sheet'!A5:C5", "updatedRows": 1}
            }),
        ))
        .await;
        let google = google_api(&api.url).await;

        let result = google
            .append_row("u1", "f1", "My Sheet", vec![json!("a"), json!(2), json!("=A5")])
            .await
            .unwrap();
        assert_eq!(result.updated_rows, 1);
        assert_eq!(result.updated_range, "'My Sheet'!A5:C5");

        let seen = api.last();
        assert_eq!(seen.method, "POST");
        assert!(
            seen.uri.starts_with("/v4/spreadsheets/f1/values/My%20Sheet!A1:append?"),
            "uri: {}",
            seen.uri
        );
        assert!(seen.uri.contains("valueInputOption=USER_ENTERED"));
        assert!(seen.uri.contains("insertDataOption=INSERT_ROWS"));
        assert_eq!(seen.body["values"], json!([["a", 2, "=A5"]]));
    }

    #[tokio::test]
    async fn append_rejects_empty_input_without_calling_out() {
        let api = start_api(MockApi::accepting("Bearer a1", json!({}))).await;
        let google = google_api(&api.url).await;

        let err = google.append_row("u1", "f1", "Sheet1", vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = google.list_sheets("u1", " ").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(api.calls(), 0);
    }

    #[test]
    fn drive_files_without_array_is_upstream_error() {
        let err = parse_drive_files(&json!({"kind": "drive#fileList"})).unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
    }

    #[test]
    fn drive_file_without_name_falls_back_to_id() {
        let options = parse_drive_files(&json!({"files": [{"id": "f9"}, {"name": "no id"}]})).unwrap();
        assert_eq!(options, vec![SelectOption::new("f9", "f9")]);
    }
}
