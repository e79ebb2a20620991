//! Monday.com GraphQL operations
//!
//! Monday answers GraphQL failures with HTTP 200 and an `errors` array (or
//! an older `error_message` string), so a successful status is not enough:
//! the body is checked before `data` is handed back.

use common::Secret;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sheets_auth::MONDAY_API;

use crate::caller::{ApiCaller, ApiRequest};
use crate::error::{Error, Result};
use crate::options::SelectOption;

/// Pinned API version sent with every request.
pub const MONDAY_API_VERSION: &str = "2024-10";

const BOARDS_QUERY: &str = "query { boards(limit: 100) { id name } }";
const COLUMNS_QUERY: &str =
    "query ($boardIds: [ID!]) { boards(ids: $boardIds) { columns { id title type } } }";

/// Where the Monday token comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    /// Running inside a host platform that supplies its own API token.
    Embedded,
    /// Tokens come from the subject's stored OAuth grant.
    #[default]
    Standalone,
}

pub struct MondayApi {
    caller: ApiCaller,
    api_url: String,
    context: ExecutionContext,
    platform_token: Option<Secret<String>>,
}

impl MondayApi {
    pub fn new(caller: ApiCaller, api_url: Option<String>, context: ExecutionContext) -> Self {
        Self {
            caller,
            api_url: api_url.unwrap_or_else(|| MONDAY_API.to_string()),
            context,
            platform_token: None,
        }
    }

    /// Token used in `Embedded` context.
    pub fn with_platform_token(mut self, token: Secret<String>) -> Self {
        self.platform_token = Some(token);
        self
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    /// Run a GraphQL query and return its `data` member.
    pub async fn query(
        &self,
        subject_id: &str,
        query: &str,
        variables: Option<Value>,
    ) -> Result<Value> {
        if query.trim().is_empty() {
            return Err(Error::Validation("query must not be empty".into()));
        }
        let request = ApiRequest::post_json(
            self.api_url.clone(),
            json!({ "query": query, "variables": variables.unwrap_or_else(|| json!({})) }),
        )
        .header("API-Version", MONDAY_API_VERSION);

        let body = match self.context {
            ExecutionContext::Standalone => self.caller.call(subject_id, &request).await?,
            ExecutionContext::Embedded => {
                let token = self.platform_token.as_ref().ok_or_else(|| {
                    Error::Validation("embedded context has no platform API token".into())
                })?;
                self.caller.call_with_token(token.expose(), &request).await?
            }
        };
        extract_data(body)
    }

    pub async fn list_boards(&self, subject_id: &str) -> Result<Vec<SelectOption>> {
        let data = self.query(subject_id, BOARDS_QUERY, None).await?;
        let boards = data
            .get("boards")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::shape("monday", "boards"))?;
        Ok(boards.iter().filter_map(|b| named_option(b, "name")).collect())
    }

    pub async fn list_columns(&self, subject_id: &str, board_id: &str) -> Result<Vec<SelectOption>> {
        if board_id.trim().is_empty() {
            return Err(Error::Validation("board_id must not be empty".into()));
        }
        let data = self
            .query(subject_id, COLUMNS_QUERY, Some(json!({ "boardIds": [board_id] })))
            .await?;
        let columns = data
            .get("boards")
            .and_then(Value::as_array)
            .and_then(|boards| boards.first())
            .and_then(|board| board.get("columns"))
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Upstream {
                status: None,
                message: format!("monday board {board_id} not found"),
            })?;
        Ok(columns.iter().filter_map(|c| named_option(c, "title")).collect())
    }
}

/// Monday ids are numeric for boards and strings for columns.
fn named_option(item: &Value, label_key: &str) -> Option<SelectOption> {
    let id = match item.get("id")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let label = item
        .get(label_key)
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| id.clone());
    Some(SelectOption::new(id, label))
}

/// Unwrap a GraphQL envelope, turning reported errors into `Upstream`.
pub fn extract_data(mut body: Value) -> Result<Value> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array)
        && !errors.is_empty()
    {
        let messages: Vec<&str> = errors
            .iter()
            .map(|e| e.get("message").and_then(Value::as_str).unwrap_or("unknown error"))
            .collect();
        return Err(Error::Upstream {
            status: Some(200),
            message: format!("monday graphql error: {}", messages.join("; ")),
        });
    }
    if let Some(message) = body.get("error_message").and_then(Value::as_str) {
        return Err(Error::Upstream {
            status: Some(200),
            message: format!("monday error: {message}"),
        });
    }
    match body.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(Error::shape("monday", "data")),
    }
}
