//! Service Gateway
//!
//! Forwards `/svc/{project}/{*path}` to the project's route handlers. The
//! handler receives `{ method, path, query, headers, body }` and its return
//! value becomes the JSON response body.

use std::collections::BTreeMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method};
use serde_json::{Value, json};

use super::error::ApiResult;
use super::state::AppState;

pub(crate) async fn gateway_root(
    State(state): State<AppState>,
    Path(project): Path<String>,
    method: Method,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    forward(&state, &project, "", method, query, &headers, body).await
}

pub(crate) async fn gateway(
    State(state): State<AppState>,
    Path((project, path)): Path<(String, String)>,
    method: Method,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    forward(&state, &project, &path, method, query, &headers, body).await
}

async fn forward(
    state: &AppState,
    project: &str,
    path: &str,
    method: Method,
    query: BTreeMap<String, String>,
    headers: &HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let path = format!("/{}", path.trim_start_matches('/'));
    let request = json!({
        "method": method.as_str(),
        "path": path,
        "query": query,
        "headers": header_map(headers),
        "body": parse_body(&body),
    });

    tracing::debug!(project = %project, method = %method, path = %path, "gateway request");
    let response = state
        .manager()
        .invoke(project, method.as_str(), &path, request)
        .await?;
    Ok(Json(response))
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect()
}

/// JSON when it parses, text otherwise, `null` when empty.
fn parse_body(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bodies_fall_back_to_text() {
        assert_eq!(parse_body(b""), Value::Null);
        assert_eq!(parse_body(br#"{"a":1}"#), json!({ "a": 1 }));
        assert_eq!(parse_body(b"plain words"), json!("plain words"));
    }
}
