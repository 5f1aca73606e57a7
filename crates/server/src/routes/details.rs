use axum::extract::{Path, State};
use axum::Json;
use registry::RegistryReader;
use search::SearchError;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ServerResult;
use crate::state::ServerState;

/// `GET /tools/{tool_id}/{details|schema|examples|summary}`.
///
/// Pure projections over the registry reader, used by `compact` and
/// `minimal` responses to fetch the fields they omitted. Served for any
/// tool the registry still knows about, active or not, so links in cached
/// responses keep resolving.
pub async fn tool_detail(
    State(state): State<Arc<ServerState>>,
    Path((tool_id, view)): Path<(i64, String)>,
) -> ServerResult<Json<Value>> {
    let tool = state
        .registry
        .tool(tool_id)?
        .ok_or_else(|| SearchError::NotFound(format!("tool {tool_id}")))?;
    let service = state.registry.service(tool.service_id)?;
    let service_name = service.map(|s| s.name);

    let value = match view.as_str() {
        "details" => {
            let mut doc = serde_json::to_value(&tool).unwrap_or(Value::Null);
            if let Some(obj) = doc.as_object_mut() {
                obj.insert("service_name".into(), json!(service_name));
            }
            doc
        }
        "schema" => json!({
            "tool_id": tool.id,
            "tool_name": tool.tool_name,
            "input_schema": tool.input_schema,
            "output_schema": tool.output_schema,
        }),
        "examples" => json!({
            "tool_id": tool.id,
            "tool_name": tool.tool_name,
            "example_calls": tool.example_calls,
        }),
        "summary" => json!({
            "tool_id": tool.id,
            "tool_name": tool.tool_name,
            "tool_description": tool.tool_description,
            "tool_version": tool.tool_version,
            "service_id": tool.service_id,
            "service_name": service_name,
        }),
        other => {
            return Err(SearchError::NotFound(format!("detail view '{other}'")).into());
        }
    };
    Ok(Json(value))
}
