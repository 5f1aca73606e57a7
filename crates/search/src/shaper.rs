use chrono::{SecondsFormat, Utc};
use registry::{ExampleCalls, RegistryReader, ServiceRecord, ToolRecord};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::types::{RankedResult, ResponseMode, SearchRequest};
use crate::SearchError;

/// Character budget per serialized result, from the chars/4 token proxy.
fn budget_chars(mode: ResponseMode) -> usize {
    mode.budget_tokens() * 4
}

const DESCRIPTION_TRUNCATION: usize = 240;
const CAPABILITY_TRUNCATION: usize = 8;

/// The response envelope returned by every search endpoint.
#[derive(Debug, Serialize)]
pub struct SearchEnvelope {
    pub query: String,
    pub search_mode: String,
    pub results: Vec<Value>,
    pub total_results: usize,
    pub search_time_ms: u64,
    pub timestamp: String,
}

/// Projects ranked results into the response envelope under the per-mode
/// token budgets.
///
/// Rankings come with index payloads only; the shaper pulls the rest from
/// the registry with point lookups. A result whose registry record has
/// disappeared since indexing is rendered from its payload instead of
/// failing the whole envelope. When a result overflows its budget, fields
/// are truncated in fixed priority order: example calls first, then
/// schemas, then the description, then the capability list.
pub struct ResponseShaper {
    registry: Arc<dyn RegistryReader>,
}

impl ResponseShaper {
    pub fn new(registry: Arc<dyn RegistryReader>) -> Self {
        Self { registry }
    }

    pub fn shape(
        &self,
        req: &SearchRequest,
        results: &[RankedResult],
        search_time_ms: u64,
    ) -> Result<SearchEnvelope, SearchError> {
        let mut shaped = Vec::with_capacity(results.len());
        for result in results {
            shaped.push(self.shape_result(req, result)?);
        }
        Ok(SearchEnvelope {
            query: req.text.clone(),
            search_mode: req.mode.as_str().to_owned(),
            total_results: shaped.len(),
            results: shaped,
            search_time_ms,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }

    fn shape_result(
        &self,
        req: &SearchRequest,
        result: &RankedResult,
    ) -> Result<Value, SearchError> {
        let service = self.registry.service(result.service_id)?;
        let mut item = Map::new();
        item.insert("service_id".into(), json!(result.service_id));
        item.insert("score".into(), json!(result.score));
        item.insert("rank".into(), json!(result.rank));
        item.insert("evidence".into(), json!(result.evidence.label()));
        if let Some(capability) = &result.matched_capability {
            item.insert("matched_capability".into(), json!(capability));
        }
        item.insert(
            "service".into(),
            self.service_projection(req, result, service.as_ref()),
        );

        if let Some(tool_id) = result.recommended_tool_id {
            let projection = self.tool_projection(req, tool_id, result.recommended_tool_score)?;
            item.insert("recommended_tool".into(), projection);
        }
        if result.recommended_tool_ids.len() > 1 {
            let mut bundle = Vec::new();
            for &tool_id in &result.recommended_tool_ids {
                bundle.push(self.tool_projection(req, tool_id, None)?);
            }
            item.insert("recommended_tools".into(), Value::Array(bundle));
        }

        let mut value = Value::Object(item);
        enforce_budget(&mut value, req.response_mode);
        Ok(value)
    }

    fn service_projection(
        &self,
        req: &SearchRequest,
        result: &RankedResult,
        record: Option<&ServiceRecord>,
    ) -> Value {
        let mut projection = match (req.response_mode, record) {
            (ResponseMode::Minimal, record) => json!({
                "name": record.map_or(result.payload.name.as_str(), |r| r.name.as_str()),
                "service_id": result.service_id,
            }),
            (ResponseMode::Compact, Some(record)) => json!({
                "name": record.name,
                "description": record.description,
                "endpoint": record.endpoint,
                "auth_type": record.auth_type,
                "domains": record.domains,
                "integration_details": record.integration_details,
            }),
            (ResponseMode::Compact, None) => json!({
                "name": result.payload.name,
                "description": result.payload.description,
                "domains": result.payload.domains,
            }),
            (ResponseMode::Full, Some(record)) => {
                let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
                if let Some(obj) = value.as_object_mut() {
                    if !req.include_orchestration {
                        for key in [
                            "agent_protocol",
                            "auth_config",
                            "tool_recommendations",
                            "agent_capabilities",
                            "communication_patterns",
                            "orchestration_metadata",
                            "integration_details",
                        ] {
                            obj.remove(key);
                        }
                    }
                    if !req.include_schemas {
                        if let Some(caps) = obj.get_mut("capabilities").and_then(Value::as_array_mut)
                        {
                            for cap in caps {
                                if let Some(cap) = cap.as_object_mut() {
                                    cap.remove("input_schema");
                                    cap.remove("output_schema");
                                }
                            }
                        }
                    }
                }
                value
            }
            (ResponseMode::Full, None) => json!({
                "name": result.payload.name,
                "description": result.payload.description,
                "domains": result.payload.domains,
                "capabilities": result.payload.capabilities,
            }),
        };

        if let Some(fields) = &req.field_projection {
            if let Some(obj) = projection.as_object_mut() {
                obj.retain(|key, _| key == "service_id" || fields.iter().any(|f| f == key));
            }
        }
        projection
    }

    fn tool_projection(
        &self,
        req: &SearchRequest,
        tool_id: i64,
        recommendation_score: Option<f32>,
    ) -> Result<Value, SearchError> {
        let Some(tool) = self.registry.tool(tool_id)? else {
            return Ok(Value::Null);
        };
        let details_url = detail_url(tool_id, "details");
        let projection = match req.response_mode {
            ResponseMode::Minimal => json!({
                "tool_name": tool.tool_name,
                "tool_description": tool.tool_description,
                "recommendation_score": recommendation_score,
                "details_url": details_url,
            }),
            ResponseMode::Compact => json!({
                "tool_name": tool.tool_name,
                "tool_description": tool.tool_description,
                "tool_version": tool.tool_version,
                "input_schema_keys": schema_keys(&tool.input_schema),
                "output_schema_keys": schema_keys(&tool.output_schema),
                "example_count": tool.example_calls.as_ref().map_or(0, ExampleCalls::len),
                "recommendation_score": recommendation_score,
                "details_url": details_url,
            }),
            ResponseMode::Full => {
                let mut value = full_tool_value(&tool);
                if let Some(obj) = value.as_object_mut() {
                    if !req.include_schemas {
                        obj.remove("input_schema");
                        obj.remove("output_schema");
                    }
                    if !req.include_examples {
                        obj.remove("example_calls");
                    }
                    if let Some(score) = recommendation_score {
                        obj.insert("recommendation_score".into(), json!(score));
                    }
                }
                value
            }
        };
        Ok(projection)
    }
}

fn full_tool_value(tool: &ToolRecord) -> Value {
    serde_json::to_value(tool).unwrap_or(Value::Null)
}

fn schema_keys(schema: &Option<Value>) -> Value {
    match schema.as_ref().and_then(Value::as_object) {
        Some(obj) => {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort();
            json!(keys)
        }
        None => json!([]),
    }
}

fn detail_url(tool_id: i64, leaf: &str) -> String {
    format!("/api/v1/search/tools/{tool_id}/{leaf}")
}

fn serialized_chars(value: &Value) -> usize {
    serde_json::to_string(value).map_or(0, |s| s.len())
}

/// Shrink an overflowing result in priority order until it fits its
/// budget: example_calls → schemas → description → capability list.
fn enforce_budget(value: &mut Value, mode: ResponseMode) {
    let cap = budget_chars(mode);
    if serialized_chars(value) <= cap {
        return;
    }

    strip_tool_fields(value, &["example_calls"]);
    if serialized_chars(value) <= cap {
        return;
    }

    strip_tool_fields(value, &["input_schema", "output_schema"]);
    strip_capability_schemas(value);
    if serialized_chars(value) <= cap {
        return;
    }

    truncate_descriptions(value, DESCRIPTION_TRUNCATION);
    if serialized_chars(value) <= cap {
        return;
    }

    truncate_capabilities(value, CAPABILITY_TRUNCATION);
}

fn tool_projections(value: &mut Value) -> Vec<&mut Value> {
    let Some(obj) = value.as_object_mut() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for (key, entry) in obj.iter_mut() {
        match key.as_str() {
            "recommended_tool" => out.push(entry),
            "recommended_tools" => {
                if let Some(items) = entry.as_array_mut() {
                    out.extend(items.iter_mut());
                }
            }
            _ => {}
        }
    }
    out
}

fn strip_tool_fields(value: &mut Value, fields: &[&str]) {
    for tool in tool_projections(value) {
        if let Some(obj) = tool.as_object_mut() {
            for field in fields {
                obj.remove(*field);
            }
        }
    }
}

fn strip_capability_schemas(value: &mut Value) {
    let Some(caps) = value
        .get_mut("service")
        .and_then(|s| s.get_mut("capabilities"))
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    for cap in caps {
        if let Some(obj) = cap.as_object_mut() {
            obj.remove("input_schema");
            obj.remove("output_schema");
        }
    }
}

fn truncate_descriptions(value: &mut Value, max_chars: usize) {
    if let Some(service) = value.get_mut("service") {
        truncate_text_fields(service, max_chars);
    }
    for tool in tool_projections(value) {
        truncate_text_fields(tool, max_chars);
    }
}

fn truncate_text_fields(target: &mut Value, max_chars: usize) {
    let Some(obj) = target.as_object_mut() else {
        return;
    };
    for key in ["description", "tool_description"] {
        if let Some(Value::String(text)) = obj.get_mut(key) {
            if text.chars().count() > max_chars {
                *text = text.chars().take(max_chars).collect();
            }
        }
    }
}

fn truncate_capabilities(value: &mut Value, max_entries: usize) {
    if let Some(caps) = value
        .get_mut("service")
        .and_then(|s| s.get_mut("capabilities"))
        .and_then(Value::as_array_mut)
    {
        caps.truncate(max_entries);
    }
}
