use index::EntryPayload;
use serde::{Deserialize, Serialize, Serializer};
use std::str::FromStr;

use crate::SearchError;

/// The five query-planning modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    AgentsOnly,
    ToolsOnly,
    AgentsAndTools,
    Workflows,
    Capabilities,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::AgentsOnly => "agents_only",
            SearchMode::ToolsOnly => "tools_only",
            SearchMode::AgentsAndTools => "agents_and_tools",
            SearchMode::Workflows => "workflows",
            SearchMode::Capabilities => "capabilities",
        }
    }
}

impl FromStr for SearchMode {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agents_only" => Ok(SearchMode::AgentsOnly),
            "tools_only" => Ok(SearchMode::ToolsOnly),
            "agents_and_tools" => Ok(SearchMode::AgentsAndTools),
            "workflows" => Ok(SearchMode::Workflows),
            "capabilities" => Ok(SearchMode::Capabilities),
            other => Err(SearchError::InvalidRequest(format!(
                "unknown search mode '{other}'"
            ))),
        }
    }
}

/// Projection depth of the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Full,
    Compact,
    Minimal,
}

impl ResponseMode {
    /// Per-request default when the caller does not pick one.
    pub fn default_for(mode: SearchMode) -> Self {
        match mode {
            SearchMode::ToolsOnly => ResponseMode::Compact,
            _ => ResponseMode::Full,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Full => "full",
            ResponseMode::Compact => "compact",
            ResponseMode::Minimal => "minimal",
        }
    }

    /// Hard cap on one serialized result, in character/4 token proxies.
    pub fn budget_tokens(&self) -> usize {
        match self {
            ResponseMode::Full => 6_000,
            ResponseMode::Compact => 1_800,
            ResponseMode::Minimal => 300,
        }
    }
}

impl FromStr for ResponseMode {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(ResponseMode::Full),
            "compact" => Ok(ResponseMode::Compact),
            "minimal" => Ok(ResponseMode::Minimal),
            other => Err(SearchError::InvalidRequest(format!(
                "unknown response mode '{other}'"
            ))),
        }
    }
}

/// A validated search request. Construct through [`SearchRequest::new`] so
/// query text is normalized and numeric knobs are clamped exactly once.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub text: String,
    pub limit: usize,
    pub min_score: f32,
    pub domains: Vec<String>,
    pub capabilities: Vec<String>,
    pub mode: SearchMode,
    pub response_mode: ResponseMode,
    pub include_orchestration: bool,
    pub include_schemas: bool,
    pub include_examples: bool,
    pub field_projection: Option<Vec<String>>,
}

impl SearchRequest {
    /// Normalize the query text and apply per-mode defaults.
    pub fn new(raw_text: &str, mode: SearchMode) -> Result<Self, SearchError> {
        let text = compose::normalize_query(raw_text)?;
        Ok(Self {
            text,
            limit: 10,
            min_score: 0.0,
            domains: Vec::new(),
            capabilities: Vec::new(),
            mode,
            response_mode: ResponseMode::default_for(mode),
            include_orchestration: true,
            include_schemas: true,
            include_examples: true,
            field_projection: None,
        })
    }

    /// Clamped into `[1, 100]`.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.clamp(1, 100);
        self
    }

    /// Clamped into `[0, 1]`.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score.clamp(0.0, 1.0);
        self
    }

    pub fn with_response_mode(mut self, response_mode: ResponseMode) -> Self {
        self.response_mode = response_mode;
        self
    }

    pub fn with_domains(mut self, domains: Vec<String>) -> Self {
        self.domains = domains;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Which index (or indexes) produced a merged result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    /// The service itself matched the query.
    Direct,
    /// A tool matched; its score was propagated to the parent service.
    ViaTool(i64),
    /// Both a direct service hit and a tool-derived hit.
    Both { tool_id: i64 },
}

impl Evidence {
    pub fn label(&self) -> String {
        match self {
            Evidence::Direct => "direct".into(),
            Evidence::ViaTool(tool_id) => format!("via_tool:{tool_id}"),
            Evidence::Both { .. } => "both".into(),
        }
    }
}

impl Serialize for Evidence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Service,
    Tool,
}

/// One ranked hit, service-centric. Tool-derived hits carry the tool id
/// and score that produced them; `payload` is always the parent service's
/// index payload so filters and shaping never need a registry round-trip
/// for ranking data.
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub kind: EntityKind,
    pub service_id: i64,
    pub score: f32,
    pub rank: usize,
    pub evidence: Evidence,
    pub payload: EntryPayload,
    pub recommended_tool_id: Option<i64>,
    pub recommended_tool_score: Option<f32>,
    /// Top tools per service in `workflows` mode, best first.
    pub recommended_tool_ids: Vec<i64>,
    /// Capability that matched in `capabilities` mode.
    pub matched_capability: Option<String>,
}

/// Manager status surfaced at `/api/v1/search/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchStatus {
    pub built: bool,
    pub state: String,
    pub svc_count: usize,
    pub tool_count: usize,
    pub model: String,
    pub dim: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_built_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_strings() {
        for mode in [
            SearchMode::AgentsOnly,
            SearchMode::ToolsOnly,
            SearchMode::AgentsAndTools,
            SearchMode::Workflows,
            SearchMode::Capabilities,
        ] {
            assert_eq!(mode.as_str().parse::<SearchMode>().unwrap(), mode);
        }
        assert!("everything".parse::<SearchMode>().is_err());
    }

    #[test]
    fn response_mode_defaults_per_search_mode() {
        assert_eq!(
            ResponseMode::default_for(SearchMode::AgentsOnly),
            ResponseMode::Full
        );
        assert_eq!(
            ResponseMode::default_for(SearchMode::ToolsOnly),
            ResponseMode::Compact
        );
        assert_eq!(
            ResponseMode::default_for(SearchMode::Workflows),
            ResponseMode::Full
        );
    }

    #[test]
    fn request_clamps_limit_and_min_score() {
        let req = SearchRequest::new("query", SearchMode::AgentsOnly)
            .unwrap()
            .with_limit(10_000)
            .with_min_score(7.5);
        assert_eq!(req.limit, 100);
        assert_eq!(req.min_score, 1.0);

        let req = SearchRequest::new("query", SearchMode::AgentsOnly)
            .unwrap()
            .with_limit(0)
            .with_min_score(-1.0);
        assert_eq!(req.limit, 1);
        assert_eq!(req.min_score, 0.0);
    }

    #[test]
    fn empty_query_is_rejected() {
        assert!(matches!(
            SearchRequest::new("   ", SearchMode::AgentsOnly),
            Err(SearchError::QueryEmpty)
        ));
    }

    #[test]
    fn evidence_labels() {
        assert_eq!(Evidence::Direct.label(), "direct");
        assert_eq!(Evidence::ViaTool(42).label(), "via_tool:42");
        assert_eq!(Evidence::Both { tool_id: 42 }.label(), "both");
    }
}
