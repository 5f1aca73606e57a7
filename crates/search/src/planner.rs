use index::{EntryPayload, SearchHit};
use registry::RegistryReader;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::manager::SearchManager;
use crate::types::{EntityKind, Evidence, RankedResult, SearchMode, SearchRequest};
use crate::SearchError;

/// Score multiplier when a tool hit is propagated to its parent service.
const TOOL_PROPAGATION: f32 = 0.9;

/// Plans a validated request across the two indexes.
///
/// Repeated query text is common in agent traffic, so query vectors are
/// cached in a fixed-size LRU keyed by the SHA-256 of the normalized text.
/// The lock around the cache is held only for the map operation; embedding
/// happens outside it.
///
/// A deadline may accompany each request; it is checked between the major
/// steps (embed, index search, merge). An in-flight embedding call is not
/// interruptible, so a cancelled query may still finish its embed — the
/// result lands in the cache and benefits the retry.
pub struct QueryPlanner {
    manager: Arc<SearchManager>,
    cache: Mutex<LruCache<[u8; 32], Vec<f32>>>,
}

impl QueryPlanner {
    pub fn new(manager: Arc<SearchManager>, lru_size: usize) -> Self {
        let capacity = NonZeroUsize::new(lru_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            manager,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn manager(&self) -> &Arc<SearchManager> {
        &self.manager
    }

    /// Execute one search: embed (or reuse) the query vector, gather hits
    /// per mode, filter, threshold, truncate, rank.
    pub async fn search(
        &self,
        req: &SearchRequest,
        deadline: Option<Instant>,
    ) -> Result<Vec<RankedResult>, SearchError> {
        check_deadline(deadline)?;
        let query_vector = self.query_vector(&req.text).await?;
        check_deadline(deadline)?;

        let oversample = req.limit * 2;
        let mut results = match req.mode {
            SearchMode::AgentsOnly => self.agents_only(&query_vector, oversample)?,
            SearchMode::ToolsOnly => self.tools_only(&query_vector, oversample)?,
            SearchMode::AgentsAndTools => self.agents_and_tools(&query_vector, oversample)?,
            SearchMode::Workflows => self.workflows(&query_vector, oversample)?,
            SearchMode::Capabilities => self.capabilities(req, &query_vector, oversample)?,
        };
        check_deadline(deadline)?;

        apply_filters(&mut results, req);
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.service_id.cmp(&b.service_id))
        });
        results.truncate(req.limit);
        for (i, result) in results.iter_mut().enumerate() {
            result.rank = i + 1;
        }
        Ok(results)
    }

    /// `/similar/{service_id}`: the composed text of the service is the
    /// query; the service itself is excluded from the results.
    pub async fn similar_services(
        &self,
        service_id: i64,
        limit: usize,
        deadline: Option<Instant>,
    ) -> Result<Vec<RankedResult>, SearchError> {
        let service = self
            .manager
            .registry()
            .service(service_id)?
            .ok_or_else(|| SearchError::NotFound(format!("service {service_id}")))?;
        check_deadline(deadline)?;
        let text = compose::service_text(&service);
        let query_vector = self.query_vector(&text).await?;
        check_deadline(deadline)?;

        let limit = limit.clamp(1, 100);
        let hits = self.manager.search_services(&query_vector, limit + 1)?;
        let mut results: Vec<RankedResult> = hits
            .into_iter()
            .filter(|hit| hit.id != service_id)
            .take(limit)
            .map(direct_result)
            .collect();
        for (i, result) in results.iter_mut().enumerate() {
            result.rank = i + 1;
        }
        Ok(results)
    }

    async fn query_vector(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let key: [u8; 32] = Sha256::digest(text.as_bytes()).into();
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(vector) = cache.get(&key) {
                return Ok(vector.clone());
            }
        }
        let vector = self.manager.embed_query(text).await?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, vector.clone());
        }
        Ok(vector)
    }

    fn agents_only(&self, query: &[f32], k: usize) -> Result<Vec<RankedResult>, SearchError> {
        let hits = self.manager.search_services(query, k)?;
        Ok(hits.into_iter().map(direct_result).collect())
    }

    fn tools_only(&self, query: &[f32], k: usize) -> Result<Vec<RankedResult>, SearchError> {
        let hits = self.manager.search_tools(query, k)?;
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some((service_id, payload)) = self.parent_of(&hit) else {
                continue;
            };
            results.push(RankedResult {
                kind: EntityKind::Tool,
                service_id,
                score: hit.score,
                rank: 0,
                evidence: Evidence::ViaTool(hit.id),
                payload,
                recommended_tool_id: Some(hit.id),
                recommended_tool_score: Some(hit.score),
                recommended_tool_ids: Vec::new(),
                matched_capability: None,
            });
        }
        Ok(results)
    }

    /// Merge both indexes. A service reached both directly and through a
    /// tool combines as `max(direct, 0.9 * best_tool)`, with the evidence
    /// marked accordingly.
    fn agents_and_tools(&self, query: &[f32], k: usize) -> Result<Vec<RankedResult>, SearchError> {
        let service_hits = self.manager.search_services(query, k)?;
        let tool_hits = self.manager.search_tools(query, k)?;

        struct Merged {
            direct: Option<f32>,
            best_tool: Option<(i64, f32)>,
            payload: EntryPayload,
        }

        // BTreeMap keeps service-id iteration deterministic.
        let mut merged: BTreeMap<i64, Merged> = BTreeMap::new();
        for hit in service_hits {
            merged.insert(
                hit.id,
                Merged {
                    direct: Some(hit.score),
                    best_tool: None,
                    payload: hit.payload,
                },
            );
        }
        for hit in tool_hits {
            let Some((service_id, payload)) = self.parent_of(&hit) else {
                continue;
            };
            let entry = merged.entry(service_id).or_insert(Merged {
                direct: None,
                best_tool: None,
                payload,
            });
            let better = match entry.best_tool {
                None => true,
                Some((best_id, best_score)) => {
                    hit.score > best_score || (hit.score == best_score && hit.id < best_id)
                }
            };
            if better {
                entry.best_tool = Some((hit.id, hit.score));
            }
        }

        Ok(merged
            .into_iter()
            .map(|(service_id, entry)| {
                let (score, evidence, tool) = match (entry.direct, entry.best_tool) {
                    (Some(direct), Some((tool_id, tool_score))) => (
                        direct.max(TOOL_PROPAGATION * tool_score),
                        Evidence::Both { tool_id },
                        Some((tool_id, tool_score)),
                    ),
                    (Some(direct), None) => (direct, Evidence::Direct, None),
                    (None, Some((tool_id, tool_score))) => (
                        TOOL_PROPAGATION * tool_score,
                        Evidence::ViaTool(tool_id),
                        Some((tool_id, tool_score)),
                    ),
                    (None, None) => unreachable!("merged entry without any hit"),
                };
                RankedResult {
                    kind: EntityKind::Service,
                    service_id,
                    score,
                    rank: 0,
                    evidence,
                    payload: entry.payload,
                    recommended_tool_id: tool.map(|(id, _)| id),
                    recommended_tool_score: tool.map(|(_, s)| s),
                    recommended_tool_ids: Vec::new(),
                    matched_capability: None,
                }
            })
            .collect())
    }

    /// Tools search clustered by parent service, each service carrying its
    /// top-3 tool bundle. Ranking matches `tools_only` on the best tool.
    fn workflows(&self, query: &[f32], k: usize) -> Result<Vec<RankedResult>, SearchError> {
        let tool_hits = self.manager.search_tools(query, k)?;

        struct Cluster {
            tools: Vec<(i64, f32)>,
            payload: EntryPayload,
        }

        let mut clusters: BTreeMap<i64, Cluster> = BTreeMap::new();
        for hit in tool_hits {
            let Some((service_id, payload)) = self.parent_of(&hit) else {
                continue;
            };
            clusters
                .entry(service_id)
                .or_insert(Cluster {
                    tools: Vec::new(),
                    payload,
                })
                .tools
                .push((hit.id, hit.score));
        }

        Ok(clusters
            .into_iter()
            .map(|(service_id, mut cluster)| {
                cluster.tools.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });
                cluster.tools.truncate(3);
                let (best_id, best_score) = cluster.tools[0];
                RankedResult {
                    kind: EntityKind::Tool,
                    service_id,
                    score: best_score,
                    rank: 0,
                    evidence: Evidence::ViaTool(best_id),
                    payload: cluster.payload,
                    recommended_tool_id: Some(best_id),
                    recommended_tool_score: Some(best_score),
                    recommended_tool_ids: cluster.tools.iter().map(|(id, _)| *id).collect(),
                    matched_capability: None,
                }
            })
            .collect())
    }

    /// Service search blended with capability text. The composed service
    /// vector already includes capability descriptions, so the vector side
    /// of the blend comes for free; here each hit is annotated with the
    /// capability whose name or description matches a query term.
    fn capabilities(
        &self,
        req: &SearchRequest,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RankedResult>, SearchError> {
        let terms: Vec<String> = req
            .text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 3)
            .map(str::to_lowercase)
            .collect();
        let hits = self.manager.search_services(query, k)?;
        Ok(hits
            .into_iter()
            .map(|hit| {
                let matched = hit.payload.capabilities.iter().find_map(|cap| {
                    let name = cap.name.to_lowercase();
                    let description = cap.description.to_lowercase();
                    terms
                        .iter()
                        .any(|t| name == *t || description.contains(t.as_str()))
                        .then(|| cap.name.clone())
                });
                let mut result = direct_result(hit);
                result.matched_capability = matched;
                result
            })
            .collect())
    }

    /// Resolve a tool hit's parent service payload from the live services
    /// index. A tool whose parent is gone (mid-cascade delete) is dropped.
    fn parent_of(&self, hit: &SearchHit) -> Option<(i64, EntryPayload)> {
        let service_id = hit.payload.parent_id?;
        let payload = self.manager.service_payload(service_id)?;
        Some((service_id, payload))
    }
}

fn direct_result(hit: SearchHit) -> RankedResult {
    RankedResult {
        kind: EntityKind::Service,
        service_id: hit.id,
        score: hit.score,
        rank: 0,
        evidence: Evidence::Direct,
        payload: hit.payload,
        recommended_tool_id: None,
        recommended_tool_score: None,
        recommended_tool_ids: Vec::new(),
        matched_capability: None,
    }
}

fn check_deadline(deadline: Option<Instant>) -> Result<(), SearchError> {
    match deadline {
        Some(d) if Instant::now() >= d => Err(SearchError::Cancelled),
        _ => Ok(()),
    }
}

fn apply_filters(results: &mut Vec<RankedResult>, req: &SearchRequest) {
    if !req.domains.is_empty() {
        results.retain(|r| {
            r.payload.domains.iter().any(|d| {
                req.domains
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(d))
            })
        });
    }
    if !req.capabilities.is_empty() {
        results.retain(|r| {
            r.payload.capabilities.iter().any(|cap| {
                req.capabilities.iter().any(|wanted| {
                    wanted.eq_ignore_ascii_case(&cap.name)
                        || cap
                            .description
                            .to_lowercase()
                            .contains(&wanted.to_lowercase())
                })
            })
        });
    }
    results.retain(|r| r.score >= req.min_score);
}

#[cfg(test)]
mod tests {
    use super::*;
    use index::CapabilityTag;

    fn result(service_id: i64, score: f32, domains: &[&str]) -> RankedResult {
        RankedResult {
            kind: EntityKind::Service,
            service_id,
            score,
            rank: 0,
            evidence: Evidence::Direct,
            payload: EntryPayload {
                name: format!("svc-{service_id}"),
                description: String::new(),
                parent_id: None,
                domains: domains.iter().map(|d| d.to_string()).collect(),
                capabilities: vec![CapabilityTag {
                    name: "reporting".into(),
                    description: "generate financial reports".into(),
                }],
            },
            recommended_tool_id: None,
            recommended_tool_score: None,
            recommended_tool_ids: Vec::new(),
            matched_capability: None,
        }
    }

    fn request() -> SearchRequest {
        SearchRequest::new("reporting", SearchMode::AgentsOnly).unwrap()
    }

    #[test]
    fn domain_filter_keeps_intersection_only() {
        let mut results = vec![
            result(1, 0.9, &["Finance"]),
            result(2, 0.8, &["Logistics"]),
            result(3, 0.7, &["finance", "CRM"]),
        ];
        let req = request().with_domains(vec!["Finance".into()]);
        apply_filters(&mut results, &req);
        let ids: Vec<i64> = results.iter().map(|r| r.service_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn capability_filter_matches_name_or_description() {
        let mut by_name = vec![result(1, 0.9, &[])];
        apply_filters(
            &mut by_name,
            &request().with_capabilities(vec!["REPORTING".into()]),
        );
        assert_eq!(by_name.len(), 1);

        let mut by_description = vec![result(1, 0.9, &[])];
        apply_filters(
            &mut by_description,
            &request().with_capabilities(vec!["financial".into()]),
        );
        assert_eq!(by_description.len(), 1);

        let mut no_match = vec![result(1, 0.9, &[])];
        apply_filters(
            &mut no_match,
            &request().with_capabilities(vec!["shipping".into()]),
        );
        assert!(no_match.is_empty());
    }

    #[test]
    fn min_score_applies_after_filters() {
        let mut results = vec![result(1, 0.9, &[]), result(2, 0.3, &[])];
        let req = request().with_min_score(0.5);
        apply_filters(&mut results, &req);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].service_id, 1);
    }

    #[test]
    fn expired_deadline_cancels() {
        let past = Instant::now() - std::time::Duration::from_millis(1);
        assert!(matches!(
            check_deadline(Some(past)),
            Err(SearchError::Cancelled)
        ));
        assert!(check_deadline(None).is_ok());
    }
}
