//! Catalog relevance ranking.
//!
//! One model call scores every catalog 0–10 against the query. The model's
//! response is treated as hostile input: code fences are stripped, entries
//! naming catalogs that do not exist are dropped (a hallucinated filename
//! must never be selected downstream), and any transport or parse failure
//! degrades to a uniform fallback ranking so the orchestrator always has
//! something to try.

use serde::Deserialize;
use tracing::warn;

use crate::llm::{strip_code_fences, LlmClient};
use crate::models::CatalogSearchResult;
use crate::store::CatalogStore;

/// Score assigned to every catalog when ranking falls back.
const FALLBACK_SCORE: f64 = 5.0;

/// One entry of the JSON array the model is asked to return.
#[derive(Debug, Deserialize)]
struct RankedEntry {
    #[serde(default)]
    catalog: String,
    #[serde(default)]
    relevance_score: f64,
    #[serde(default)]
    reason: String,
}

pub struct RelevanceRanker<'a> {
    client: &'a dyn LlmClient,
}

impl<'a> RelevanceRanker<'a> {
    pub fn new(client: &'a dyn LlmClient) -> Self {
        Self { client }
    }

    /// Rank all catalogs in the store against `query`, highest score first,
    /// truncated to `top_k`.
    ///
    /// Ordering is a stable sort descending by score: ties preserve the
    /// order produced by the model (or store order on the fallback path).
    pub async fn rank(
        &self,
        query: &str,
        store: &CatalogStore,
        top_k: usize,
    ) -> Vec<CatalogSearchResult> {
        if store.is_empty() {
            return Vec::new();
        }

        let prompt = ranking_prompt(query, &store.list_summaries());

        let response = match self.client.generate(&prompt, &[]).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "catalog ranking call failed, using uniform fallback");
                return fallback_ranking(store, top_k);
            }
        };

        let entries: Vec<RankedEntry> =
            match serde_json::from_str(strip_code_fences(&response)) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "catalog ranking response was not valid JSON, using uniform fallback");
                    return fallback_ranking(store, top_k);
                }
            };

        let mut results: Vec<CatalogSearchResult> = entries
            .into_iter()
            .filter(|entry| {
                if store.contains(&entry.catalog) {
                    true
                } else {
                    warn!(catalog = %entry.catalog, "ranking named an unknown catalog, dropping entry");
                    false
                }
            })
            .map(|entry| CatalogSearchResult {
                catalog_name: entry.catalog,
                relevance_score: entry.relevance_score,
                reason: entry.reason,
            })
            .collect();

        // Stable: equal scores keep the model's ordering.
        results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        results
    }
}

/// Every known catalog at the same nominal score, store order, top-k.
fn fallback_ranking(store: &CatalogStore, top_k: usize) -> Vec<CatalogSearchResult> {
    store
        .iter()
        .take(top_k)
        .map(|c| CatalogSearchResult {
            catalog_name: c.filename.clone(),
            relevance_score: FALLBACK_SCORE,
            reason: "Fallback result".to_string(),
        })
        .collect()
}

fn ranking_prompt(query: &str, catalog_summaries: &str) -> String {
    format!(
        r#"You are a catalog relevance expert. Given this user query: "{query}"

And these available catalogs:
{catalog_summaries}

TASK: Rank ALL catalogs by relevance to the query (0-10 scale, 10 being most relevant).

SCORING GUIDELINES:
- 10: Perfect match (exact product mentioned in catalog)
- 8-9: Very high match (similar products, same category)
- 6-7: Good match (related products or category)
- 4-5: Moderate match (some relevance)
- 1-3: Low match (minimal relevance)
- 0: No match (completely unrelated)

IMPORTANT: Consider these factors in order of importance:
1. Exact product name matches
2. Product type/category matches
3. Brand name matches
4. Keyword matches
5. General relevance

Return ONLY a JSON array with this exact format:
[
    {{"catalog": "exact_filename.pdf", "relevance_score": 9, "reason": "Contains Temperature Glass Kettle products"}},
    {{"catalog": "exact_filename2.pdf", "relevance_score": 2, "reason": "Only contains espresso machines, not kettles"}}
]

Include ALL catalogs in the response with their scores.
Return only the JSON, no other text."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ContentExtractor;
    use crate::llm::LlmError;
    use crate::raster::{PageImage, RasterError, Rasterizer};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct StubRasterizer;

    impl Rasterizer for StubRasterizer {
        fn rasterize(&self, _pdf: &[u8], _dpi: u32) -> Result<Vec<PageImage>, RasterError> {
            Ok(vec![PageImage {
                page: 1,
                png: vec![0],
            }])
        }
    }

    /// Replays one canned response for ranking calls; ingest calls get a
    /// minimal metadata profile so the store can be populated.
    struct StubClient {
        ranking_response: Option<String>,
    }

    #[async_trait]
    impl LlmClient for StubClient {
        fn model_name(&self) -> &str {
            "stub"
        }

        async fn generate(&self, prompt: &str, _images: &[PageImage]) -> Result<String, LlmError> {
            if prompt.starts_with("You are a catalog relevance expert") {
                return match &self.ranking_response {
                    Some(text) => Ok(text.clone()),
                    None => Err(LlmError::Network("stub offline".to_string())),
                };
            }
            Ok(r#"{"summary": "Stub catalog."}"#.to_string())
        }
    }

    async fn store_with(names: &[&str], client: &StubClient, tmp: &TempDir) -> CatalogStore {
        let mut store = CatalogStore::open(tmp.path()).unwrap();
        let extractor = ContentExtractor::new(client, 8);
        for name in names {
            store
                .add(name, b"pdf".to_vec(), 200, Arc::new(StubRasterizer), &extractor)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn failing_client_yields_uniform_fallback_in_store_order() {
        let tmp = TempDir::new().unwrap();
        let client = StubClient {
            ranking_response: None,
        };
        let store = store_with(&["c.pdf", "a.pdf", "b.pdf", "d.pdf"], &client, &tmp).await;

        let ranked = RelevanceRanker::new(&client)
            .rank("anything at all", &store, 3)
            .await;

        assert_eq!(ranked.len(), 3);
        let names: Vec<&str> = ranked.iter().map(|r| r.catalog_name.as_str()).collect();
        assert_eq!(names, vec!["c.pdf", "a.pdf", "b.pdf"]);
        assert!(ranked.iter().all(|r| r.relevance_score == 5.0));
    }

    #[tokio::test]
    async fn unparseable_response_yields_uniform_fallback() {
        let tmp = TempDir::new().unwrap();
        let client = StubClient {
            ranking_response: Some("I think the best catalog is a.pdf".to_string()),
        };
        let store = store_with(&["a.pdf", "b.pdf"], &client, &tmp).await;

        let ranked = RelevanceRanker::new(&client).rank("kettle", &store, 3).await;
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|r| r.relevance_score == 5.0));
    }

    #[tokio::test]
    async fn hallucinated_catalog_names_are_dropped() {
        let tmp = TempDir::new().unwrap();
        let client = StubClient {
            ranking_response: Some(
                r#"[
                    {"catalog": "a.pdf", "relevance_score": 9, "reason": "kettles"},
                    {"catalog": "ghost.pdf", "relevance_score": 10, "reason": "invented"},
                    {"catalog": "b.pdf", "relevance_score": 4, "reason": "toasters"}
                ]"#
                .to_string(),
            ),
        };
        let store = store_with(&["a.pdf", "b.pdf"], &client, &tmp).await;

        let ranked = RelevanceRanker::new(&client).rank("kettle", &store, 3).await;
        let names: Vec<&str> = ranked.iter().map(|r| r.catalog_name.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
        assert_eq!(ranked[0].relevance_score, 9.0);
        assert_eq!(ranked[1].relevance_score, 4.0);
    }

    #[tokio::test]
    async fn fenced_response_parses_and_sorts_descending() {
        let tmp = TempDir::new().unwrap();
        let client = StubClient {
            ranking_response: Some(
                "```json\n[{\"catalog\": \"b.pdf\", \"relevance_score\": 3, \"reason\": \"low\"}, {\"catalog\": \"a.pdf\", \"relevance_score\": 8, \"reason\": \"high\"}]\n```"
                    .to_string(),
            ),
        };
        let store = store_with(&["a.pdf", "b.pdf"], &client, &tmp).await;

        let ranked = RelevanceRanker::new(&client).rank("kettle", &store, 3).await;
        assert_eq!(ranked[0].catalog_name, "a.pdf");
        assert_eq!(ranked[1].catalog_name, "b.pdf");
    }

    #[tokio::test]
    async fn ties_preserve_model_order() {
        let tmp = TempDir::new().unwrap();
        let client = StubClient {
            ranking_response: Some(
                r#"[
                    {"catalog": "b.pdf", "relevance_score": 7, "reason": "tie"},
                    {"catalog": "a.pdf", "relevance_score": 7, "reason": "tie"}
                ]"#
                .to_string(),
            ),
        };
        let store = store_with(&["a.pdf", "b.pdf"], &client, &tmp).await;

        let ranked = RelevanceRanker::new(&client).rank("kettle", &store, 3).await;
        let names: Vec<&str> = ranked.iter().map(|r| r.catalog_name.as_str()).collect();
        assert_eq!(names, vec!["b.pdf", "a.pdf"]);
    }

    #[tokio::test]
    async fn empty_store_ranks_empty() {
        let tmp = TempDir::new().unwrap();
        let client = StubClient {
            ranking_response: None,
        };
        let store = CatalogStore::open(tmp.path()).unwrap();
        let ranked = RelevanceRanker::new(&client).rank("kettle", &store, 3).await;
        assert!(ranked.is_empty());
    }
}
