//! Query orchestration across catalogs.
//!
//! One query flows through a strictly sequential chain: rank the catalogs,
//! query the best one, and if the answer trips the poor-answer check, retry
//! against the next-ranked candidates until one answers well or the
//! candidates run out. There is no parallel fan-out; each step depends on
//! the previous stage's outcome.
//!
//! Every failure below this layer has already been absorbed into degraded
//! text (uniform rankings, best-available answers), so `process` itself is
//! infallible: the user always receives prose, never an error.

use tracing::{debug, info};

use crate::llm::LlmClient;
use crate::query::{is_poor_answer, CatalogQueryAgent};
use crate::rank::RelevanceRanker;
use crate::store::CatalogStore;

const NO_CATALOGS_MSG: &str =
    "No catalogs have been added yet. Add a product catalog PDF first, then ask again.";

const NO_SUITABLE_CATALOG_MSG: &str = "No suitable catalog found for your query.";

/// The orchestrator's complete output contract to the presentation layer.
#[derive(Debug, Clone)]
pub struct Answer {
    /// Formatted response: selected catalog, its relevance score, and the
    /// accepted answer body.
    pub text: String,
    /// The catalog ultimately used, when one was.
    pub selected_catalog: Option<String>,
}

pub struct Orchestrator<'a> {
    client: &'a dyn LlmClient,
    top_k: usize,
}

impl<'a> Orchestrator<'a> {
    pub fn new(client: &'a dyn LlmClient, top_k: usize) -> Self {
        Self { client, top_k }
    }

    /// Answer `query` using the most relevant catalog, falling back across
    /// the ranked candidates when an answer looks poor.
    pub async fn process(&self, query: &str, store: &CatalogStore) -> Answer {
        if store.is_empty() {
            return Answer {
                text: NO_CATALOGS_MSG.to_string(),
                selected_catalog: None,
            };
        }

        let ranked = RelevanceRanker::new(self.client)
            .rank(query, store, self.top_k)
            .await;

        if ranked.is_empty() {
            return Answer {
                text: NO_SUITABLE_CATALOG_MSG.to_string(),
                selected_catalog: None,
            };
        }

        debug!(
            candidates = ?ranked.iter().map(|r| (&r.catalog_name, r.relevance_score)).collect::<Vec<_>>(),
            "catalog ranking"
        );

        let agent = CatalogQueryAgent::new(self.client);
        let mut first_attempt = None;

        let mut accepted = None;
        for candidate in &ranked {
            let Some(metadata) = store.get(&candidate.catalog_name) else {
                continue;
            };

            let response = agent.answer(query, metadata).await;

            if !is_poor_answer(&response) {
                info!(catalog = %candidate.catalog_name, "accepted answer");
                accepted = Some((candidate, response));
                break;
            }

            debug!(catalog = %candidate.catalog_name, "poor answer, trying next candidate");
            if first_attempt.is_none() {
                first_attempt = Some((candidate, response));
            }
        }

        // Every candidate answered poorly: surface the top-ranked catalog's
        // response anyway rather than refusing.
        let Some((candidate, body)) = accepted.or(first_attempt) else {
            return Answer {
                text: NO_SUITABLE_CATALOG_MSG.to_string(),
                selected_catalog: None,
            };
        };

        let text = format!(
            "**Selected Catalog: {}** (Relevance: {:.1}/10)\n\n**Answer:**\n{}",
            candidate.catalog_name, candidate.relevance_score, body
        );

        Answer {
            text,
            selected_catalog: Some(candidate.catalog_name.clone()),
        }
    }
}
