//! Per-catalog query agent.
//!
//! Answers a question against one catalog's consolidated content through a
//! fixed ladder of search stages, each one model call with a progressively
//! broader prompt:
//!
//! 1. **Index search**: only when extraction produced a compact product
//!    index section; cheapest and most precise when it hits.
//! 2. **Full-content search**: exact or near matches in the full text.
//! 3. **Related-product search**: told the direct search found nothing,
//!    broadens to same-category or similar-function products.
//! 4. **Category-inference search**: infers the category implied by the
//!    query, then lists the catalog's products in that category.
//!
//! After each stage a deterministic quality gate decides whether to stop.
//! The ladder order is behavioral, not just a performance choice: later
//! prompts state that the earlier stages found nothing. If no stage passes
//! the gate, the agent returns the best available output rather than
//! failing; the system always favors giving *some* answer over refusing.
//!
//! The gate is substring heuristics and is known to misclassify: an answer
//! legitimately containing the word "error" in a product description reads
//! as poor. That is a documented precision limitation. Changing the phrase
//! lists changes which answers users see, so treat them as behavior, not
//! tuning knobs.

use tracing::{debug, warn};

use crate::extract::truncate_chars;
use crate::llm::LlmClient;
use crate::models::CatalogMetadata;

/// Minimum length for a stage output to be considered at all.
pub const MIN_RESULT_LEN: usize = 30;

/// Minimum length for final acceptance by the quality gate.
pub const MIN_ACCEPT_LEN: usize = 100;

/// Canonical negative-phrase list, shared by the stage gate and the
/// orchestrator's poor-answer check. Case-insensitive substring match.
pub const NEGATIVE_PHRASES: [&str; 5] = [
    "no products matching",
    "not found",
    "no information",
    "unable to find",
    "error",
];

/// Markers that suggest the answer carries real product data.
const POSITIVE_MARKERS: [&str; 5] = ["price:", "model:", "page:", "specification", "feature"];

const CURRENCY_MARKERS: [char; 3] = ['$', '€', '£'];

/// Characters of catalog content embedded into full-content stage prompts.
const SEARCH_CONTENT_CHARS: usize = 15_000;

/// Characters of the product index embedded into the index stage prompt.
const INDEX_CONTENT_CHARS: usize = 5_000;

const INDEX_HEADER: &str = "=== PRODUCT INDEX ===";
const DETAIL_HEADER: &str = "=== DETAILED CATALOG CONTENT ===";

/// True when the text trips any negative phrase. Used both by the per-stage
/// gate and by the orchestrator when deciding to try the next catalog.
pub fn is_poor_answer(text: &str) -> bool {
    let lower = text.to_lowercase();
    NEGATIVE_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// The deterministic quality gate applied to each stage's output.
///
/// Rejects short or negative responses; accepts when the text carries a
/// positive marker (a currency symbol or a spec-like keyword) or repeats a
/// non-trivial query word verbatim.
pub fn passes_gate(text: &str, query: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.len() < MIN_RESULT_LEN {
        return false;
    }

    let lower = trimmed.to_lowercase();
    if NEGATIVE_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return false;
    }

    if trimmed.len() < MIN_ACCEPT_LEN {
        return false;
    }

    has_positive_marker(&lower) || query_term_present(&lower, query)
}

fn has_positive_marker(lower: &str) -> bool {
    lower.contains(&CURRENCY_MARKERS[..]) || POSITIVE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Does any non-trivial query word (length > 3) appear verbatim?
fn query_term_present(lower: &str, query: &str) -> bool {
    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 3)
        .any(|w| lower.contains(w.as_str()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Index,
    FullContent,
    Related,
    Category,
}

impl Stage {
    fn label(self) -> &'static str {
        match self {
            Stage::Index => "index",
            Stage::FullContent => "full-content",
            Stage::Related => "related-products",
            Stage::Category => "category-inference",
        }
    }
}

/// Answers queries against a single catalog's consolidated content.
pub struct CatalogQueryAgent<'a> {
    client: &'a dyn LlmClient,
}

impl<'a> CatalogQueryAgent<'a> {
    pub fn new(client: &'a dyn LlmClient) -> Self {
        Self { client }
    }

    /// Run the retry ladder for `query` against `catalog`.
    ///
    /// Returns the first stage output that passes the gate; otherwise the
    /// most recently produced non-empty output; otherwise the result of a
    /// deterministic local text search; otherwise a fixed explanation
    /// naming the catalog. Never returns an empty string and never fails.
    pub async fn answer(&self, query: &str, catalog: &CatalogMetadata) -> String {
        let index = product_index(&catalog.detailed_content);

        let mut stages = Vec::with_capacity(4);
        if index.is_some() {
            stages.push(Stage::Index);
        }
        stages.extend([Stage::FullContent, Stage::Related, Stage::Category]);

        let mut produced: Vec<String> = Vec::new();

        for stage in stages {
            let prompt = stage_prompt(stage, query, catalog, index);

            match self.client.generate(&prompt, &[]).await {
                Ok(text) => {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        debug!(
                            catalog = %catalog.filename,
                            stage = stage.label(),
                            "stage returned no text"
                        );
                        continue;
                    }
                    if passes_gate(trimmed, query) {
                        debug!(
                            catalog = %catalog.filename,
                            stage = stage.label(),
                            "stage output accepted"
                        );
                        return trimmed.to_string();
                    }
                    debug!(
                        catalog = %catalog.filename,
                        stage = stage.label(),
                        "stage output rejected by quality gate"
                    );
                    produced.push(trimmed.to_string());
                }
                Err(e) => {
                    warn!(
                        catalog = %catalog.filename,
                        stage = stage.label(),
                        prompt = %truncate_chars(&prompt, 160),
                        error = %e,
                        "query stage call failed"
                    );
                }
            }
        }

        // No stage passed: favor some answer over refusing.
        if let Some(best) = produced.pop() {
            return best;
        }

        // Every model call failed; fall back to a plain text scan.
        if let Some(found) = local_text_search(query, &catalog.detailed_content, &catalog.filename)
        {
            return found;
        }

        format!(
            "No information about that could be retrieved from catalog {}. \
             None of the search strategies returned results; the catalog may not \
             cover these products, or the content service may be temporarily unavailable.",
            catalog.filename
        )
    }
}

/// The compact product index section, when extraction produced one.
fn product_index(content: &str) -> Option<&str> {
    let start = content.find(INDEX_HEADER)?;
    let after = &content[start + INDEX_HEADER.len()..];
    let index = match after.find(DETAIL_HEADER) {
        Some(end) => &after[..end],
        None => after,
    };
    let trimmed = index.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn stage_prompt(
    stage: Stage,
    query: &str,
    catalog: &CatalogMetadata,
    index: Option<&str>,
) -> String {
    let name = &catalog.filename;
    let content = truncate_chars(&catalog.detailed_content, SEARCH_CONTENT_CHARS);

    match stage {
        Stage::Index => format!(
            r#"You are a product specialist for catalog "{name}".

User query: "{query}"

Product index:
{index}

TASK: Search the product index for entries matching the query.
For every match include the product name, model number, price, and page reference from the index.
If nothing in the index matches, respond with:
"No products matching '{query}' were found in this index.""#,
            name = name,
            query = query,
            index = truncate_chars(index.unwrap_or_default(), INDEX_CONTENT_CHARS),
        ),
        Stage::FullContent => format!(
            r#"You are analyzing the catalog "{name}" for products related to "{query}".

Catalog content:
{content}

TASK: Search thoroughly for ANY products that match or relate to the query "{query}".

If you find matching products, provide:
1. All matching products with full details
2. Exact product names and model numbers
3. Prices and specifications
4. Page numbers where found
5. Why each product matches the search
6. Features and capabilities

If NO matching products are found, respond with:
"No products matching '{query}' were found in this catalog. This catalog contains [list the main product types you can see]."

Be thorough and accurate. Don't make up information."#,
        ),
        Stage::Related => format!(
            r#"You are a product specialist for catalog "{name}".

A direct search for "{query}" found no matching products in this catalog.

Catalog content:
{content}

TASK: Broaden the search. Look for products in the same category as the query,
or products that serve a similar function.
For each related product provide the exact name, model number, price,
page reference, and a short explanation of how it relates to "{query}".
If there are no related products either, respond with:
"No products matching '{query}' were found in this catalog.""#,
        ),
        Stage::Category => format!(
            r#"You are a product specialist for catalog "{name}".

Earlier searches for "{query}" found no direct or related matches.

Catalog content:
{content}

TASK:
1. First infer the most likely product category implied by "{query}".
2. Then list ALL products in this catalog that belong to that category,
   with names, models, prices, and page references.
State the inferred category at the top of your answer.
If the catalog has no products in that category, respond with:
"No products matching '{query}' were found in this catalog.""#,
        ),
    }
}

/// Deterministic line-match search over the consolidated content, used only
/// when every model call failed. Returns up to 20 matching lines.
fn local_text_search(query: &str, content: &str, catalog_name: &str) -> Option<String> {
    let query_words: Vec<String> = query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    if query_words.is_empty() {
        return None;
    }

    let mut matches: Vec<&str> = Vec::new();
    for line in content.lines() {
        let lower = line.to_lowercase();
        if query_words.iter().any(|w| lower.contains(w.as_str())) {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                matches.push(trimmed);
                if matches.len() == 20 {
                    break;
                }
            }
        }
    }

    if matches.is_empty() {
        return None;
    }

    Some(format!(
        "**Found information about '{}':**\n\n{}\n\n*Found in catalog: {}*",
        query,
        matches.join("\n"),
        catalog_name
    ))
}
