//! Catalog content extraction.
//!
//! Three model-backed operations run once per uploaded catalog:
//!
//! 1. [`ContentExtractor::extract_metadata`]: a structured profile
//!    (summary, categories, keywords, ...) from a sample of the first pages.
//! 2. [`ContentExtractor::extract_full_content`]: exhaustive page-by-page
//!    product extraction, batched, tolerant of per-batch failures.
//! 3. [`ContentExtractor::consolidate`]: a single pass that reorganizes the
//!    raw batch text into a product index plus detailed content.
//!
//! Metadata parse failures degrade to a documented fallback profile so every
//! catalog always has a non-empty summary for the ranker. Only a transport
//! failure from the model propagates, which is what keeps catalog ingestion
//! atomic.

use serde::Deserialize;
use tracing::warn;

use crate::llm::{strip_code_fences, LlmClient, LlmError};
use crate::raster::PageImage;

/// Pages sampled from the front of the catalog for metadata extraction.
const METADATA_SAMPLE_PAGES: usize = 8;

/// Characters of raw batch text embedded into the consolidation prompt, and
/// kept when consolidation fails and we fall back to the raw text.
const CONSOLIDATION_INPUT_CHARS: usize = 20_000;

/// Structured metadata the model is asked to produce for a catalog.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogProfile {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub product_types: Vec<String>,
    #[serde(default)]
    pub main_business_type: String,
    #[serde(default)]
    pub brand_names: Vec<String>,
    #[serde(default)]
    pub product_names: Vec<String>,
}

impl CatalogProfile {
    /// The documented fallback used whenever the model's metadata response
    /// cannot be parsed. The ranker requires every catalog to carry a
    /// non-empty summary, so this is a hard requirement, not best-effort.
    pub fn fallback(filename: &str) -> Self {
        let stem = filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(filename);
        Self {
            summary: format!("Product catalog: {}", filename),
            categories: vec!["general".to_string()],
            keywords: vec![stem.to_lowercase()],
            ..Default::default()
        }
    }
}

/// Runs the per-catalog extraction pipeline against an [`LlmClient`].
pub struct ContentExtractor<'a> {
    client: &'a dyn LlmClient,
    batch_size: usize,
}

impl<'a> ContentExtractor<'a> {
    pub fn new(client: &'a dyn LlmClient, batch_size: usize) -> Self {
        Self { client, batch_size }
    }

    /// Extract the structured metadata profile from the catalog's first pages.
    ///
    /// Samples at most [`METADATA_SAMPLE_PAGES`] images, issues one model
    /// call, and parses the response as JSON (defensively stripping code
    /// fences). A parse failure (or a response missing the summary) yields
    /// [`CatalogProfile::fallback`]. A transport failure propagates.
    pub async fn extract_metadata(
        &self,
        images: &[PageImage],
        filename: &str,
    ) -> Result<CatalogProfile, LlmError> {
        let sample = &images[..images.len().min(METADATA_SAMPLE_PAGES)];
        let text = self.client.generate(METADATA_PROMPT, sample).await?;

        match serde_json::from_str::<CatalogProfile>(strip_code_fences(&text)) {
            Ok(profile) if !profile.summary.trim().is_empty() => Ok(profile),
            Ok(_) => {
                warn!(catalog = filename, "metadata response had no summary, using fallback");
                Ok(CatalogProfile::fallback(filename))
            }
            Err(e) => {
                warn!(catalog = filename, error = %e, "metadata response was not valid JSON, using fallback");
                Ok(CatalogProfile::fallback(filename))
            }
        }
    }

    /// Extract the full catalog content in fixed-size page batches.
    ///
    /// One model call per batch; each batch's output is prefixed with a
    /// `=== PAGES {start}-{end} ===` header. A failed batch contributes an
    /// inline error marker instead of aborting the extraction; one bad
    /// batch does not invalidate the catalog.
    pub async fn extract_full_content(&self, images: &[PageImage], filename: &str) -> String {
        let mut sections = Vec::new();

        for batch in images.chunks(self.batch_size) {
            let start = batch[0].page;
            let end = batch[batch.len() - 1].page;
            let prompt = batch_prompt(start, end);

            let section = match self.client.generate(&prompt, batch).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        catalog = filename,
                        pages = format!("{}-{}", start, end),
                        error = %e,
                        "batch extraction failed"
                    );
                    format!("[content extraction failed for pages {}-{}]", start, end)
                }
            };

            sections.push(format!("=== PAGES {}-{} ===\n{}", start, end, section));
        }

        sections.join("\n\n")
    }

    /// Consolidate raw batch text into a searchable two-section knowledge
    /// base (product index, then detailed content).
    ///
    /// Consolidation is an enhancement: on failure the first
    /// [`CONSOLIDATION_INPUT_CHARS`] characters of the raw input are returned
    /// instead, so downstream search always has content to work with.
    pub async fn consolidate(&self, raw: &str, filename: &str) -> String {
        let prompt = consolidation_prompt(raw, filename);

        match self.client.generate(&prompt, &[]).await {
            Ok(text) => text,
            Err(e) => {
                warn!(catalog = filename, error = %e, "consolidation failed, keeping raw batch text");
                truncate_chars(raw, CONSOLIDATION_INPUT_CHARS).to_string()
            }
        }
    }
}

/// Truncate to a character count without splitting a UTF-8 code point.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

const METADATA_PROMPT: &str = r#"Analyze this product catalog thoroughly and provide metadata in the following JSON format:
{
    "summary": "Detailed 3-4 sentence summary of what this catalog contains, including specific product types and brands",
    "categories": ["category1", "category2", "category3", "category4", "category5"],
    "keywords": ["keyword1", "keyword2", "keyword3", "keyword4", "keyword5", "keyword6", "keyword7", "keyword8"],
    "product_types": ["specific_product_type1", "specific_product_type2", "specific_product_type3"],
    "main_business_type": "detailed description of business type",
    "brand_names": ["brand1", "brand2", "brand3"],
    "product_names": ["specific_product_name1", "specific_product_name2", "specific_product_name3"]
}

Focus on:
- Exact product names and model numbers
- Specific product categories (e.g., "glass kettles", "espresso machines", "blenders")
- Brand names and manufacturers
- Product features and characteristics
- Target market or industry

Be very specific with product types and names. Avoid generic terms.
Provide only the JSON response, no other text."#;

fn batch_prompt(start: usize, end: usize) -> String {
    format!(
        r#"You are analyzing pages {start} to {end} of a product catalog.

Extract ALL information including:
- Product names, models, SKUs, and exact product identifiers
- Complete descriptions and features
- Prices and pricing variations
- Technical specifications and dimensions
- Categories, sections, and product types
- Brand names and manufacturers
- Special offers or promotions
- Warranty and support details
- Page numbers for reference

IMPORTANT: Be extremely thorough and extract ALL visible text including text in images.
Pay special attention to product names and variations.

Format the response as structured data that can be easily searched and referenced.
Include a product list at the beginning with all product names found."#
    )
}

fn consolidation_prompt(raw: &str, filename: &str) -> String {
    format!(
        r#"Create a consolidated, well-organized, and highly searchable knowledge base for catalog {filename}.

IMPORTANT REQUIREMENTS:
1. Extract ALL product names, models, and variations
2. Create a comprehensive product index at the beginning
3. Organize by categories and product types
4. Include ALL specifications, prices, and features
5. Remove duplicates but keep all unique information
6. Make it easily searchable for any product query

Original Analysis:
{content}

Format as:
=== PRODUCT INDEX ===
[List all products found with page references]

=== DETAILED CATALOG CONTENT ===
[Organized, searchable content]"#,
        filename = filename,
        content = truncate_chars(raw, CONSOLIDATION_INPUT_CHARS),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stub that replays a fixed response, or fails every call.
    struct StubClient {
        response: Option<String>,
        calls: AtomicUsize,
    }

    impl StubClient {
        fn replying(text: &str) -> Self {
            Self {
                response: Some(text.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                response: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for StubClient {
        fn model_name(&self) -> &str {
            "stub"
        }

        async fn generate(&self, _prompt: &str, _images: &[PageImage]) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Some(text) => Ok(text.clone()),
                None => Err(LlmError::Network("stub offline".to_string())),
            }
        }
    }

    /// Stub whose batch calls fail only for a chosen call index.
    struct FlakyClient {
        fail_on_call: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        fn model_name(&self) -> &str {
            "flaky-stub"
        }

        async fn generate(&self, _prompt: &str, _images: &[PageImage]) -> Result<String, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == self.fail_on_call {
                Err(LlmError::Api {
                    status: 500,
                    message: "boom".to_string(),
                })
            } else {
                Ok(format!("batch output {}", call))
            }
        }
    }

    fn pages(n: usize) -> Vec<PageImage> {
        (1..=n)
            .map(|page| PageImage {
                page,
                png: vec![0u8; 4],
            })
            .collect()
    }

    #[tokio::test]
    async fn metadata_parses_valid_json() {
        let client = StubClient::replying(
            r#"{"summary": "Kitchen appliances from Acme.", "categories": ["kettles"], "keywords": ["kettle"]}"#,
        );
        let extractor = ContentExtractor::new(&client, 8);
        let profile = extractor
            .extract_metadata(&pages(3), "acme.pdf")
            .await
            .unwrap();
        assert_eq!(profile.summary, "Kitchen appliances from Acme.");
        assert_eq!(profile.categories, vec!["kettles"]);
        assert!(profile.brand_names.is_empty());
    }

    #[tokio::test]
    async fn metadata_parses_fenced_json() {
        let client =
            StubClient::replying("```json\n{\"summary\": \"Fenced but valid.\"}\n```");
        let extractor = ContentExtractor::new(&client, 8);
        let profile = extractor
            .extract_metadata(&pages(1), "fenced.pdf")
            .await
            .unwrap();
        assert_eq!(profile.summary, "Fenced but valid.");
    }

    #[tokio::test]
    async fn metadata_falls_back_on_bad_json() {
        let client = StubClient::replying("The catalog contains kettles and toasters.");
        let extractor = ContentExtractor::new(&client, 8);
        let profile = extractor
            .extract_metadata(&pages(2), "Spring Catalog.pdf")
            .await
            .unwrap();
        assert_eq!(profile.summary, "Product catalog: Spring Catalog.pdf");
        assert_eq!(profile.categories, vec!["general"]);
        assert_eq!(profile.keywords, vec!["spring catalog"]);
        assert!(profile.product_types.is_empty());
        assert!(profile.brand_names.is_empty());
        assert!(profile.product_names.is_empty());
    }

    #[tokio::test]
    async fn metadata_falls_back_on_empty_summary() {
        let client = StubClient::replying(r#"{"categories": ["misc"]}"#);
        let extractor = ContentExtractor::new(&client, 8);
        let profile = extractor
            .extract_metadata(&pages(2), "blank.pdf")
            .await
            .unwrap();
        assert_eq!(profile.summary, "Product catalog: blank.pdf");
    }

    #[tokio::test]
    async fn metadata_propagates_transport_failure() {
        let client = StubClient::failing();
        let extractor = ContentExtractor::new(&client, 8);
        let result = extractor.extract_metadata(&pages(2), "down.pdf").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn metadata_samples_at_most_eight_pages() {
        let client = StubClient::replying(r#"{"summary": "ok"}"#);
        let extractor = ContentExtractor::new(&client, 8);
        // 30 pages in, only the first 8 should be sent; the stub cannot see
        // them, but slicing past the sample bound would panic on fewer pages.
        extractor
            .extract_metadata(&pages(30), "big.pdf")
            .await
            .unwrap();
        extractor
            .extract_metadata(&pages(2), "small.pdf")
            .await
            .unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn full_content_emits_page_range_headers() {
        let client = StubClient::replying("products here");
        let extractor = ContentExtractor::new(&client, 2);
        let content = extractor.extract_full_content(&pages(5), "c.pdf").await;
        assert!(content.contains("=== PAGES 1-2 ==="));
        assert!(content.contains("=== PAGES 3-4 ==="));
        assert!(content.contains("=== PAGES 5-5 ==="));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn full_content_marks_failed_batch_and_continues() {
        let client = FlakyClient {
            fail_on_call: 1,
            calls: AtomicUsize::new(0),
        };
        let extractor = ContentExtractor::new(&client, 2);
        let content = extractor.extract_full_content(&pages(6), "c.pdf").await;
        assert!(content.contains("batch output 0"));
        assert!(content.contains("[content extraction failed for pages 3-4]"));
        assert!(content.contains("batch output 2"));
    }

    #[tokio::test]
    async fn consolidate_falls_back_to_truncated_raw() {
        let client = StubClient::failing();
        let extractor = ContentExtractor::new(&client, 8);
        let raw = "x".repeat(25_000);
        let result = extractor.consolidate(&raw, "c.pdf").await;
        assert_eq!(result.len(), CONSOLIDATION_INPUT_CHARS);
    }

    #[tokio::test]
    async fn consolidate_returns_model_output_on_success() {
        let client = StubClient::replying("=== PRODUCT INDEX ===\n- Kettle");
        let extractor = ContentExtractor::new(&client, 8);
        let result = extractor.consolidate("raw text", "c.pdf").await;
        assert!(result.starts_with("=== PRODUCT INDEX ==="));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "ééééé";
        assert_eq!(truncate_chars(s, 3), "ééé");
        assert_eq!(truncate_chars(s, 10), s);
    }
}
