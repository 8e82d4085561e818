//! Catalog metadata store.
//!
//! Owns the collection of [`CatalogMetadata`] records and the persisted
//! library file. The store is the sole writer: `add` and `remove` are the
//! only mutations, both persist immediately, and both take `&mut self` so
//! load-modify-save sequences cannot interleave within a process.
//!
//! Records iterate in insertion order, which makes [`CatalogStore::list_summaries`]
//! byte-stable across calls, required so the ranker's prompt construction is
//! deterministic even though the model's response is not.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::extract::ContentExtractor;
use crate::llm::LlmError;
use crate::models::CatalogMetadata;
use crate::raster::{RasterError, Rasterizer};

/// Name of the persisted library file inside the storage directory.
const STORE_FILE: &str = "catalogs.json";

/// Why a catalog could not be ingested. The add operation is atomic: on any
/// of these, no record is stored and the backing file is removed.
#[derive(Debug)]
pub enum IngestError {
    Io(std::io::Error),
    Raster(RasterError),
    Extract(LlmError),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Io(e) => write!(f, "catalog file I/O failed: {}", e),
            IngestError::Raster(e) => write!(f, "catalog rasterization failed: {}", e),
            IngestError::Extract(e) => write!(f, "catalog extraction failed: {}", e),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        IngestError::Io(e)
    }
}

/// The catalog library: in-memory records plus their persisted form.
pub struct CatalogStore {
    dir: PathBuf,
    catalogs: Vec<CatalogMetadata>,
}

impl CatalogStore {
    /// Open (or create) the store rooted at `dir`.
    ///
    /// A missing library file yields an empty store. A corrupt library file
    /// is logged and also yields an empty store; startup never fails on
    /// bad persisted state.
    pub fn open(dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)?;

        let store_path = dir.join(STORE_FILE);
        let catalogs = if store_path.exists() {
            match std::fs::read_to_string(&store_path) {
                Ok(content) => match serde_json::from_str::<Vec<CatalogMetadata>>(&content) {
                    Ok(records) => records,
                    Err(e) => {
                        warn!(path = %store_path.display(), error = %e, "catalog library file is corrupt, starting empty");
                        Vec::new()
                    }
                },
                Err(e) => {
                    warn!(path = %store_path.display(), error = %e, "catalog library file is unreadable, starting empty");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            catalogs,
        })
    }

    pub fn len(&self) -> usize {
        self.catalogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalogs.is_empty()
    }

    /// Records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &CatalogMetadata> {
        self.catalogs.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.catalogs.iter().map(|c| c.filename.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.catalogs.iter().any(|c| c.filename == name)
    }

    pub fn get(&self, name: &str) -> Option<&CatalogMetadata> {
        self.catalogs.iter().find(|c| c.filename == name)
    }

    /// Ingest a catalog: persist the PDF, rasterize it, run the extraction
    /// pipeline, and insert (or overwrite) the record keyed by `filename`.
    ///
    /// Atomic: if rasterization or metadata extraction fails, the backing
    /// file is removed and no record is stored. Re-adding an existing
    /// filename overwrites its record in place and replaces the file.
    pub async fn add(
        &mut self,
        filename: &str,
        pdf_bytes: Vec<u8>,
        dpi: u32,
        rasterizer: Arc<dyn Rasterizer>,
        extractor: &ContentExtractor<'_>,
    ) -> Result<&CatalogMetadata, IngestError> {
        let file_path = self.dir.join(filename);
        std::fs::write(&file_path, &pdf_bytes)?;

        // pdfium is not async-safe and rendering is CPU-bound.
        let raster_result = tokio::task::spawn_blocking(move || {
            rasterizer.rasterize(&pdf_bytes, dpi)
        })
        .await
        .map_err(|e| RasterError::Pdf(format!("render task failed: {}", e)));

        let pages = match raster_result.and_then(|r| r) {
            Ok(pages) => pages,
            Err(e) => {
                discard_backing_file(&file_path);
                return Err(IngestError::Raster(e));
            }
        };

        let profile = match extractor.extract_metadata(&pages, filename).await {
            Ok(profile) => profile,
            Err(e) => {
                discard_backing_file(&file_path);
                return Err(IngestError::Extract(e));
            }
        };

        let raw = extractor.extract_full_content(&pages, filename).await;
        let detailed_content = extractor.consolidate(&raw, filename).await;

        let metadata = CatalogMetadata {
            filename: filename.to_string(),
            file_path,
            summary: profile.summary,
            categories: profile.categories,
            keywords: profile.keywords,
            product_types: profile.product_types,
            brand_names: profile.brand_names,
            product_names: profile.product_names,
            page_count: pages.len(),
            processing_date: Some(chrono::Utc::now()),
            is_processed: true,
            detailed_content,
        };

        let index = match self.catalogs.iter().position(|c| c.filename == filename) {
            Some(index) => {
                self.catalogs[index] = metadata;
                index
            }
            None => {
                self.catalogs.push(metadata);
                self.catalogs.len() - 1
            }
        };

        self.save()?;
        info!(catalog = filename, pages = self.catalogs[index].page_count, "catalog added");
        Ok(&self.catalogs[index])
    }

    /// Remove a catalog and its backing file. Returns `false` for an
    /// unknown name. A backing file that is already gone is logged and
    /// tolerated.
    pub fn remove(&mut self, name: &str) -> anyhow::Result<bool> {
        let Some(index) = self.catalogs.iter().position(|c| c.filename == name) else {
            return Ok(false);
        };

        let record = self.catalogs.remove(index);
        if let Err(e) = std::fs::remove_file(&record.file_path) {
            warn!(catalog = name, error = %e, "could not delete backing file, removing record anyway");
        }

        self.save()?;
        info!(catalog = name, "catalog removed");
        Ok(true)
    }

    /// Human-readable concatenation of every record's human-facing fields,
    /// used as the ranker's prompt input. Insertion-ordered and byte-stable
    /// between mutations.
    pub fn list_summaries(&self) -> String {
        if self.catalogs.is_empty() {
            return "No catalogs available.".to_string();
        }

        let blocks: Vec<String> = self
            .catalogs
            .iter()
            .map(|c| {
                format!(
                    "Catalog: {}\nSummary: {}\nCategories: {}\nProduct Types: {}\nKeywords: {}\nBrand Names: {}\nProduct Names: {}\nPages: {}",
                    c.filename,
                    c.summary,
                    c.categories.join(", "),
                    c.product_types.join(", "),
                    c.keywords.join(", "),
                    c.brand_names.join(", "),
                    c.product_names.join(", "),
                    c.page_count,
                )
            })
            .collect();

        blocks.join("\n\n")
    }

    /// Formatted library report for the `list` command.
    pub fn overview(&self) -> String {
        if self.catalogs.is_empty() {
            return "No catalogs available in the library. Add a PDF catalog to get started."
                .to_string();
        }

        let total_pages: usize = self.catalogs.iter().map(|c| c.page_count).sum();
        let mut out = format!(
            "Catalog Library Overview\n\nTotal catalogs: {}\nTotal pages: {}\n",
            self.catalogs.len(),
            total_pages
        );

        for (i, c) in self.catalogs.iter().enumerate() {
            out.push_str(&format!("\n{}. {}\n", i + 1, c.filename));
            out.push_str(&format!("   Summary: {}\n", c.summary));
            out.push_str(&format!("   Categories: {}\n", c.categories.join(", ")));
            out.push_str(&format!(
                "   Product types: {}\n",
                c.product_types.join(", ")
            ));
            if !c.product_names.is_empty() {
                let sample: Vec<&str> =
                    c.product_names.iter().take(3).map(String::as_str).collect();
                out.push_str(&format!("   Sample products: {}\n", sample.join(", ")));
            }
            if !c.brand_names.is_empty() {
                let brands: Vec<&str> =
                    c.brand_names.iter().take(3).map(String::as_str).collect();
                out.push_str(&format!("   Brands: {}\n", brands.join(", ")));
            }
            out.push_str(&format!("   Pages: {}\n", c.page_count));
        }

        out
    }

    fn save(&self) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(&self.catalogs)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(self.dir.join(STORE_FILE), json)
    }
}

fn discard_backing_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not clean up backing file after failed ingest");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmClient;
    use crate::raster::PageImage;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct StubRasterizer {
        pages: usize,
    }

    impl Rasterizer for StubRasterizer {
        fn rasterize(&self, _pdf: &[u8], _dpi: u32) -> Result<Vec<PageImage>, RasterError> {
            Ok((1..=self.pages)
                .map(|page| PageImage {
                    page,
                    png: vec![1, 2, 3],
                })
                .collect())
        }
    }

    struct StubClient {
        metadata_json: String,
        fail: bool,
    }

    impl StubClient {
        fn good(summary: &str) -> Self {
            Self {
                metadata_json: format!(
                    r#"{{"summary": "{}", "categories": ["kitchen"], "keywords": ["kettle"], "product_types": ["kettles"], "brand_names": ["Acme"], "product_names": ["Acme Kettle X"]}}"#,
                    summary
                ),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                metadata_json: String::new(),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl LlmClient for StubClient {
        fn model_name(&self) -> &str {
            "stub"
        }

        async fn generate(&self, _prompt: &str, _images: &[PageImage]) -> Result<String, LlmError> {
            if self.fail {
                return Err(LlmError::Network("stub offline".to_string()));
            }
            Ok(self.metadata_json.clone())
        }
    }

    async fn add_one(store: &mut CatalogStore, client: &StubClient, filename: &str, body: &[u8]) {
        let extractor = ContentExtractor::new(client, 8);
        store
            .add(
                filename,
                body.to_vec(),
                200,
                Arc::new(StubRasterizer { pages: 4 }),
                &extractor,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn persisted_store_round_trips_field_for_field() {
        let tmp = TempDir::new().unwrap();
        let client = StubClient::good("Acme kitchen catalog.");

        let mut store = CatalogStore::open(tmp.path()).unwrap();
        add_one(&mut store, &client, "acme.pdf", b"%PDF-fake").await;
        let original = store.get("acme.pdf").unwrap().clone();
        assert!(original.is_processed);
        assert!(original.processing_date.is_some());
        assert!(!original.detailed_content.is_empty());

        let reloaded = CatalogStore::open(tmp.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("acme.pdf").unwrap(), &original);
    }

    #[tokio::test]
    async fn re_adding_a_filename_overwrites_in_place() {
        let tmp = TempDir::new().unwrap();
        let mut store = CatalogStore::open(tmp.path()).unwrap();

        let first = StubClient::good("First version.");
        add_one(&mut store, &first, "cat.pdf", b"old-bytes").await;
        add_one(&mut store, &first, "other.pdf", b"other").await;

        let second = StubClient::good("Second version.");
        add_one(&mut store, &second, "cat.pdf", b"new-bytes").await;

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("cat.pdf").unwrap().summary, "Second version.");
        // Overwrite keeps the record's position in iteration order.
        assert_eq!(store.names(), vec!["cat.pdf", "other.pdf"]);
        // Backing file content was replaced.
        let on_disk = std::fs::read(tmp.path().join("cat.pdf")).unwrap();
        assert_eq!(on_disk, b"new-bytes");
    }

    #[tokio::test]
    async fn failed_extraction_stores_nothing() {
        let tmp = TempDir::new().unwrap();
        let client = StubClient::failing();
        let extractor = ContentExtractor::new(&client, 8);

        let mut store = CatalogStore::open(tmp.path()).unwrap();
        let result = store
            .add(
                "broken.pdf",
                b"%PDF-fake".to_vec(),
                200,
                Arc::new(StubRasterizer { pages: 4 }),
                &extractor,
            )
            .await;

        assert!(matches!(result, Err(IngestError::Extract(_))));
        assert_eq!(store.len(), 0);
        assert!(!tmp.path().join("broken.pdf").exists());
    }

    #[tokio::test]
    async fn failed_rasterization_stores_nothing() {
        struct BadRasterizer;
        impl Rasterizer for BadRasterizer {
            fn rasterize(&self, _pdf: &[u8], _dpi: u32) -> Result<Vec<PageImage>, RasterError> {
                Err(RasterError::Pdf("not a pdf".to_string()))
            }
        }

        let tmp = TempDir::new().unwrap();
        let client = StubClient::good("unused");
        let extractor = ContentExtractor::new(&client, 8);

        let mut store = CatalogStore::open(tmp.path()).unwrap();
        let result = store
            .add(
                "scan.pdf",
                b"garbage".to_vec(),
                200,
                Arc::new(BadRasterizer),
                &extractor,
            )
            .await;

        assert!(matches!(result, Err(IngestError::Raster(_))));
        assert_eq!(store.len(), 0);
        assert!(!tmp.path().join("scan.pdf").exists());
    }

    #[tokio::test]
    async fn remove_tolerates_missing_backing_file() {
        let tmp = TempDir::new().unwrap();
        let client = StubClient::good("Removable.");
        let mut store = CatalogStore::open(tmp.path()).unwrap();
        add_one(&mut store, &client, "gone.pdf", b"bytes").await;

        std::fs::remove_file(tmp.path().join("gone.pdf")).unwrap();
        assert!(store.remove("gone.pdf").unwrap());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn remove_unknown_returns_false() {
        let tmp = TempDir::new().unwrap();
        let mut store = CatalogStore::open(tmp.path()).unwrap();
        assert!(!store.remove("nope.pdf").unwrap());
    }

    #[tokio::test]
    async fn list_summaries_is_idempotent_and_insertion_ordered() {
        let tmp = TempDir::new().unwrap();
        let client = StubClient::good("Stable summary.");
        let mut store = CatalogStore::open(tmp.path()).unwrap();
        add_one(&mut store, &client, "b.pdf", b"b").await;
        add_one(&mut store, &client, "a.pdf", b"a").await;

        let first = store.list_summaries();
        let second = store.list_summaries();
        assert_eq!(first, second);
        // Insertion order, not lexical order.
        let b_pos = first.find("Catalog: b.pdf").unwrap();
        let a_pos = first.find("Catalog: a.pdf").unwrap();
        assert!(b_pos < a_pos);
    }

    #[test]
    fn corrupt_library_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(STORE_FILE), "{not json!").unwrap();
        let store = CatalogStore::open(tmp.path()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn empty_store_summaries_message() {
        let tmp = TempDir::new().unwrap();
        let store = CatalogStore::open(tmp.path()).unwrap();
        assert_eq!(store.list_summaries(), "No catalogs available.");
    }
}
