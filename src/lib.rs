//! # Catalog QA
//!
//! Multi-catalog product question answering over PDF catalogs.
//!
//! Users add PDF product catalogs; the system renders each page, extracts
//! structured metadata and a consolidated knowledge base through a hosted
//! multimodal model, and answers product questions by picking the most
//! relevant catalog and searching it with a multi-stage retry ladder,
//! falling back across catalogs when an answer looks weak.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────────┐
//! │   PDF    │──▶│ Rasterizer │──▶│   Extractor    │
//! │  upload  │   │  (pdfium)  │   │ metadata+text  │
//! └──────────┘   └────────────┘   └──────┬────────┘
//!                                        ▼
//!                                 ┌──────────────┐
//!                                 │ CatalogStore │  catalogs.json
//!                                 └──────┬───────┘
//!                   ┌────────────────────┤
//!                   ▼                    ▼
//!             ┌──────────┐       ┌─────────────┐
//!             │  Ranker  │──────▶│ Query Agent │
//!             │ (top-k)  │       │ (4-stage)   │
//!             └──────────┘       └─────────────┘
//!                        Orchestrator
//! ```
//!
//! Every piece of "intelligence" (extraction, summarization, scoring,
//! answering) is delegated to the [`llm::LlmClient`] collaborator; the
//! crate itself is the deterministic scaffolding around it: prompt
//! construction, response parsing, quality gating, fallback policy, and
//! persistence. All of that scaffolding is testable with a stub client.
//!
//! ## Quick Start
//!
//! ```bash
//! export GEMINI_API_KEY=...
//! cqa add spring-catalog.pdf       # ingest a catalog
//! cqa list                         # see the library
//! cqa ask "glass kettle under $50" # ask a question
//! cqa chat                         # interactive session
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`llm`] | Language model client abstraction |
//! | [`raster`] | PDF page rasterization |
//! | [`extract`] | Catalog metadata and content extraction |
//! | [`store`] | Catalog metadata store and persistence |
//! | [`rank`] | Catalog relevance ranking |
//! | [`query`] | Per-catalog multi-stage query agent |
//! | [`orchestrate`] | Cross-catalog query orchestration |

pub mod config;
pub mod extract;
pub mod llm;
pub mod models;
pub mod orchestrate;
pub mod query;
pub mod rank;
pub mod raster;
pub mod store;
