//! Core data models for the catalog library and query pipeline.
//!
//! These types flow between the store, the extractor, the ranker, and the
//! query agent. [`CatalogMetadata`] is the only persisted type; everything
//! else is ephemeral per-query state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One record per uploaded catalog, keyed by `filename`.
///
/// Created on upload, fully populated by the content extractor before it is
/// inserted into the store. `is_processed = true` implies a non-empty
/// `detailed_content` and a positive `page_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub filename: String,
    pub file_path: PathBuf,
    pub summary: String,
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
    pub product_types: Vec<String>,
    pub brand_names: Vec<String>,
    pub product_names: Vec<String>,
    pub page_count: usize,
    pub processing_date: Option<DateTime<Utc>>,
    pub is_processed: bool,
    /// Consolidated knowledge base text produced during extraction.
    pub detailed_content: String,
}

/// A ranked catalog produced for a single query, discarded after the
/// response is formatted. The score is nominally 0–10 but the model is not
/// guaranteed to respect the range.
#[derive(Debug, Clone)]
pub struct CatalogSearchResult {
    pub catalog_name: String,
    pub relevance_score: f64,
    pub reason: String,
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One turn of a chat session. Session history is owned by the caller
/// (e.g. the `chat` subcommand), never by the core components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}
