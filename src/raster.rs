//! PDF page rasterization.
//!
//! Catalog pages are analyzed as rendered images, not extracted text, so the
//! ingestion pipeline needs each page as a PNG. The [`Rasterizer`] trait is
//! the collaborator boundary; [`PdfiumRasterizer`] is the production
//! implementation. Rendering is CPU-bound and pdfium is not async-safe, so
//! callers run it under `spawn_blocking`.

use std::io::Cursor;

/// A single rendered catalog page. `page` is 1-based.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub page: usize,
    pub png: Vec<u8>,
}

/// Rasterization error. Rendering never panics; the ingest path rejects the
/// catalog and reports which page failed.
#[derive(Debug)]
pub enum RasterError {
    /// The document could not be opened at all.
    Pdf(String),
    Render { page: usize, reason: String },
    Encode { page: usize, reason: String },
}

impl std::fmt::Display for RasterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RasterError::Pdf(e) => write!(f, "failed to open PDF: {}", e),
            RasterError::Render { page, reason } => {
                write!(f, "failed to render page {}: {}", page, reason)
            }
            RasterError::Encode { page, reason } => {
                write!(f, "failed to encode page {}: {}", page, reason)
            }
        }
    }
}

impl std::error::Error for RasterError {}

/// Converts a PDF byte stream into an ordered sequence of page images.
///
/// Implementations must preserve page order and hold no mutable state
/// between calls.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, pdf: &[u8], dpi: u32) -> Result<Vec<PageImage>, RasterError>;
}

/// Production rasterizer backed by pdfium.
pub struct PdfiumRasterizer;

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(&self, pdf: &[u8], dpi: u32) -> Result<Vec<PageImage>, RasterError> {
        use pdfium_render::prelude::*;

        let bindings = Pdfium::bind_to_system_library()
            .map_err(|e| RasterError::Pdf(format!("pdfium bindings unavailable: {}", e)))?;
        let pdfium = Pdfium::new(bindings);

        let document = pdfium
            .load_pdf_from_byte_slice(pdf, None)
            .map_err(|e| RasterError::Pdf(e.to_string()))?;

        // PDF user space is 72 dpi; scale up to the requested resolution.
        let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

        let mut pages = Vec::new();
        for (index, page) in document.pages().iter().enumerate() {
            let page_number = index + 1;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| RasterError::Render {
                    page: page_number,
                    reason: e.to_string(),
                })?;

            let mut png = Vec::new();
            bitmap
                .as_image()
                .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
                .map_err(|e| RasterError::Encode {
                    page: page_number,
                    reason: e.to_string(),
                })?;

            pages.push(PageImage {
                page: page_number,
                png,
            });
        }

        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_names_the_page() {
        let err = RasterError::Render {
            page: 7,
            reason: "out of memory".to_string(),
        };
        assert_eq!(err.to_string(), "failed to render page 7: out of memory");
    }
}
