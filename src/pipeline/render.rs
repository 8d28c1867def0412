//! PDF rasterisation: every page of a menu → [`PageImage`].
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is not safe
//! to call from async contexts, so rendering and PNG encoding both run on the
//! blocking pool via `tokio::task::spawn_blocking`.
//!
//! `max_rendered_pixels` caps the longest edge regardless of physical page
//! size: a poster-sized menu would otherwise produce a 12 000 px image that no
//! vision API accepts.

use super::encode::{encode_page, PageImage};
use crate::config::ExtractionConfig;
use crate::error::MenuExtractError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Turns PDF bytes into page images, 1-based and in page order.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn rasterize(&self, pdf: Vec<u8>) -> Result<Vec<PageImage>, MenuExtractError>;
}

/// [`PageRasterizer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    max_pixels: u32,
    password: Option<String>,
}

impl PdfiumRasterizer {
    pub fn new(max_pixels: u32, password: Option<String>) -> Self {
        Self {
            max_pixels,
            password,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(config.max_rendered_pixels, config.password.clone())
    }
}

#[async_trait]
impl PageRasterizer for PdfiumRasterizer {
    async fn rasterize(&self, pdf: Vec<u8>) -> Result<Vec<PageImage>, MenuExtractError> {
        let max_pixels = self.max_pixels;
        let password = self.password.clone();

        tokio::task::spawn_blocking(move || render_blocking(&pdf, max_pixels, password.as_deref()))
            .await
            .map_err(|e| MenuExtractError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Blocking implementation of page rendering.
fn render_blocking(
    pdf: &[u8],
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<PageImage>, MenuExtractError> {
    let pdfium = Pdfium::default();

    let document = pdfium
        .load_pdf_from_byte_slice(pdf, password)
        .map_err(|e| classify_load_error(&format!("{:?}", e), password.is_some()))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(MenuExtractError::CorruptPdf {
            detail: "document has no pages".into(),
        });
    }
    info!("PDF loaded: {} pages", total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(total_pages);
    for (idx, page) in pages.iter().enumerate() {
        let page_number = idx + 1;
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            MenuExtractError::RasterisationFailed {
                page: page_number,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_number,
            image.width(),
            image.height()
        );

        let encoded = encode_page(&image).map_err(|e| MenuExtractError::RasterisationFailed {
            page: page_number,
            detail: format!("PNG encoding failed: {}", e),
        })?;
        results.push(PageImage::new(page_number, encoded));
    }

    Ok(results)
}

/// Map a pdfium load failure onto the password/corruption errors.
fn classify_load_error(detail: &str, password_given: bool) -> MenuExtractError {
    if detail.contains("Password") || detail.contains("password") {
        if password_given {
            MenuExtractError::WrongPassword
        } else {
            MenuExtractError::PasswordRequired
        }
    } else {
        MenuExtractError::CorruptPdf {
            detail: detail.to_string(),
        }
    }
}
