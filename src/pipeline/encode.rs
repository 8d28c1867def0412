//! Image encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`.
//!
//! PNG is lossless; JPEG artefacts around small print (prices, allergen
//! markers) measurably hurt extraction. `detail: "high"` lets GPT-4-class
//! models tile the page instead of reading a single 512 px overview.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// One rasterised, encoded page of a menu. Produced once per job run and
/// shared read-only by every stage.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-based page number.
    pub page_number: usize,
    pub image: ImageData,
}

impl PageImage {
    pub fn new(page_number: usize, image: ImageData) -> Self {
        Self { page_number, image }
    }
}

/// Encode a rasterised page as a base64 PNG ready for the model.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// The image for `page_number`, if the job run rendered it.
pub fn find_page(images: &[PageImage], page_number: usize) -> Option<&PageImage> {
    images.iter().find(|p| p.page_number == page_number)
}
