//! Page image → base64 PNG attachment for the vision model.
//!
//! PNG keeps rendered text crisp; JPEG artefacts around small print cost
//! OCR accuracy. `detail: "high"` lets GPT-4-class models tile the page
//! instead of reading a single downscaled overview.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page for a vision request.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} page → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, GrayImage};

    #[test]
    fn grey_scan_encodes_as_png() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 24, Luma([200])));
        let data = encode_page(&img).unwrap();
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).unwrap();
        assert_eq!(&decoded[1..4], b"PNG");
    }
}
