//! pdfium access: page count, native text layer and page rasterisation.
//!
//! `Pdfium` is neither `Send` nor `Sync`, so every entry point here is a
//! blocking function that binds the library, opens the document and does one
//! job. Callers run them inside `tokio::task::spawn_blocking`. The OS caches
//! the dynamic library, so binding per call is cheap.
//!
//! Library discovery order:
//! 1. `PDFIUM_LIB_PATH` (explicit path to the library file)
//! 2. next to the running executable
//! 3. the system library search path

use crate::error::MinerError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::debug;

/// PDF user-space units per inch.
const POINTS_PER_INCH: f32 = 72.0;

fn load_pdfium() -> Result<Pdfium, MinerError> {
    if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
        debug!("Binding pdfium from PDFIUM_LIB_PATH={}", path);
        let bindings = Pdfium::bind_to_library(&path)
            .map_err(|e| MinerError::PdfiumBindingFailed(format!("{path}: {e}")))?;
        return Ok(Pdfium::new(bindings));
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let lib_path =
            Pdfium::pdfium_platform_library_name_at_path(exe_dir.to_string_lossy().as_ref());
        if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
            debug!("Bound pdfium next to executable: {}", lib_path.display());
            return Ok(Pdfium::new(bindings));
        }
    }

    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| MinerError::PdfiumBindingFailed(e.to_string()))?;
    Ok(Pdfium::new(bindings))
}

fn map_load_error(path: &Path, e: PdfiumError) -> MinerError {
    let detail = format!("{e:?}");
    let lower = detail.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        MinerError::Encrypted {
            path: path.to_path_buf(),
        }
    } else {
        MinerError::CorruptPdf {
            path: path.to_path_buf(),
            detail,
        }
    }
}

/// Number of pages in the document. Fails if the file cannot be opened.
pub fn page_count_blocking(path: &Path) -> Result<usize, MinerError> {
    let pdfium = load_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| map_load_error(path, e))?;
    Ok(document.pages().len() as usize)
}

/// Native text layer of one page (1-based).
pub fn page_text_blocking(path: &Path, page: usize) -> Result<String, String> {
    let pdfium = load_pdfium().map_err(|e| e.to_string())?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| map_load_error(path, e).to_string())?;
    let pdf_page = document
        .pages()
        .get(page_index(page)?)
        .map_err(|e| format!("{e:?}"))?;
    let text = pdf_page.text().map_err(|e| format!("{e:?}"))?;
    Ok(text.all())
}

/// Rasterise one page (1-based) at `dpi`, longest edge capped at `max_pixels`.
pub fn render_page_blocking(
    path: &Path,
    page: usize,
    dpi: u32,
    max_pixels: u32,
) -> Result<DynamicImage, String> {
    let pdfium = load_pdfium().map_err(|e| e.to_string())?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| map_load_error(path, e).to_string())?;
    let pdf_page = document
        .pages()
        .get(page_index(page)?)
        .map_err(|e| format!("{e:?}"))?;

    let (width, height) =
        render_dimensions(pdf_page.width().value, pdf_page.height().value, dpi, max_pixels);
    let render_config = PdfRenderConfig::new()
        .set_target_width(width as i32)
        .set_maximum_height(height as i32);

    let bitmap = pdf_page
        .render_with_config(&render_config)
        .map_err(|e| format!("{e:?}"))?;
    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page,
        image.width(),
        image.height()
    );
    Ok(image)
}

fn page_index(page: usize) -> Result<u16, String> {
    page.checked_sub(1)
        .and_then(|i| u16::try_from(i).ok())
        .ok_or_else(|| format!("page {page} is out of range"))
}

/// Pixel size for a page of `width_pt` × `height_pt` points at `dpi`,
/// scaled down to keep the longest edge within `max_pixels`.
pub fn render_dimensions(width_pt: f32, height_pt: f32, dpi: u32, max_pixels: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let w = (width_pt * scale).max(1.0);
    let h = (height_pt * scale).max(1.0);
    let longest = w.max(h);
    let cap = max_pixels.max(1) as f32;
    if longest > cap {
        let ratio = cap / longest;
        if w >= h {
            (max_pixels.max(1), ((h * ratio) as u32).max(1))
        } else {
            (((w * ratio) as u32).max(1), max_pixels.max(1))
        }
    } else {
        (w as u32, h as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_at_200_dpi_is_capped() {
        // A4 = 595 × 842 pt → 1652 × 2338 px at 200 DPI.
        let (w, h) = render_dimensions(595.0, 842.0, 200, 2000);
        assert_eq!(h, 2000);
        assert!(w < 2000 && w > 1400);
    }

    #[test]
    fn small_page_is_not_upscaled_past_dpi() {
        assert_eq!(render_dimensions(72.0, 144.0, 144, 2000), (144, 288));
    }

    #[test]
    fn page_index_is_one_based() {
        assert_eq!(page_index(1), Ok(0));
        assert!(page_index(0).is_err());
        assert!(page_index(70_000).is_err());
    }
}
