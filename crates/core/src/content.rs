//! Page text and stamped content
//!
//! Text is whatever the codec extracts from the content streams. It carries
//! no glyph positions, so search reports pages and occurrence counts rather
//! than rectangles. Text and images drawn onto pages are appended to the
//! page content and count as content changes of those pages.

use crate::document::{Document, DocumentHandle, Effects};
use crate::error::{DocumentError, DocumentResult};
use folio_cache::IndexChange;
use folio_engine::{ImageData, PageImage, RgbaImage, TextRun};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Average Helvetica advance as a fraction of the font size, used to
/// centre stamped text without font metrics.
const HELVETICA_ADVANCE: f32 = 0.5;

/// A page on which a search found its query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextMatch {
    pub page_index: usize,
    /// Non-overlapping occurrences on the page
    pub count: usize,
}

/// Text stamped across the middle of pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextWatermark {
    pub text: String,
    pub font_size: f32,
    pub color: [f32; 3],
    pub opacity: f32,
    /// Counter-clockwise, in degrees
    pub angle: f32,
}

impl TextWatermark {
    /// Translucent grey text at 45 degrees.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), font_size: 48.0, color: [0.5; 3], opacity: 0.3, angle: 45.0 }
    }

    fn validate(&self) -> DocumentResult<()> {
        if self.text.trim().is_empty() {
            return Err(DocumentError::InvalidArgument("watermark text is empty".to_string()));
        }
        let valid = self.font_size.is_finite()
            && self.font_size > 0.0
            && self.angle.is_finite()
            && (0.0..=1.0).contains(&self.opacity)
            && self.color.iter().all(|channel| (0.0..=1.0).contains(channel));
        if valid {
            Ok(())
        } else {
            Err(DocumentError::InvalidArgument("invalid watermark style".to_string()))
        }
    }

    /// Run whose text block is centred on `(cx, cy)` after rotation.
    fn run_centred_at(&self, cx: f32, cy: f32) -> TextRun {
        let widest = self.text.lines().map(|line| line.chars().count()).max().unwrap_or(0);
        let half_width = widest as f32 * self.font_size * HELVETICA_ADVANCE / 2.0;
        let half_height = self.font_size / 3.0;
        let (sin, cos) = self.angle.to_radians().sin_cos();

        let x = cx - (cos * half_width - sin * half_height);
        let y = cy - (sin * half_width + cos * half_height);
        let mut run = TextRun::new(self.text.clone(), x, y);
        run.font_size = self.font_size;
        run.color = self.color;
        run.opacity = self.opacity;
        run.angle = self.angle;
        run
    }
}

/// Largest rectangle with the image's aspect ratio centred inside `rect`.
fn fit_rect(image: &RgbaImage, rect: [f32; 4]) -> [f32; 4] {
    let [x0, y0, x1, y1] = rect;
    let (width, height) = (x1 - x0, y1 - y0);
    let scale = (width / image.width() as f32).min(height / image.height() as f32);
    let (fit_width, fit_height) = (image.width() as f32 * scale, image.height() as f32 * scale);
    let left = x0 + (width - fit_width) / 2.0;
    let bottom = y0 + (height - fit_height) / 2.0;
    [left, bottom, left + fit_width, bottom + fit_height]
}

fn load_image(path: &Path) -> DocumentResult<RgbaImage> {
    let image = image::open(path).map_err(|err| match err {
        image::ImageError::IoError(io) => DocumentError::Io(io),
        other => DocumentError::InvalidArgument(format!("cannot read image {}: {other}", path.display())),
    })?;
    Ok(image.to_rgba8())
}

fn check_opacity(opacity: f32) -> DocumentResult<()> {
    if (0.0..=1.0).contains(&opacity) {
        Ok(())
    } else {
        Err(DocumentError::InvalidArgument(format!("opacity {opacity} is outside 0..=1")))
    }
}

impl Document {
    /// Indices a page-set operation applies to: all pages for `None`.
    /// Every index is checked before anything is drawn.
    fn target_pages(&self, pages: Option<&[usize]>) -> DocumentResult<Vec<usize>> {
        match pages {
            None => Ok((0..self.pages.len()).collect()),
            Some(pages) => {
                for &index in pages {
                    self.pages.at(index)?;
                }
                let mut pages = pages.to_vec();
                pages.sort_unstable();
                pages.dedup();
                Ok(pages)
            }
        }
    }

    fn content_changed(&self, indices: &[usize]) -> Effects {
        indices
            .iter()
            .fold(Effects::modified(), |effects, &index| {
                effects.with_change(IndexChange::ContentChanged { index })
            })
            .with_event(self.pages_changed())
    }

    fn page_text(&self, index: usize) -> DocumentResult<String> {
        let page_ref = self.pages.at(index)?.page_ref;
        Ok(self.engine.page_text(self.handle, page_ref)?)
    }

    fn draw_image(&self, index: usize, image: &RgbaImage, rect: [f32; 4], opacity: f32) -> DocumentResult<()> {
        let page_ref = self.pages.at(index)?.page_ref;
        self.engine.insert_image(self.handle, page_ref, image, rect, opacity)?;
        Ok(())
    }

    fn page_rect(&self, index: usize) -> DocumentResult<[f32; 4]> {
        let geometry = self.pages.at(index)?.geometry;
        Ok([0.0, 0.0, geometry.width, geometry.height])
    }
}

impl DocumentHandle {
    /// Text of the page at `index`, one line per text object.
    pub fn page_text(&self, index: usize) -> DocumentResult<String> {
        self.read(|doc| doc.page_text(index))
    }

    /// Text of every page, pages separated by a blank line.
    pub fn document_text(&self) -> DocumentResult<String> {
        self.read(|doc| {
            let texts =
                (0..doc.pages.len()).map(|index| doc.page_text(index)).collect::<DocumentResult<Vec<_>>>()?;
            Ok(texts.join("\n\n"))
        })
    }

    /// Pages whose text contains `query`, in page order.
    pub fn search_text(&self, query: &str, case_sensitive: bool) -> DocumentResult<Vec<TextMatch>> {
        if query.is_empty() {
            return Err(DocumentError::InvalidArgument("search query is empty".to_string()));
        }
        let needle = if case_sensitive { query.to_string() } else { query.to_lowercase() };
        self.read(|doc| {
            let mut matches = Vec::new();
            for index in 0..doc.pages.len() {
                let text = doc.page_text(index)?;
                let haystack = if case_sensitive { text } else { text.to_lowercase() };
                let count = haystack.matches(needle.as_str()).count();
                if count > 0 {
                    matches.push(TextMatch { page_index: index, count });
                }
            }
            log::debug!("search for {query:?} matched {} pages", matches.len());
            Ok(matches)
        })
    }

    /// Draw visible text on the page at `index`.
    pub fn add_text(&self, index: usize, run: &TextRun) -> DocumentResult<()> {
        if run.text.is_empty() {
            return Err(DocumentError::InvalidArgument("text is empty".to_string()));
        }
        check_opacity(run.opacity)?;
        self.mutate(|doc| {
            let page_ref = doc.pages.at(index)?.page_ref;
            doc.engine.add_text(doc.handle, page_ref, run)?;
            log::debug!("added {} characters of text on page {index}", run.text.len());
            Ok(((), doc.content_changed(&[index])))
        })
    }

    /// Stamp `watermark` across the centre of `pages`, or of every page.
    /// Returns how many pages were stamped.
    pub fn add_text_watermark(&self, watermark: &TextWatermark, pages: Option<&[usize]>) -> DocumentResult<usize> {
        watermark.validate()?;
        self.mutate(|doc| {
            let indices = doc.target_pages(pages)?;
            for &index in &indices {
                let slot = doc.pages.at(index)?;
                let run = watermark.run_centred_at(slot.geometry.width / 2.0, slot.geometry.height / 2.0);
                doc.engine.add_text(doc.handle, slot.page_ref, &run)?;
            }
            log::info!("stamped text watermark on {} pages", indices.len());
            Ok((indices.len(), doc.content_changed(&indices)))
        })
    }

    /// Draw the image at `path` over each target page, scaled to fit the
    /// page with its proportions kept.
    pub fn add_image_watermark(
        &self,
        path: impl AsRef<Path>,
        opacity: f32,
        pages: Option<&[usize]>,
    ) -> DocumentResult<usize> {
        check_opacity(opacity)?;
        let image = load_image(path.as_ref())?;
        self.mutate(|doc| {
            let indices = doc.target_pages(pages)?;
            for &index in &indices {
                let rect = fit_rect(&image, doc.page_rect(index)?);
                doc.draw_image(index, &image, rect, opacity)?;
            }
            log::info!("stamped image watermark on {} pages", indices.len());
            Ok((indices.len(), doc.content_changed(&indices)))
        })
    }

    /// Draw the image at `path` on the page at `index`, inside `rect` or the
    /// whole page. With `keep_proportion` the image is centred in the
    /// target at its own aspect ratio; otherwise it is stretched.
    pub fn insert_image(
        &self,
        index: usize,
        path: impl AsRef<Path>,
        rect: Option<[f32; 4]>,
        keep_proportion: bool,
    ) -> DocumentResult<()> {
        if let Some(rect) = rect {
            let [x0, y0, x1, y1] = rect;
            if !rect.iter().all(|value| value.is_finite()) || x1 <= x0 || y1 <= y0 {
                return Err(DocumentError::InvalidArgument(format!("image rectangle {rect:?}")));
            }
        }
        let image = load_image(path.as_ref())?;
        self.mutate(|doc| {
            let target = match rect {
                Some(rect) => rect,
                None => doc.page_rect(index)?,
            };
            let target = if keep_proportion { fit_rect(&image, target) } else { target };
            doc.draw_image(index, &image, target, 1.0)?;
            log::debug!("inserted {}x{} image on page {index}", image.width(), image.height());
            Ok(((), doc.content_changed(&[index])))
        })
    }

    /// Images drawn on the page at `index` that can be extracted.
    pub fn page_images(&self, index: usize) -> DocumentResult<Vec<PageImage>> {
        self.read(|doc| {
            let page_ref = doc.pages.at(index)?.page_ref;
            Ok(doc.engine.page_images(doc.handle, page_ref)?)
        })
    }

    /// Write every extractable image to `output_dir` as
    /// `image_<page>_<n>.<ext>`, with 1-based page numbers and `n` counting
    /// across the whole document. Decoded samples are saved as PNG.
    pub fn extract_images(&self, output_dir: impl AsRef<Path>) -> DocumentResult<Vec<PathBuf>> {
        let output_dir = output_dir.as_ref();
        let per_page = self.read(|doc| {
            (0..doc.pages.len())
                .map(|index| Ok(doc.engine.page_images(doc.handle, doc.pages.at(index)?.page_ref)?))
                .collect::<DocumentResult<Vec<_>>>()
        })?;

        fs::create_dir_all(output_dir)?;
        let mut written = Vec::new();
        for (index, images) in per_page.into_iter().enumerate() {
            for image in images {
                let number = written.len() + 1;
                let path = match image.data {
                    ImageData::Encoded { extension, bytes } => {
                        let path = output_dir.join(format!("image_{}_{number}.{extension}", index + 1));
                        fs::write(&path, bytes)?;
                        path
                    }
                    ImageData::Pixels(pixels) => {
                        let path = output_dir.join(format!("image_{}_{number}.png", index + 1));
                        pixels.save(&path).map_err(|err| match err {
                            image::ImageError::IoError(io) => DocumentError::Io(io),
                            other => DocumentError::UnsupportedOperation(other.to_string()),
                        })?;
                        path
                    }
                };
                written.push(path);
            }
        }
        log::info!("extracted {} images to {}", written.len(), output_dir.display());
        Ok(written)
    }
}
