//! Recognized text layers
//!
//! Recognition itself is done by an [`OcrEngine`]; the document only
//! renders the page for it and stores the resulting text as an invisible
//! layer, which counts as a content change of that page.

use crate::document::{Document, DocumentHandle, Effects};
use crate::error::{DocumentError, DocumentResult};
use crate::pages::PageId;
use folio_cache::IndexChange;
use folio_engine::{OcrEngine, Rotation};
use std::sync::Arc;

impl Document {
    fn insert_text(&mut self, page: PageId, text: &str) -> DocumentResult<(usize, Effects)> {
        let index = self.pages.index_of(page).ok_or_else(|| {
            DocumentError::UnsupportedOperation("page was deleted during text recognition".to_string())
        })?;
        if text.trim().is_empty() {
            return Ok((index, Effects::none()));
        }
        let page_ref = self.pages.at(index)?.page_ref;
        self.engine.insert_text(self.handle, page_ref, text)?;

        log::debug!("inserted {} characters of text on page {index}", text.len());
        let effects = Effects::modified()
            .with_change(IndexChange::ContentChanged { index })
            .with_event(self.pages_changed());
        Ok((index, effects))
    }
}

impl DocumentHandle {
    /// Render a page at the configured OCR resolution, recognize it in the
    /// configured language and store the text on the page.
    ///
    /// The page is tracked by identity while recognition runs, so edits
    /// made meanwhile do not send the text to the wrong page.
    pub fn apply_ocr(&self, index: usize, ocr: &dyn OcrEngine) -> DocumentResult<String> {
        let zoom = self.config.ocr_zoom();
        let (page, engine, handle, page_ref) = self.read(|doc| {
            Ok((doc.pages.id_at(index)?, Arc::clone(&doc.engine), doc.handle, doc.pages.at(index)?.page_ref))
        })?;

        let image = engine
            .rasterize(handle, page_ref, zoom, Rotation::Deg0)
            .map_err(|err| DocumentError::CacheRenderFailed(err.to_string()))?;
        let text = ocr.recognize(&image, &self.config.ocr_language)?;
        log::info!(
            "recognized {} characters on page {index} ({}x{} px, {})",
            text.len(),
            image.width(),
            image.height(),
            self.config.ocr_language
        );

        self.mutate(|doc| doc.insert_text(page, &text))?;
        Ok(text)
    }

    /// Store text recognized elsewhere on the page at `index`. Blank text
    /// is ignored.
    pub fn insert_recognized_text(&self, index: usize, text: &str) -> DocumentResult<()> {
        self.mutate(|doc| {
            let page = doc.pages.id_at(index)?;
            doc.insert_text(page, text)
        })
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChangeEvent, EditorConfig, InsertPosition};
    use folio_engine::{EngineResult, LopdfEngine, PdfEngine, RgbaImage};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FixedOcr {
        seen: Mutex<Vec<(u32, u32, String)>>,
    }

    impl OcrEngine for FixedOcr {
        fn recognize(&self, image: &RgbaImage, language: &str) -> EngineResult<String> {
            self.seen.lock().unwrap().push((image.width(), image.height(), language.to_string()));
            Ok("Quarterly report".to_string())
        }
    }

    fn handle() -> DocumentHandle {
        let handle = DocumentHandle::with_config(
            EditorConfig::new().with_render_workers(0).with_ocr_language("deu"),
        );
        handle.create_new().unwrap();
        handle.insert_blank(InsertPosition::End, 72.0, 144.0).unwrap();
        handle
    }

    #[test]
    fn test_apply_ocr_uses_configured_resolution() {
        let handle = handle();
        let ocr = FixedOcr::default();
        let text = handle.apply_ocr(0, &ocr).unwrap();
        assert_eq!(text, "Quarterly report");

        let zoom = handle.config().ocr_zoom();
        let expected = ((72.0 * zoom).round() as u32, (144.0 * zoom).round() as u32);
        let seen = ocr.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(expected.0, expected.1, "deu".to_string())]);
    }

    #[test]
    fn test_text_insertion_evicts_render() {
        let handle = handle();
        handle.render(0, 1.0, Rotation::Deg0).unwrap();
        let events = handle.subscribe();

        handle.insert_recognized_text(0, "hello").unwrap();
        assert_eq!(handle.render_cache_stats().entries, 0);
        assert_eq!(events.try_recv().unwrap(), ChangeEvent::PagesChanged { page_count: 1 });

        let engine = LopdfEngine::new();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("ocr.pdf");
        handle.save(Some(&path), &Default::default()).unwrap();
        let reopened = engine.open(folio_engine::OpenSource::from(path.as_path()), None).unwrap();
        assert!(matches!(reopened, folio_engine::OpenOutcome::Opened(_)));
    }

    #[test]
    fn test_blank_text_is_ignored() {
        let handle = handle();
        let temp_dir = tempfile::TempDir::new().unwrap();
        handle.save(Some(&temp_dir.path().join("a.pdf")), &Default::default()).unwrap();

        handle.insert_recognized_text(0, "  \n").unwrap();
        assert!(!handle.is_modified().unwrap());
        assert!(handle.insert_recognized_text(1, "x").is_err());
    }
}
