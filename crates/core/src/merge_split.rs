//! Moving pages between documents
//!
//! Merge copies every page of a source document into an open one; split
//! and extract build new documents from a subset of pages. Page content is
//! copied by the codec. Annotations are deep-copied with new identities and
//! bookmarks are retargeted to the copied pages.

use crate::annotation::bind_annotations;
use crate::config::TocSplitPolicy;
use crate::document::{Document, DocumentHandle, Effects};
use crate::error::{DocumentError, DocumentResult};
use crate::events::ChangeEvent;
use crate::page_index::InsertPosition;
use crate::pages::{PageId, PageSlot};
use folio_cache::IndexChange;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

impl Document {
    /// A new, unsaved document holding copies of the pages at `indices`, in
    /// that order. `keep_toc` sees the position of each bookmark that
    /// targets a copied page and decides whether it comes along.
    pub(crate) fn copy_pages(
        &self,
        indices: &[usize],
        keep_toc: impl FnMut(usize) -> bool,
    ) -> DocumentResult<Document> {
        if indices.is_empty() {
            return Err(DocumentError::MergeValidationFailed("no pages selected".to_string()));
        }
        self.pages.check_indices(indices)?;
        let sources = indices
            .iter()
            .map(|&index| Ok((self.pages.id_at(index)?, self.pages.at(index)?)))
            .collect::<DocumentResult<Vec<_>>>()?;
        let refs: Vec<_> = sources.iter().map(|(_, slot)| slot.page_ref).collect();

        let handle = self.engine.create()?;
        let mut copy = Document::empty(Arc::clone(&self.engine), handle);
        let new_refs = match self.engine.transplant_pages(self.handle, handle, &refs, 0) {
            Ok(new_refs) => new_refs,
            Err(err) => {
                copy.release();
                return Err(err.into());
            }
        };

        let mut retarget: HashMap<PageId, PageId> = HashMap::new();
        for ((source_id, source), page_ref) in sources.into_iter().zip(new_refs) {
            let at = copy.pages.len();
            let id = copy.pages.insert(at, PageSlot::new(page_ref, source.geometry));
            retarget.entry(source_id).or_insert(id);
            let annotations = self.annotations.duplicates(&source.annotations);
            bind_annotations(&mut copy.pages, &mut copy.annotations, id, annotations);
        }
        copy.metadata.toc = self.metadata.subset(&retarget, keep_toc);
        copy.metadata.info = self.metadata.info.clone();
        copy.modified = true;
        Ok(copy)
    }

    /// Insert copies of every page of `source` at `position`.
    fn merge_from(&mut self, source: &Document, position: InsertPosition) -> DocumentResult<(usize, Effects)> {
        if source.pages.is_empty() {
            return Err(DocumentError::MergeValidationFailed("source document has no pages".to_string()));
        }
        let at = position.resolve(self.pages.len())?;

        let new_refs = self
            .engine
            .transplant_pages(source.handle, self.handle, &source.pages.page_refs(), at)
            .map_err(|err| DocumentError::MergeValidationFailed(format!("could not copy source pages: {err}")))?;
        let slots = self.adopt_new_pages(&new_refs)?;

        // Nothing below can fail: the merge is committed from here on.
        let mut retarget: HashMap<PageId, PageId> = HashMap::new();
        let mut copied_annotations = Vec::new();
        for (offset, ((_, source_id, source_slot), slot)) in source.pages.iter().zip(slots).enumerate() {
            let id = self.pages.insert(at + offset, slot);
            retarget.insert(source_id, id);
            let annotations = source.annotations.duplicates(&source_slot.annotations);
            if bind_annotations(&mut self.pages, &mut self.annotations, id, annotations) > 0 {
                copied_annotations.push(at + offset);
            }
        }
        let count = retarget.len();
        let incoming = source.metadata.subset(&retarget, |_| true);
        let merged_bookmarks = incoming.len();
        self.metadata.splice(incoming, at, &self.pages);

        log::info!(
            "merged {count} pages at {at} ({} annotations, {merged_bookmarks} bookmarks); {} pages",
            self.annotations.len(),
            self.pages.len()
        );
        let mut effects = Effects::modified()
            .with_change(IndexChange::Inserted { at, count })
            .with_event(self.pages_changed());
        if !copied_annotations.is_empty() {
            effects = effects.with_event(ChangeEvent::AnnotationsChanged { pages: copied_annotations });
        }
        if merged_bookmarks > 0 {
            effects = effects.with_event(ChangeEvent::MetadataChanged);
        }
        Ok((count, effects))
    }
}

/// Validate one inclusive split range against `page_count`.
fn range_indices(range: (usize, usize), page_count: usize) -> DocumentResult<Vec<usize>> {
    let (start, end) = range;
    if start > end {
        return Err(DocumentError::MergeValidationFailed(format!(
            "range {start}-{end} starts after it ends"
        )));
    }
    if end >= page_count {
        return Err(DocumentError::MergeValidationFailed(format!(
            "range {start}-{end} is outside the document ({page_count} pages)"
        )));
    }
    Ok((start..=end).collect())
}

impl DocumentHandle {
    /// Insert all pages of `source` at `position`. Returns `true` once the
    /// pages are in.
    ///
    /// Both documents stay locked for the whole transplant; `source` is
    /// only read. On failure this document is left unchanged.
    pub fn merge(&self, source: &DocumentHandle, position: InsertPosition) -> DocumentResult<bool> {
        if source.id() == self.id() {
            return Err(DocumentError::UnsupportedOperation(
                "cannot merge a document into itself".to_string(),
            ));
        }
        if !self.shares_engine_with(source) {
            return Err(DocumentError::UnsupportedOperation(
                "source handle uses a different engine".to_string(),
            ));
        }

        // Lock in handle id order so two merges in opposite directions
        // cannot deadlock.
        let (mut destination, source_state) = if self.id() < source.id() {
            let destination = self.write_state();
            (destination, source.read_state())
        } else {
            let source_state = source.read_state();
            (self.write_state(), source_state)
        };

        let source_doc = source_state.as_ref().ok_or_else(|| {
            DocumentError::MergeValidationFailed("source handle has no open document".to_string())
        })?;
        let doc = destination.as_mut().ok_or(DocumentError::NoDocumentOpen)?;
        let (_, effects) = doc.merge_from(source_doc, position)?;

        self.notify(&mut destination, &effects);
        drop(source_state);
        drop(destination);
        self.publish(effects);
        Ok(true)
    }

    /// Open each file and merge it in order, starting at `position`.
    /// Every file is opened before anything is merged. Returns the number
    /// of pages added.
    pub fn merge_files<P: AsRef<Path>>(&self, paths: &[P], position: InsertPosition) -> DocumentResult<usize> {
        let mut at = position.resolve(self.page_count()?)?;
        let sources = paths
            .iter()
            .map(|path| {
                let source = self.sibling();
                source.open(path, None)?;
                Ok(source)
            })
            .collect::<DocumentResult<Vec<_>>>()?;

        let mut added = 0;
        for source in &sources {
            let count = source.page_count()?;
            self.merge(source, InsertPosition::At(at))?;
            at += count;
            added += count;
        }
        Ok(added)
    }

    /// Split into documents of `pages_per_document` pages each; the last
    /// one may be shorter. Either every part is produced or none is.
    pub fn split_by_count(&self, pages_per_document: usize) -> DocumentResult<Vec<DocumentHandle>> {
        if pages_per_document == 0 {
            return Err(DocumentError::MergeValidationFailed(
                "pages per document must be at least 1".to_string(),
            ));
        }

        let parts = self.read(|doc| {
            let page_count = doc.pages.len();
            if page_count == 0 {
                return Err(DocumentError::MergeValidationFailed("document has no pages".to_string()));
            }
            let mut parts = Vec::new();
            for start in (0..page_count).step_by(pages_per_document) {
                let indices: Vec<usize> = (start..(start + pages_per_document).min(page_count)).collect();
                match doc.copy_pages(&indices, |_| true) {
                    Ok(part) => parts.push(part),
                    Err(err) => {
                        parts.into_iter().for_each(Document::release);
                        return Err(err);
                    }
                }
            }
            Ok(parts)
        })?;

        log::info!("split into {} documents of up to {pages_per_document} pages", parts.len());
        parts.into_iter().map(|part| self.adopt(part)).collect()
    }

    /// Split by inclusive, 0-based page ranges. Ranges are independent:
    /// they may overlap or come in any order, and an invalid range fails
    /// on its own without affecting the others.
    ///
    /// Bookmarks follow their page into every range containing it, or only
    /// the first, depending on [`TocSplitPolicy`].
    pub fn split_by_ranges(&self, ranges: &[(usize, usize)]) -> DocumentResult<Vec<DocumentResult<DocumentHandle>>> {
        let every_range = self.config.split_toc_policy == TocSplitPolicy::EveryRange;
        let parts = self.read(|doc| {
            let mut emitted: HashSet<usize> = HashSet::new();
            Ok(ranges
                .iter()
                .map(|&range| {
                    let indices = range_indices(range, doc.pages.len())?;
                    doc.copy_pages(&indices, |position| every_range || emitted.insert(position))
                })
                .collect::<Vec<_>>())
        })?;

        let produced = parts.iter().filter(|part| part.is_ok()).count();
        log::info!("split into {produced} of {} requested ranges", ranges.len());
        Ok(parts.into_iter().map(|part| part.and_then(|part| self.adopt(part))).collect())
    }

    /// Wrap a document built from this one in a new sibling handle.
    fn adopt(&self, document: Document) -> DocumentResult<DocumentHandle> {
        let handle = self.sibling();
        handle.install(document)?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AnnotationGeometry, AnnotationKind, AnnotationStyle, EditorConfig, PageCoordinate, TocEntry,
        TocTarget,
    };
    use folio_engine::WriteOptions;

    fn config() -> EditorConfig {
        EditorConfig::new().with_render_workers(0)
    }

    fn document(handle: &DocumentHandle, pages: usize, width_offset: f32) {
        handle.create_new().unwrap();
        for page in 0..pages {
            handle.insert_blank(InsertPosition::End, width_offset + page as f32, 500.0).unwrap();
        }
    }

    fn widths(handle: &DocumentHandle) -> Vec<f32> {
        handle.all_pages_info().unwrap().iter().map(|info| info.width).collect()
    }

    fn note(handle: &DocumentHandle, page: usize) {
        handle
            .create_annotation(
                page,
                AnnotationKind::Note,
                AnnotationGeometry::Point { position: PageCoordinate::new(10.0, 10.0) },
                AnnotationStyle::new(),
            )
            .unwrap();
    }

    #[test]
    fn test_merge_retargets_toc() {
        let a = DocumentHandle::with_config(config());
        document(&a, 4, 100.0);
        a.set_toc(vec![TocEntry::new(1, "a0", 0), TocEntry::new(1, "a3", 3)]).unwrap();

        let b = a.sibling();
        document(&b, 3, 200.0);
        b.set_toc(vec![TocEntry::new(1, "b1", 1)]).unwrap();

        assert!(a.merge(&b, InsertPosition::At(2)).unwrap());
        assert_eq!(widths(&a), vec![100.0, 101.0, 200.0, 201.0, 202.0, 102.0, 103.0]);

        let toc = a.toc().unwrap();
        let titles: Vec<_> = toc.iter().map(|entry| entry.title.as_str()).collect();
        assert_eq!(titles, vec!["a0", "b1", "a3"]);
        assert_eq!(toc[1].target, TocTarget::Page(3));
        assert_eq!(toc[2].target, TocTarget::Page(6));

        // The source is untouched.
        assert_eq!(widths(&b), vec![200.0, 201.0, 202.0]);
        assert_eq!(b.toc().unwrap()[0].target, TocTarget::Page(1));
    }

    #[test]
    fn test_merge_copies_annotations() {
        let a = DocumentHandle::with_config(config());
        document(&a, 1, 100.0);
        let b = a.sibling();
        document(&b, 2, 200.0);
        note(&b, 1);

        a.merge(&b, InsertPosition::At(0)).unwrap();
        let copied = a.annotations_for_page(1).unwrap();
        assert_eq!(copied.len(), 1);
        assert_ne!(copied[0].id, b.annotations_for_page(1).unwrap()[0].id);
        assert_eq!(a.annotation_count().unwrap(), 1);
    }

    #[test]
    fn test_merge_failures_leave_document_unchanged() {
        let a = DocumentHandle::with_config(config());
        document(&a, 2, 100.0);
        let b = a.sibling();
        document(&b, 2, 200.0);

        assert!(matches!(
            a.merge(&b, InsertPosition::At(3)),
            Err(DocumentError::InvalidPageIndex { index: 3, page_count: 2 })
        ));
        assert!(matches!(a.merge(&a, InsertPosition::End), Err(DocumentError::UnsupportedOperation(_))));

        let empty = a.sibling();
        empty.create_new().unwrap();
        assert!(matches!(a.merge(&empty, InsertPosition::End), Err(DocumentError::MergeValidationFailed(_))));
        assert!(matches!(
            a.merge(&a.sibling(), InsertPosition::End),
            Err(DocumentError::MergeValidationFailed(_))
        ));

        let foreign = DocumentHandle::with_config(config());
        document(&foreign, 1, 300.0);
        assert!(matches!(a.merge(&foreign, InsertPosition::End), Err(DocumentError::UnsupportedOperation(_))));

        assert_eq!(widths(&a), vec![100.0, 101.0]);
    }

    #[test]
    fn test_merge_in_both_directions() {
        let a = DocumentHandle::with_config(config());
        document(&a, 1, 100.0);
        let b = a.sibling();
        document(&b, 1, 200.0);

        a.merge(&b, InsertPosition::End).unwrap();
        b.merge(&a, InsertPosition::At(0)).unwrap();
        assert_eq!(widths(&b), vec![100.0, 200.0, 200.0]);
    }

    #[test]
    fn test_merge_files_in_order() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut paths = Vec::new();
        for (name, width) in [("one.pdf", 10.0), ("two.pdf", 20.0)] {
            let source = DocumentHandle::with_config(config());
            document(&source, 2, width);
            let path = temp_dir.path().join(name);
            source.save(Some(&path), &WriteOptions::default()).unwrap();
            paths.push(path);
        }

        let target = DocumentHandle::with_config(config());
        document(&target, 2, 100.0);
        assert_eq!(target.merge_files(&paths, InsertPosition::At(1)).unwrap(), 4);
        assert_eq!(widths(&target), vec![100.0, 10.0, 11.0, 20.0, 21.0, 101.0]);

        let missing = [temp_dir.path().join("missing.pdf")];
        assert!(matches!(target.merge_files(&missing, InsertPosition::End), Err(DocumentError::Io(_))));
        assert_eq!(target.page_count().unwrap(), 6);
    }

    #[test]
    fn test_split_by_count() {
        let handle = DocumentHandle::with_config(config());
        document(&handle, 5, 0.0);
        note(&handle, 4);
        handle
            .set_toc(vec![TocEntry::new(1, "start", 0), TocEntry::new(1, "last", 4)])
            .unwrap();

        let parts = handle.split_by_count(2).unwrap();
        let sizes: Vec<_> = parts.iter().map(|part| part.page_count().unwrap()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(widths(&parts[2]), vec![4.0]);
        assert_eq!(parts[2].annotations_for_page(0).unwrap().len(), 1);
        assert_eq!(parts[0].toc().unwrap()[0].title, "start");
        assert!(parts[1].toc().unwrap().is_empty());
        assert_eq!(parts[2].toc().unwrap()[0].target, TocTarget::Page(0));
        assert!(parts.iter().all(|part| part.is_modified().unwrap()));

        assert!(matches!(handle.split_by_count(0), Err(DocumentError::MergeValidationFailed(_))));
        assert_eq!(handle.page_count().unwrap(), 5);
    }

    #[test]
    fn test_split_by_ranges_reports_per_range() {
        let handle = DocumentHandle::with_config(config());
        document(&handle, 6, 0.0);

        let parts = handle.split_by_ranges(&[(4, 5), (3, 1), (0, 9), (1, 2)]).unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(widths(parts[0].as_ref().unwrap()), vec![4.0, 5.0]);
        assert!(matches!(parts[1], Err(DocumentError::MergeValidationFailed(_))));
        assert!(matches!(parts[2], Err(DocumentError::MergeValidationFailed(_))));
        assert_eq!(widths(parts[3].as_ref().unwrap()), vec![1.0, 2.0]);
    }

    #[test]
    fn test_overlapping_ranges_follow_toc_policy() {
        let entries = vec![TocEntry::new(1, "shared", 2), TocEntry::new(2, "child", 3)];

        let every = DocumentHandle::with_config(config());
        document(&every, 5, 0.0);
        every.set_toc(entries.clone()).unwrap();
        let parts = every.split_by_ranges(&[(0, 3), (2, 4)]).unwrap();
        assert_eq!(parts[0].as_ref().unwrap().toc().unwrap().len(), 2);
        assert_eq!(parts[1].as_ref().unwrap().toc().unwrap()[0].target, TocTarget::Page(0));

        let first_only =
            DocumentHandle::with_config(config().with_split_toc_policy(TocSplitPolicy::FirstRangeOnly));
        document(&first_only, 5, 0.0);
        first_only.set_toc(entries).unwrap();
        let parts = first_only.split_by_ranges(&[(0, 3), (2, 4)]).unwrap();
        assert_eq!(parts[0].as_ref().unwrap().toc().unwrap().len(), 2);
        assert!(parts[1].as_ref().unwrap().toc().unwrap().is_empty());
    }

    #[test]
    fn test_split_keeps_metadata() {
        let handle = DocumentHandle::with_config(config());
        document(&handle, 2, 0.0);
        handle
            .set_metadata(crate::DocumentMetadata { title: Some("Report".to_string()), ..Default::default() })
            .unwrap();
        let parts = handle.split_by_count(1).unwrap();
        assert_eq!(parts[1].metadata().unwrap().title.as_deref(), Some("Report"));
    }
}
