//! Structural page operations
//!
//! Every operation validates all of its indices before the codec is asked
//! to change anything, and the codec operations themselves are atomic, so
//! a failure leaves the document exactly as it was.

use crate::annotation::bind_annotations;
use crate::document::{Document, DocumentHandle, Effects};
use crate::error::{DocumentError, DocumentResult};
use crate::events::ChangeEvent;
use crate::pages::{PageId, PageSlot};
use folio_cache::IndexChange;
use folio_engine::{PageRef, PageSpec, Rotation, WriteOptions};
use std::path::Path;

/// Where a new page goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    /// Before the page currently at this index (`page_count` appends).
    At(usize),
    End,
}

impl InsertPosition {
    pub(crate) fn resolve(self, page_count: usize) -> DocumentResult<usize> {
        match self {
            Self::At(index) if index <= page_count => Ok(index),
            Self::At(index) => Err(DocumentError::invalid_index(index, page_count)),
            Self::End => Ok(page_count),
        }
    }
}

impl From<usize> for InsertPosition {
    fn from(index: usize) -> Self {
        Self::At(index)
    }
}

impl Document {
    pub(crate) fn pages_changed(&self) -> ChangeEvent {
        ChangeEvent::PagesChanged { page_count: self.pages.len() }
    }

    /// Geometry of freshly created codec pages. If any lookup fails the new
    /// pages are deleted again.
    pub(crate) fn adopt_new_pages(&self, refs: &[PageRef]) -> DocumentResult<Vec<PageSlot>> {
        let mut slots = Vec::with_capacity(refs.len());
        for &page_ref in refs {
            match self.engine.page_geometry(self.handle, page_ref) {
                Ok(geometry) => slots.push(PageSlot::new(page_ref, geometry)),
                Err(err) => {
                    if let Err(rollback) = self.engine.delete_pages(self.handle, refs) {
                        log::warn!("rollback of new pages failed: {rollback}");
                    }
                    return Err(err.into());
                }
            }
        }
        Ok(slots)
    }

    fn insert_page(&mut self, at: InsertPosition, spec: &PageSpec) -> DocumentResult<(usize, Effects)> {
        let index = at.resolve(self.pages.len())?;
        let page_ref = self.engine.insert_page(self.handle, index, spec)?;
        let mut slots = self.adopt_new_pages(&[page_ref])?;
        self.pages.insert(index, slots.remove(0));

        log::debug!("inserted page at {index}; {} pages", self.pages.len());
        let effects = Effects::modified()
            .with_change(IndexChange::Inserted { at: index, count: 1 })
            .with_event(self.pages_changed());
        Ok((index, effects))
    }

    fn delete_pages(&mut self, indices: &[usize]) -> DocumentResult<(usize, Effects)> {
        if indices.is_empty() {
            return Ok((0, Effects::none()));
        }
        self.pages.check_indices(indices)?;
        let mut unique = indices.to_vec();
        unique.sort_unstable();
        unique.dedup();
        if unique.len() == self.pages.len() {
            return Err(DocumentError::UnsupportedOperation(
                "cannot delete every page of a document".to_string(),
            ));
        }

        let refs = unique
            .iter()
            .map(|&index| self.pages.at(index).map(|slot| slot.page_ref))
            .collect::<DocumentResult<Vec<_>>>()?;
        self.engine.delete_pages(self.handle, &refs)?;

        let removed = self.pages.remove(&unique);
        let removed_ids: Vec<PageId> = removed.iter().map(|(id, _)| *id).collect();
        let dropped_annotations: usize =
            removed.iter().map(|(_, slot)| self.annotations.remove_all(&slot.annotations)).sum();
        let stale_bookmarks = self.metadata.mark_stale(&removed_ids);

        log::debug!(
            "deleted pages {unique:?} ({dropped_annotations} annotations, {stale_bookmarks} bookmarks stale); {} pages",
            self.pages.len()
        );
        let mut effects = Effects::modified()
            .with_event(self.pages_changed())
            .with_removed_pages(removed_ids);
        if dropped_annotations > 0 {
            effects = effects.with_event(ChangeEvent::AnnotationsChanged { pages: unique.clone() });
        }
        if stale_bookmarks > 0 {
            effects = effects.with_event(ChangeEvent::MetadataChanged);
        }
        Ok((removed.len(), effects.with_change(IndexChange::Removed { indices: unique })))
    }

    fn move_page(&mut self, from: usize, to: usize) -> DocumentResult<((), Effects)> {
        self.pages.check_index(from)?;
        self.pages.check_index(to)?;
        if from == to {
            return Ok(((), Effects::none()));
        }

        let page_ref = self.pages.at(from)?.page_ref;
        self.engine.move_page(self.handle, page_ref, to)?;
        self.pages.move_page(from, to);

        log::debug!("moved page {from} -> {to}");
        let effects = Effects::modified()
            .with_change(IndexChange::Moved { from, to })
            .with_event(self.pages_changed());
        Ok(((), effects))
    }

    fn duplicate_page(&mut self, index: usize, to: InsertPosition) -> DocumentResult<(usize, Effects)> {
        let source = self.pages.id_at(index)?;
        let target = to.resolve(self.pages.len())?;
        let page_ref = self.pages.at(index)?.page_ref;

        let new_refs = self.engine.transplant_pages(self.handle, self.handle, &[page_ref], target)?;
        let mut slots = self.adopt_new_pages(&new_refs)?;
        let copy = self.pages.insert(target, slots.remove(0));

        let originals = self.pages.slot(source).map(|slot| slot.annotations.clone()).unwrap_or_default();
        let copies = self.annotations.duplicates(&originals);
        let copied = bind_annotations(&mut self.pages, &mut self.annotations, copy, copies);

        log::debug!("duplicated page {index} to {target} with {copied} annotations");
        let mut effects = Effects::modified()
            .with_change(IndexChange::Inserted { at: target, count: 1 })
            .with_event(self.pages_changed());
        if copied > 0 {
            effects = effects.with_event(ChangeEvent::AnnotationsChanged { pages: vec![target] });
        }
        Ok((target, effects))
    }

    /// Rotate several pages by the same amount. Already-rotated pages are
    /// restored if the codec fails part way.
    fn rotate_pages(&mut self, indices: &[usize], degrees: i32) -> DocumentResult<(Vec<Rotation>, Effects)> {
        let delta = Rotation::from_degrees(degrees).ok_or(DocumentError::InvalidRotation(degrees))?;
        self.pages.check_indices(indices)?;

        let mut unique = indices.to_vec();
        unique.sort_unstable();
        unique.dedup();
        if delta == Rotation::Deg0 {
            let current = indices
                .iter()
                .map(|&index| self.pages.at(index).map(|slot| slot.geometry.rotation))
                .collect::<DocumentResult<Vec<_>>>()?;
            return Ok((current, Effects::none()));
        }

        let mut applied: Vec<(PageRef, Rotation)> = Vec::with_capacity(unique.len());
        for &index in &unique {
            let slot = self.pages.at(index)?;
            let (page_ref, before) = (slot.page_ref, slot.geometry.rotation);
            if let Err(err) = self.engine.set_rotation(self.handle, page_ref, before.rotate_by(delta)) {
                for (page_ref, before) in applied {
                    if let Err(rollback) = self.engine.set_rotation(self.handle, page_ref, before) {
                        log::warn!("rollback of page rotation failed: {rollback}");
                    }
                }
                return Err(err.into());
            }
            applied.push((page_ref, before));
        }

        let mut effects = Effects::modified();
        for &index in &unique {
            let id = self.pages.id_at(index)?;
            if let Some(slot) = self.pages.slot_mut(id) {
                slot.geometry.rotation = slot.geometry.rotation.rotate_by(delta);
            }
            effects = effects.with_change(IndexChange::ContentChanged { index });
        }
        log::debug!("rotated pages {unique:?} by {degrees}");

        let rotations = indices
            .iter()
            .map(|&index| self.pages.at(index).map(|slot| slot.geometry.rotation))
            .collect::<DocumentResult<Vec<_>>>()?;
        Ok((rotations, effects.with_event(self.pages_changed())))
    }
}

impl DocumentHandle {
    /// Insert a page built from `spec` and return its index.
    pub fn insert(&self, at: InsertPosition, spec: &PageSpec) -> DocumentResult<usize> {
        self.mutate(|doc| doc.insert_page(at, spec))
    }

    /// Insert a blank page of `width` x `height` points.
    pub fn insert_blank(&self, at: InsertPosition, width: f32, height: f32) -> DocumentResult<usize> {
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(DocumentError::UnsupportedOperation(format!(
                "invalid page size {width} x {height}"
            )));
        }
        self.insert(at, &PageSpec::Blank { width, height })
    }

    /// Insert a blank page of the configured default size.
    pub fn insert_default(&self, at: InsertPosition) -> DocumentResult<usize> {
        let size = self.config.default_page_size;
        self.insert_blank(at, size.width, size.height)
    }

    pub fn delete(&self, index: usize) -> DocumentResult<()> {
        self.delete_many(&[index]).map(|_| ())
    }

    /// Delete several pages at once. Every index is validated first; either
    /// all pages go or none do. Returns the number of pages removed.
    pub fn delete_many(&self, indices: &[usize]) -> DocumentResult<usize> {
        self.mutate(|doc| doc.delete_pages(indices))
    }

    /// Move the page at `from` so it ends up at index `to`.
    pub fn move_page(&self, from: usize, to: usize) -> DocumentResult<()> {
        self.mutate(|doc| doc.move_page(from, to))
    }

    /// Copy a page, including deep copies of its annotations, and return
    /// the index of the copy.
    pub fn duplicate(&self, index: usize, to: InsertPosition) -> DocumentResult<usize> {
        self.mutate(|doc| doc.duplicate_page(index, to))
    }

    /// Rotate a page clockwise by a multiple of 90 degrees (negative values
    /// rotate counter-clockwise). Returns the page's new rotation.
    pub fn rotate(&self, index: usize, degrees: i32) -> DocumentResult<Rotation> {
        let rotations = self.rotate_many(&[index], degrees)?;
        Ok(rotations[0])
    }

    pub fn rotate_many(&self, indices: &[usize], degrees: i32) -> DocumentResult<Vec<Rotation>> {
        self.mutate(|doc| doc.rotate_pages(indices, degrees))
    }

    /// Copy the pages at `indices`, in that order, into the unopened
    /// `destination` handle. The source is not modified.
    pub fn extract(&self, indices: &[usize], destination: &DocumentHandle) -> DocumentResult<usize> {
        if destination.id() == self.id() {
            return Err(DocumentError::UnsupportedOperation(
                "cannot extract into the source handle".to_string(),
            ));
        }
        if !self.shares_engine_with(destination) {
            return Err(DocumentError::UnsupportedOperation(
                "destination handle uses a different engine".to_string(),
            ));
        }
        if destination.is_open() {
            return Err(DocumentError::UnsupportedOperation(
                "destination handle already has an open document".to_string(),
            ));
        }

        let document = self.read(|doc| doc.copy_pages(indices, |_| true))?;
        let count = document.pages.len();
        destination.install(document)?;
        log::info!("extracted {count} pages");
        Ok(count)
    }

    /// Extract pages straight to a file.
    pub fn extract_to_path(
        &self,
        indices: &[usize],
        path: impl AsRef<Path>,
        options: &WriteOptions,
    ) -> DocumentResult<usize> {
        let destination = self.sibling();
        let count = self.extract(indices, &destination)?;
        destination.save(Some(path.as_ref()), options)?;
        destination.close()?;
        Ok(count)
    }
}
