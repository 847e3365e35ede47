//! Page table
//!
//! Pages live in an arena keyed by [`PageId`], which never changes while the
//! document is open. The `order` vector is the only place positions exist:
//! a page's index is wherever its id sits in `order`, so indices are always
//! the contiguous range `0..len()`.

use crate::annotation::AnnotationId;
use crate::error::{DocumentError, DocumentResult};
use folio_engine::{PageGeometry, PageRef};
use std::collections::HashMap;

/// Stable identity of a page for the lifetime of one open document.
pub type PageId = u64;

#[derive(Debug, Clone)]
pub(crate) struct PageSlot {
    pub page_ref: PageRef,
    pub geometry: PageGeometry,
    /// Annotations bound to this page. The registry owns them.
    pub annotations: Vec<AnnotationId>,
}

impl PageSlot {
    pub fn new(page_ref: PageRef, geometry: PageGeometry) -> Self {
        Self { page_ref, geometry, annotations: Vec::new() }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PageTable {
    slots: HashMap<PageId, PageSlot>,
    order: Vec<PageId>,
    next_id: PageId,
}

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pages(pages: impl IntoIterator<Item = (PageRef, PageGeometry)>) -> Self {
        let mut table = Self::new();
        for (page_ref, geometry) in pages {
            let at = table.len();
            table.insert(at, PageSlot::new(page_ref, geometry));
        }
        table
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn check_index(&self, index: usize) -> DocumentResult<()> {
        if index < self.len() {
            Ok(())
        } else {
            Err(DocumentError::invalid_index(index, self.len()))
        }
    }

    /// Validates every index before anything is touched.
    pub fn check_indices(&self, indices: &[usize]) -> DocumentResult<()> {
        indices.iter().try_for_each(|&index| self.check_index(index))
    }

    pub fn id_at(&self, index: usize) -> DocumentResult<PageId> {
        self.order.get(index).copied().ok_or_else(|| DocumentError::invalid_index(index, self.len()))
    }

    pub fn index_of(&self, id: PageId) -> Option<usize> {
        self.order.iter().position(|&candidate| candidate == id)
    }

    pub fn ids(&self) -> &[PageId] {
        &self.order
    }

    pub fn slot(&self, id: PageId) -> Option<&PageSlot> {
        self.slots.get(&id)
    }

    pub fn slot_mut(&mut self, id: PageId) -> Option<&mut PageSlot> {
        self.slots.get_mut(&id)
    }

    pub fn at(&self, index: usize) -> DocumentResult<&PageSlot> {
        let id = self.id_at(index)?;
        self.slots.get(&id).ok_or_else(|| DocumentError::invalid_index(index, self.len()))
    }

    pub fn page_refs(&self) -> Vec<PageRef> {
        self.order.iter().filter_map(|id| self.slots.get(id)).map(|slot| slot.page_ref).collect()
    }

    /// Insert a page at `at` (clamped to the end) and return its new id.
    pub fn insert(&mut self, at: usize, slot: PageSlot) -> PageId {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(id, slot);
        self.order.insert(at.min(self.order.len()), id);
        id
    }

    /// Remove the pages at `indices`. Callers validate first; the indices
    /// are processed highest first so earlier removals never shift later
    /// targets.
    pub fn remove(&mut self, indices: &[usize]) -> Vec<(PageId, PageSlot)> {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut removed = Vec::with_capacity(sorted.len());
        for &index in sorted.iter().rev() {
            if index >= self.order.len() {
                continue;
            }
            let id = self.order.remove(index);
            if let Some(slot) = self.slots.remove(&id) {
                removed.push((id, slot));
            }
        }
        removed.reverse();
        removed
    }

    /// Single-step relocation of one page.
    pub fn move_page(&mut self, from: usize, to: usize) {
        if from == to || from >= self.order.len() || to >= self.order.len() {
            return;
        }
        let id = self.order.remove(from);
        self.order.insert(to, id);
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, PageId, &PageSlot)> {
        self.order
            .iter()
            .enumerate()
            .filter_map(|(index, id)| self.slots.get(id).map(|slot| (index, *id, slot)))
    }
}
