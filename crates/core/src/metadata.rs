//! Document info fields and table of contents
//!
//! Bookmarks point at pages by [`PageId`]. Their page index is derived from
//! the current page order whenever the table of contents is read, so
//! structural edits never need to renumber them. A bookmark whose page was
//! deleted is kept and reported as [`TocTarget::Stale`].

use crate::document::{DocumentHandle, Effects};
use crate::error::{DocumentError, DocumentResult};
use crate::events::ChangeEvent;
use crate::pages::{PageId, PageTable};
use folio_engine::{InfoFields, OutlineDestination, OutlineItem, PageRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Document-level metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    /// Raw PDF date string, e.g. `D:20240101120000Z`
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
}

impl From<InfoFields> for DocumentMetadata {
    fn from(info: InfoFields) -> Self {
        Self {
            title: info.title,
            author: info.author,
            subject: info.subject,
            keywords: info.keywords,
            creator: info.creator,
            producer: info.producer,
            creation_date: info.creation_date,
            modification_date: info.modification_date,
        }
    }
}

impl From<&DocumentMetadata> for InfoFields {
    fn from(metadata: &DocumentMetadata) -> Self {
        Self {
            title: metadata.title.clone(),
            author: metadata.author.clone(),
            subject: metadata.subject.clone(),
            keywords: metadata.keywords.clone(),
            creator: metadata.creator.clone(),
            producer: metadata.producer.clone(),
            creation_date: metadata.creation_date.clone(),
            modification_date: metadata.modification_date.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "index")]
pub enum TocTarget {
    /// 0-based page index
    Page(usize),
    /// The target page was deleted.
    Stale,
}

/// Explicit view position inside the target page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TocDestination {
    pub left: Option<f32>,
    pub top: Option<f32>,
    pub zoom: Option<f32>,
}

impl From<OutlineDestination> for TocDestination {
    fn from(dest: OutlineDestination) -> Self {
        Self { left: dest.left, top: dest.top, zoom: dest.zoom }
    }
}

impl From<TocDestination> for OutlineDestination {
    fn from(dest: TocDestination) -> Self {
        Self { left: dest.left, top: dest.top, zoom: dest.zoom }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    /// 1-based nesting depth
    pub level: u32,
    pub title: String,
    pub target: TocTarget,
    pub destination: Option<TocDestination>,
}

impl TocEntry {
    pub fn new(level: u32, title: impl Into<String>, page: usize) -> Self {
        Self { level, title: title.into(), target: TocTarget::Page(page), destination: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredTocEntry {
    pub level: u32,
    pub title: String,
    /// `None` once the target page has been deleted.
    pub page: Option<PageId>,
    pub destination: Option<TocDestination>,
}

#[derive(Debug, Default)]
pub(crate) struct MetadataStore {
    pub info: DocumentMetadata,
    pub toc: Vec<StoredTocEntry>,
}

impl MetadataStore {
    /// Build from what the codec read, resolving outline targets to page ids.
    pub fn load(info: InfoFields, outline: Vec<OutlineItem>, pages: &PageTable) -> Self {
        let by_ref: HashMap<PageRef, PageId> =
            pages.iter().map(|(_, id, slot)| (slot.page_ref, id)).collect();
        let toc = outline
            .into_iter()
            .filter_map(|item| {
                let page = by_ref.get(&item.page).copied()?;
                Some(StoredTocEntry {
                    level: item.level,
                    title: item.title,
                    page: Some(page),
                    destination: item.destination.map(TocDestination::from),
                })
            })
            .collect();
        let mut store = Self { info: info.into(), toc };
        normalize_levels(&mut store.toc);
        store
    }

    pub fn entries(&self, pages: &PageTable) -> Vec<TocEntry> {
        self.toc.iter().map(|entry| to_public(entry, pages)).collect()
    }

    /// Outline items for the codec. Stale entries are left out.
    pub fn outline(&self, pages: &PageTable) -> Vec<OutlineItem> {
        let mut entries: Vec<StoredTocEntry> =
            self.toc.iter().filter(|entry| entry.page.is_some()).cloned().collect();
        normalize_levels(&mut entries);
        entries
            .into_iter()
            .filter_map(|entry| {
                let page_ref = pages.slot(entry.page?)?.page_ref;
                Some(OutlineItem {
                    level: entry.level,
                    title: entry.title,
                    page: page_ref,
                    destination: entry.destination.map(OutlineDestination::from),
                })
            })
            .collect()
    }

    /// Mark every entry pointing at a removed page stale. Returns how many
    /// entries changed.
    pub fn mark_stale(&mut self, removed: &[PageId]) -> usize {
        let mut changed = 0;
        for entry in &mut self.toc {
            if entry.page.is_some_and(|page| removed.contains(&page)) {
                entry.page = None;
                changed += 1;
            }
        }
        changed
    }

    /// Entries whose target is among `pages`, retargeted through `map`,
    /// with levels repaired for the gaps left by dropped entries.
    /// `keep` sees each candidate's position in this table of contents.
    pub fn subset(
        &self,
        map: &HashMap<PageId, PageId>,
        mut keep: impl FnMut(usize) -> bool,
    ) -> Vec<StoredTocEntry> {
        let mut entries: Vec<StoredTocEntry> = self
            .toc
            .iter()
            .enumerate()
            .filter_map(|(position, entry)| {
                let target = map.get(&entry.page?).copied()?;
                keep(position).then(|| StoredTocEntry { page: Some(target), ..entry.clone() })
            })
            .collect();
        normalize_levels(&mut entries);
        entries
    }

    /// Insert entries from a merged document where their pages landed.
    ///
    /// Existing entries targeting pages before `position` (in pre-merge
    /// order) keep their place in front of the incoming block.
    pub fn splice(&mut self, incoming: Vec<StoredTocEntry>, position: usize, pages: &PageTable) {
        if incoming.is_empty() {
            return;
        }
        let insert_at = self
            .toc
            .iter()
            .position(|entry| {
                entry.page.and_then(|page| pages.index_of(page)).is_some_and(|index| index >= position)
            })
            .unwrap_or(self.toc.len());
        self.toc.splice(insert_at..insert_at, incoming);
        normalize_levels(&mut self.toc);
    }
}

fn to_public(entry: &StoredTocEntry, pages: &PageTable) -> TocEntry {
    let target = match entry.page.and_then(|page| pages.index_of(page)) {
        Some(index) => TocTarget::Page(index),
        None => TocTarget::Stale,
    };
    TocEntry {
        level: entry.level,
        title: entry.title.clone(),
        target,
        destination: entry.destination,
    }
}

/// Clamp levels so the first entry is level 1 and no entry is more than
/// one level deeper than the one before it.
fn normalize_levels(entries: &mut [StoredTocEntry]) {
    let mut previous = 0;
    for entry in entries {
        entry.level = entry.level.clamp(1, previous + 1);
        previous = entry.level;
    }
}

fn validate_toc(entries: &[TocEntry], page_count: usize) -> DocumentResult<()> {
    let mut previous = 0;
    for (position, entry) in entries.iter().enumerate() {
        if entry.level == 0 || entry.level > previous + 1 {
            return Err(DocumentError::InvalidToc(format!(
                "entry {position} ({:?}) has level {} after level {previous}",
                entry.title, entry.level
            )));
        }
        if let TocTarget::Page(index) = entry.target {
            if index >= page_count {
                return Err(DocumentError::invalid_index(index, page_count));
            }
        }
        previous = entry.level;
    }
    Ok(())
}

fn metadata_changed() -> Effects {
    Effects::modified().with_event(ChangeEvent::MetadataChanged)
}

impl DocumentHandle {
    pub fn metadata(&self) -> DocumentResult<DocumentMetadata> {
        self.read(|doc| Ok(doc.metadata.info.clone()))
    }

    pub fn set_metadata(&self, metadata: DocumentMetadata) -> DocumentResult<()> {
        self.mutate(|doc| {
            doc.metadata.info = metadata;
            Ok(((), metadata_changed()))
        })
    }

    /// Table of contents with targets resolved against the current page order.
    pub fn toc(&self) -> DocumentResult<Vec<TocEntry>> {
        self.read(|doc| Ok(doc.metadata.entries(&doc.pages)))
    }

    /// Replace the whole table of contents.
    ///
    /// The first entry must be level 1, levels may deepen by at most one per
    /// entry, and every page target must exist.
    pub fn set_toc(&self, entries: Vec<TocEntry>) -> DocumentResult<()> {
        self.mutate(|doc| {
            validate_toc(&entries, doc.pages.len())?;
            let ids = doc.pages.ids();
            doc.metadata.toc = entries
                .into_iter()
                .map(|entry| StoredTocEntry {
                    level: entry.level,
                    title: entry.title,
                    page: match entry.target {
                        TocTarget::Page(index) => ids.get(index).copied(),
                        TocTarget::Stale => None,
                    },
                    destination: entry.destination,
                })
                .collect();
            Ok(((), metadata_changed()))
        })
    }

    /// Add a bookmark after the last entry targeting the same or an earlier
    /// page. Returns the new entry's position.
    pub fn add_bookmark(
        &self,
        title: impl Into<String>,
        page_index: usize,
        level: u32,
    ) -> DocumentResult<usize> {
        let title = title.into();
        self.mutate(|doc| {
            let page = doc.pages.id_at(page_index)?;
            let mut entries = doc.metadata.entries(&doc.pages);
            let position = entries
                .iter()
                .rposition(|entry| matches!(entry.target, TocTarget::Page(index) if index <= page_index))
                .map_or(0, |found| found + 1);
            entries.insert(position, TocEntry::new(level, title.clone(), page_index));
            validate_toc(&entries, doc.pages.len())?;

            doc.metadata.toc.insert(
                position,
                StoredTocEntry { level, title, page: Some(page), destination: None },
            );
            Ok((position, metadata_changed()))
        })
    }

    /// Remove one bookmark. Its children move up one level.
    pub fn remove_bookmark(&self, position: usize) -> DocumentResult<()> {
        self.mutate(|doc| {
            let toc = &mut doc.metadata.toc;
            if position >= toc.len() {
                return Err(DocumentError::TocEntryNotFound(position));
            }
            let removed = toc.remove(position);
            for child in toc[position..].iter_mut().take_while(|entry| entry.level > removed.level) {
                child.level -= 1;
            }
            normalize_levels(toc);
            Ok(((), metadata_changed()))
        })
    }
}
