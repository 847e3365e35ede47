//! Document handle and lifecycle
//!
//! A [`DocumentHandle`] owns at most one open document. All index state of
//! that document sits behind one `RwLock`: mutations take the write side,
//! reads share the read side. Internal operations never touch the modified
//! flag, the render cache or subscribers directly; they return [`Effects`]
//! which the handle applies while it still holds the write lock.

use crate::annotation::{bind_annotations, Annotation, AnnotationRegistry};
use crate::config::EditorConfig;
use crate::error::{DocumentError, DocumentResult};
use crate::events::{ChangeEvent, EventBus};
use crate::metadata::MetadataStore;
use crate::pages::{PageId, PageSlot, PageTable};
use crate::render::{IndexObserver, RenderDispatcher};
use crate::security::{Password, SecurityState};
use crossbeam_channel::Receiver;
use folio_cache::{IndexChange, RenderCache};
use folio_engine::{
    EngineHandle, InfoFields, LopdfEngine, OpenOutcome, OpenSource, PdfEngine, WriteOptions,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// State of one open document.
pub(crate) struct Document {
    pub engine: Arc<dyn PdfEngine>,
    pub handle: EngineHandle,
    pub path: Option<PathBuf>,
    pub modified: bool,
    pub pages: PageTable,
    pub annotations: AnnotationRegistry,
    pub metadata: MetadataStore,
    pub security: SecurityState,
}

impl Document {
    /// Read page table, info, outline and annotations from an engine
    /// document.
    pub fn load(
        engine: Arc<dyn PdfEngine>,
        handle: EngineHandle,
        path: Option<PathBuf>,
    ) -> DocumentResult<Self> {
        let refs = engine.page_refs(handle)?;
        let mut pages = Vec::with_capacity(refs.len());
        for page_ref in refs {
            pages.push((page_ref, engine.page_geometry(handle, page_ref)?));
        }
        let mut pages = PageTable::from_pages(pages);
        let metadata = MetadataStore::load(engine.metadata(handle)?, engine.outline(handle)?, &pages);

        let mut annotations = AnnotationRegistry::new();
        let owners: Vec<(PageId, folio_engine::PageRef)> =
            pages.iter().map(|(_, id, slot)| (id, slot.page_ref)).collect();
        for (owner, page_ref) in owners {
            let read: Vec<Annotation> = engine
                .annotations(handle, page_ref)?
                .iter()
                .filter_map(Annotation::from_appearance)
                .collect();
            bind_annotations(&mut pages, &mut annotations, owner, read);
        }
        log::debug!("read {} annotations", annotations.len());

        Ok(Self {
            engine,
            handle,
            path,
            modified: false,
            pages,
            annotations,
            metadata,
            security: SecurityState::default(),
        })
    }

    /// Empty document around a freshly created engine handle.
    pub fn empty(engine: Arc<dyn PdfEngine>, handle: EngineHandle) -> Self {
        Self {
            engine,
            handle,
            path: None,
            modified: false,
            pages: PageTable::new(),
            annotations: AnnotationRegistry::new(),
            metadata: MetadataStore::default(),
            security: SecurityState::default(),
        }
    }

    /// Push model-owned state (info, bookmarks, annotations) into the codec.
    fn sync_engine(&self) -> DocumentResult<()> {
        self.engine.set_metadata(self.handle, &InfoFields::from(&self.metadata.info))?;
        self.engine.set_outline(self.handle, &self.metadata.outline(&self.pages))?;
        for (_, _, slot) in self.pages.iter() {
            let appearances = self.annotations.appearances(&slot.annotations);
            self.engine.set_annotations(self.handle, slot.page_ref, &appearances)?;
        }
        Ok(())
    }

    fn write_to(&self, path: &Path, options: &WriteOptions) -> DocumentResult<()> {
        self.sync_engine()?;
        self.engine.write(self.handle, path, options)?;
        Ok(())
    }

    pub(crate) fn release(self) {
        if let Err(err) = self.engine.close(self.handle) {
            log::warn!("failed to close engine handle {}: {err}", self.handle.raw());
        }
    }

    pub fn page_info(&self, index: usize) -> DocumentResult<PageInfo> {
        let slot = self.pages.at(index)?;
        Ok(PageInfo::new(index, slot))
    }
}

/// What a successful mutation did.
///
/// Returned by internal operations and applied by the handle, so the
/// modified flag, cache and subscribers are only ever touched after the
/// whole operation succeeded.
#[derive(Debug, Default)]
#[must_use]
pub(crate) struct Effects {
    pub modified: bool,
    pub changes: Vec<IndexChange>,
    pub events: Vec<ChangeEvent>,
    /// Pages that no longer exist, for cancelling queued renders.
    pub removed_pages: Vec<PageId>,
}

impl Effects {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn modified() -> Self {
        Self { modified: true, ..Self::default() }
    }

    pub fn with_change(mut self, change: IndexChange) -> Self {
        self.changes.push(change);
        self
    }

    pub fn with_event(mut self, event: ChangeEvent) -> Self {
        if !self.events.contains(&event) {
            self.events.push(event);
        }
        self
    }

    pub fn with_removed_pages(mut self, pages: Vec<PageId>) -> Self {
        self.removed_pages.extend(pages);
        self
    }
}

/// Geometry and bookkeeping of one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageInfo {
    pub index: usize,
    /// 1-based label as shown to users
    pub label: String,
    pub width: f32,
    pub height: f32,
    /// Page rotation in degrees
    pub rotation: u16,
    pub annotation_count: usize,
}

impl PageInfo {
    fn new(index: usize, slot: &PageSlot) -> Self {
        Self {
            index,
            label: (index + 1).to_string(),
            width: slot.geometry.width,
            height: slot.geometry.height,
            rotation: slot.geometry.rotation.degrees(),
            annotation_count: slot.annotations.len(),
        }
    }
}

/// Owner of one open document.
///
/// Operations on a handle with no open document fail with
/// [`DocumentError::NoDocumentOpen`].
///
/// # Example
///
/// ```
/// use folio_core::{DocumentHandle, EditorConfig, InsertPosition};
///
/// let handle = DocumentHandle::with_config(EditorConfig::new().with_render_workers(0));
/// handle.create_new().unwrap();
/// handle.insert_blank(InsertPosition::End, 595.0, 842.0).unwrap();
/// handle.insert_blank(InsertPosition::At(0), 300.0, 300.0).unwrap();
///
/// assert_eq!(handle.page_count().unwrap(), 2);
/// assert_eq!(handle.page_info(0).unwrap().width, 300.0);
/// assert!(handle.is_modified().unwrap());
/// ```
pub struct DocumentHandle {
    id: u64,
    pub(crate) engine: Arc<dyn PdfEngine>,
    pub(crate) config: Arc<EditorConfig>,
    pub(crate) state: RwLock<Option<Document>>,
    pub(crate) cache: RenderCache,
    observers: RwLock<Vec<Arc<dyn IndexObserver>>>,
    events: EventBus,
    pub(crate) renderer: Mutex<Option<Arc<RenderDispatcher>>>,
}

impl DocumentHandle {
    pub fn new(engine: Arc<dyn PdfEngine>, config: Arc<EditorConfig>) -> Self {
        let cache = RenderCache::new(config.render_cache_capacity);
        let observers: Vec<Arc<dyn IndexObserver>> = vec![Arc::new(cache.clone())];
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            engine,
            config,
            state: RwLock::new(None),
            cache,
            observers: RwLock::new(observers),
            events: EventBus::new(),
            renderer: Mutex::new(None),
        }
    }

    /// Handle backed by a private [`LopdfEngine`].
    pub fn with_config(config: EditorConfig) -> Self {
        Self::new(Arc::new(LopdfEngine::new()), Arc::new(config))
    }

    /// New, unopened handle sharing this handle's engine and config.
    pub fn sibling(&self) -> Self {
        Self::new(Arc::clone(&self.engine), Arc::clone(&self.config))
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub(crate) fn shares_engine_with(&self, other: &DocumentHandle) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.engine) as *const (),
            Arc::as_ptr(&other.engine) as *const (),
        )
    }

    /// Channel receiving a [`ChangeEvent`] after each successful mutation.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Register another consumer of page index changes. The render cache is
    /// always registered first.
    pub fn add_observer(&self, observer: Arc<dyn IndexObserver>) {
        self.observers.write().unwrap().push(observer);
    }

    /// Open `path`, replacing nothing: fails if a document is already open.
    pub fn open(&self, path: impl AsRef<Path>, password: Option<&str>) -> DocumentResult<()> {
        let path = path.as_ref();
        self.open_source(OpenSource::from(path), Some(path.to_path_buf()), password)
    }

    /// Open a document held in memory. It has no file path until saved.
    pub fn open_bytes(&self, bytes: Vec<u8>, password: Option<&str>) -> DocumentResult<()> {
        self.open_source(OpenSource::Bytes(bytes), None, password)
    }

    fn open_source(
        &self,
        source: OpenSource,
        path: Option<PathBuf>,
        password: Option<&str>,
    ) -> DocumentResult<()> {
        let mut state = self.write_state();
        if state.is_some() {
            return Err(DocumentError::UnsupportedOperation(
                "a document is already open in this handle".to_string(),
            ));
        }

        let handle = match self.engine.open(source, password)? {
            OpenOutcome::Opened(handle) => handle,
            OpenOutcome::NeedsPassword => return Err(DocumentError::AuthenticationRequired),
        };
        let mut document = match Document::load(Arc::clone(&self.engine), handle, path) {
            Ok(document) => document,
            Err(err) => {
                if let Err(close_err) = self.engine.close(handle) {
                    log::warn!("failed to close engine handle {} after load error: {close_err}", handle.raw());
                }
                return Err(err);
            }
        };
        if let Some(password) = password {
            document.security.remember(Password::new(password));
        }

        let page_count = document.pages.len();
        log::info!(
            "opened {} ({page_count} pages)",
            document.path.as_deref().map_or("<memory>".into(), |path| path.display().to_string())
        );
        *state = Some(document);
        self.notify(&mut state, &Effects::none().with_change(IndexChange::Reset));
        drop(state);
        self.events.publish(ChangeEvent::PagesChanged { page_count });
        Ok(())
    }

    /// Start a new, empty, unsaved document.
    pub fn create_new(&self) -> DocumentResult<()> {
        let mut state = self.write_state();
        if state.is_some() {
            return Err(DocumentError::UnsupportedOperation(
                "a document is already open in this handle".to_string(),
            ));
        }
        let handle = self.engine.create()?;
        *state = Some(Document::empty(Arc::clone(&self.engine), handle));
        self.notify(&mut state, &Effects::none().with_change(IndexChange::Reset));
        drop(state);
        log::info!("created new document");
        self.events.publish(ChangeEvent::PagesChanged { page_count: 0 });
        Ok(())
    }

    /// Install a document built elsewhere (split, extract) into this
    /// unopened handle.
    pub(crate) fn install(&self, document: Document) -> DocumentResult<()> {
        let mut state = self.write_state();
        if state.is_some() {
            document.release();
            return Err(DocumentError::UnsupportedOperation(
                "destination handle already has an open document".to_string(),
            ));
        }
        let page_count = document.pages.len();
        *state = Some(document);
        self.notify(&mut state, &Effects::none().with_change(IndexChange::Reset));
        drop(state);
        self.events.publish(ChangeEvent::PagesChanged { page_count });
        Ok(())
    }

    /// Close the document, dropping its annotations, cached renders, queued
    /// renders, in-memory passwords and codec handle. Unsaved changes are
    /// discarded.
    pub fn close(&self) -> DocumentResult<()> {
        let mut state = self.write_state();
        let document = state.take().ok_or(DocumentError::NoDocumentOpen)?;
        if document.modified {
            log::warn!("closing document with unsaved changes");
        }
        self.notify(&mut state, &Effects::none().with_change(IndexChange::Reset));
        drop(state);

        if let Some(renderer) = self.renderer.lock().unwrap().take() {
            renderer.cancel_all();
        }
        document.release();
        log::info!("closed document");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.read_state().is_some()
    }

    pub fn is_modified(&self) -> DocumentResult<bool> {
        self.read(|doc| Ok(doc.modified))
    }

    pub fn file_path(&self) -> DocumentResult<Option<PathBuf>> {
        self.read(|doc| Ok(doc.path.clone()))
    }

    pub fn page_count(&self) -> DocumentResult<usize> {
        self.read(|doc| Ok(doc.pages.len()))
    }

    pub fn page_info(&self, index: usize) -> DocumentResult<PageInfo> {
        self.read(|doc| doc.page_info(index))
    }

    pub fn all_pages_info(&self) -> DocumentResult<Vec<PageInfo>> {
        self.read(|doc| Ok(doc.pages.iter().map(|(index, _, slot)| PageInfo::new(index, slot)).collect()))
    }

    /// Save to `path`, or to the current file path when `None`.
    ///
    /// Saving under a new path makes it the document's path. Either way the
    /// modified flag is cleared.
    pub fn save(&self, path: Option<&Path>, options: &WriteOptions) -> DocumentResult<()> {
        let mut state = self.write_state();
        let doc = state.as_mut().ok_or(DocumentError::NoDocumentOpen)?;
        let target = match path {
            Some(path) => path.to_path_buf(),
            None => doc.path.clone().ok_or_else(|| {
                DocumentError::UnsupportedOperation("document has no file path yet".to_string())
            })?,
        };

        doc.write_to(&target, options)?;
        log::info!("saved {} ({} pages)", target.display(), doc.pages.len());
        doc.path = Some(target);
        doc.modified = false;
        Ok(())
    }

    /// Write a copy without changing the document's path or modified flag.
    pub fn save_copy(&self, path: impl AsRef<Path>, options: &WriteOptions) -> DocumentResult<()> {
        let path = path.as_ref();
        // Syncing the codec mutates engine state, so take the write side.
        let state = self.write_state();
        let doc = state.as_ref().ok_or(DocumentError::NoDocumentOpen)?;
        doc.write_to(path, options)?;
        log::info!("saved copy to {}", path.display());
        Ok(())
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, Option<Document>> {
        self.state.read().unwrap()
    }

    pub(crate) fn write_state(&self) -> RwLockWriteGuard<'_, Option<Document>> {
        self.state.write().unwrap()
    }

    /// Run a read-only query against the open document.
    pub(crate) fn read<T>(&self, query: impl FnOnce(&Document) -> DocumentResult<T>) -> DocumentResult<T> {
        let state = self.read_state();
        let doc = state.as_ref().ok_or(DocumentError::NoDocumentOpen)?;
        query(doc)
    }

    /// Run a mutation under the write lock and apply its effects.
    ///
    /// A failing operation returns before any effect is applied; operations
    /// validate before touching the codec so there is nothing to undo.
    pub(crate) fn mutate<T>(
        &self,
        operation: impl FnOnce(&mut Document) -> DocumentResult<(T, Effects)>,
    ) -> DocumentResult<T> {
        let mut state = self.write_state();
        let doc = state.as_mut().ok_or(DocumentError::NoDocumentOpen)?;
        let (value, effects) = operation(doc)?;
        self.notify(&mut state, &effects);
        drop(state);
        self.publish(effects);
        Ok(value)
    }

    /// Apply the lock-scoped part of `effects`: the modified flag and index
    /// observers. Must be called with the write lock held.
    pub(crate) fn notify(&self, state: &mut Option<Document>, effects: &Effects) {
        if let Some(doc) = state.as_mut() {
            doc.modified |= effects.modified;
        }
        let observers = self.observers.read().unwrap();
        for change in &effects.changes {
            for observer in observers.iter() {
                observer.on_index_change(change);
            }
        }
    }

    /// Apply the rest of `effects` once the lock is released.
    pub(crate) fn publish(&self, effects: Effects) {
        if !effects.removed_pages.is_empty() {
            if let Some(renderer) = self.renderer.lock().unwrap().as_ref() {
                renderer.cancel_pages(&effects.removed_pages);
            }
        }
        for event in effects.events {
            self.events.publish(event);
        }
    }
}

impl Default for DocumentHandle {
    fn default() -> Self {
        Self::with_config(EditorConfig::default())
    }
}

impl Drop for DocumentHandle {
    fn drop(&mut self) {
        let document = self.state.get_mut().map(Option::take).unwrap_or_else(|poisoned| {
            poisoned.into_inner().take()
        });
        if let Some(document) = document {
            document.release();
        }
    }
}

impl std::fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read_state();
        f.debug_struct("DocumentHandle")
            .field("id", &self.id)
            .field("open", &state.is_some())
            .field("pages", &state.as_ref().map(|doc| doc.pages.len()))
            .field("cache", &self.cache)
            .finish()
    }
}
