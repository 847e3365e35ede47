//! Folio document model
//!
//! Page sequence, annotations, bookmarks and metadata of open PDF
//! documents, the structural operations that edit them, and a render
//! cache kept coherent with every edit. File parsing, writing and
//! rasterization are delegated to a [`folio_engine::PdfEngine`].

pub mod annotation;
pub mod config;
pub mod content;
pub mod document;
pub mod error;
pub mod events;
pub mod merge_split;
pub mod metadata;
pub mod ocr;
pub mod page_index;
mod pages;
pub mod render;
pub mod security;

pub use annotation::{
    Annotation, AnnotationGeometry, AnnotationId, AnnotationKind, AnnotationStyle, Color,
    PageCoordinate,
};
pub use config::{ConfigError, EditorConfig, PageSize, TocSplitPolicy};
pub use content::{TextMatch, TextWatermark};
pub use document::{DocumentHandle, PageInfo};
pub use error::{DocumentError, DocumentResult};
pub use events::ChangeEvent;
pub use metadata::{DocumentMetadata, TocDestination, TocEntry, TocTarget};
pub use page_index::InsertPosition;
pub use pages::PageId;
pub use render::{IndexObserver, RenderTicket, RenderedPage};
pub use security::Password;

pub use folio_cache::{CacheStats, IndexChange, PageBuffer};
pub use folio_engine::{
    EncryptionMethod, ImageData, OcrEngine, PageImage, PageSpec, PdfEngine, Permissions, Rotation,
    TextRun, WriteOptions,
};
pub use folio_scheduler::JobPriority;
