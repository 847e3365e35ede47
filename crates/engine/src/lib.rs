//! Codec and rasterizer boundary for the folio document model.
//!
//! The document model never parses file bytes itself. Everything it needs
//! from the on-disk format goes through [`PdfEngine`]; text recognition goes
//! through [`OcrEngine`]. [`LopdfEngine`] is the bundled codec adapter.

mod content;
mod lopdf_engine;
mod outline;
mod page_tree;
mod security;

use image::{ImageBuffer, Rgba};
use std::path::{Path, PathBuf};

pub use lopdf_engine::LopdfEngine;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Default page size for new blank pages (A4 in points).
pub const DEFAULT_PAGE_WIDTH: f32 = 595.0;
pub const DEFAULT_PAGE_HEIGHT: f32 = 842.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(u64);

impl EngineHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Stable reference to a page inside the engine's page tree.
///
/// Survives reordering within the same document. It is never valid for a
/// different engine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageRef {
    object: u32,
    generation: u16,
}

impl PageRef {
    pub(crate) fn from_object_id(id: lopdf::ObjectId) -> Self {
        Self { object: id.0, generation: id.1 }
    }

    pub(crate) fn object_id(self) -> lopdf::ObjectId {
        (self.object, self.generation)
    }
}

/// Quarter-turn page rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Normalizes any multiple of 90 (negative values included) into a rotation.
    ///
    /// Returns `None` when `degrees` is not a multiple of 90.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        if degrees % 90 != 0 {
            return None;
        }
        match degrees.rem_euclid(360) {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Adds another rotation clockwise.
    pub fn rotate_by(self, other: Rotation) -> Rotation {
        let total = i32::from(self.degrees()) + i32::from(other.degrees());
        Self::from_degrees(total).unwrap_or_default()
    }

    pub fn is_sideways(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

/// Page size in points plus the page's own /Rotate value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
    pub rotation: Rotation,
}

impl PageGeometry {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height, rotation: Rotation::Deg0 }
    }

    /// Size as displayed, after applying the page rotation.
    pub fn display_size(&self) -> (f32, f32) {
        if self.rotation.is_sideways() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

/// Description of a page to create.
#[derive(Debug, Clone, PartialEq)]
pub enum PageSpec {
    Blank { width: f32, height: f32 },
}

impl Default for PageSpec {
    fn default() -> Self {
        Self::Blank { width: DEFAULT_PAGE_WIDTH, height: DEFAULT_PAGE_HEIGHT }
    }
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened(EngineHandle),
    NeedsPassword,
}

bitflags::bitflags! {
    /// PDF permission bits (ISO 32000 table 22 positions).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u32 {
        const PRINT = 1 << 2;
        const MODIFY = 1 << 3;
        const COPY = 1 << 4;
        const ANNOTATE = 1 << 5;
        const FORM = 1 << 8;
        const ACCESSIBILITY = 1 << 9;
        const ASSEMBLE = 1 << 10;
        const PRINT_HQ = 1 << 11;
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::all()
    }
}

/// Standard security handler variants the engine can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionMethod {
    /// 40-bit RC4, revision 2.
    Rc4_40,
    /// 128-bit RC4, revision 3.
    #[default]
    Rc4_128,
}

#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionSettings {
    pub user_password: String,
    pub owner_password: String,
    pub permissions: Permissions,
    pub method: EncryptionMethod,
}

impl std::fmt::Debug for EncryptionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionSettings")
            .field("user_password", &"<redacted>")
            .field("owner_password", &"<redacted>")
            .field("permissions", &self.permissions)
            .field("method", &self.method)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOptions {
    /// Drop unreferenced objects before writing.
    pub garbage: bool,
    /// Compress streams.
    pub deflate: bool,
    /// Ask for an incremental save. Backends that cannot append updates
    /// fall back to a full rewrite.
    pub incremental: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { garbage: true, deflate: true, incremental: false }
    }
}

/// Document information dictionary fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoFields {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<String>,
    pub modification_date: Option<String>,
}

/// Explicit /XYZ destination details of an outline entry.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutlineDestination {
    pub left: Option<f32>,
    pub top: Option<f32>,
    pub zoom: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutlineItem {
    /// 1-based nesting depth.
    pub level: u32,
    pub title: String,
    pub page: PageRef,
    pub destination: Option<OutlineDestination>,
}

/// Annotation as handed to the codec for writing into a page's /Annots.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationAppearance {
    /// PDF annotation subtype name, e.g. `Highlight` or `Ink`.
    pub subtype: String,
    /// Bounding rectangle `[x0, y0, x1, y1]` in page space.
    pub rect: [f32; 4],
    pub color: Option<[f32; 3]>,
    pub interior_color: Option<[f32; 3]>,
    pub border_width: f32,
    pub opacity: f32,
    pub contents: Option<String>,
    pub author: Option<String>,
    /// Line endpoints `[x0, y0, x1, y1]` for line annotations.
    pub line: Option<[f32; 4]>,
    /// Stroke paths for ink annotations.
    pub ink: Vec<Vec<(f32, f32)>>,
    /// Unique name written to /NM.
    pub name: String,
}

/// Visible text drawn into a page's content in Helvetica.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    /// Baseline origin in page space.
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
    pub color: [f32; 3],
    pub opacity: f32,
    /// Counter-clockwise rotation about the origin, in degrees.
    pub angle: f32,
}

impl TextRun {
    pub fn new(text: impl Into<String>, x: f32, y: f32) -> Self {
        Self { text: text.into(), x, y, font_size: 12.0, color: [0.0; 3], opacity: 1.0, angle: 0.0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageData {
    /// Stream bytes of a self-contained file format.
    Encoded { extension: &'static str, bytes: Vec<u8> },
    /// Raw samples decoded to pixels.
    Pixels(RgbaImage),
}

/// An image XObject drawn on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    pub width: u32,
    pub height: u32,
    pub color_space: Option<String>,
    pub bits_per_component: Option<u8>,
    pub data: ImageData,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {0:?} does not belong to this document")]
    UnknownPage(PageRef),
    #[error("position {position} out of range (page_count={page_count})")]
    PositionOutOfRange { position: usize, page_count: usize },
    #[error("corrupt document: {0}")]
    Corrupt(String),
    #[error("incorrect password")]
    AuthenticationFailed,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Operations the document model needs from the file-format codec and
/// rasterizer.
///
/// All methods take `&self`; implementations synchronize internally so one
/// engine can be shared across documents and render workers.
pub trait PdfEngine: Send + Sync {
    fn open(&self, source: OpenSource, password: Option<&str>) -> EngineResult<OpenOutcome>;
    fn create(&self) -> EngineResult<EngineHandle>;
    fn close(&self, handle: EngineHandle) -> EngineResult<()>;

    /// Pages in page-tree order.
    fn page_refs(&self, handle: EngineHandle) -> EngineResult<Vec<PageRef>>;
    fn page_count(&self, handle: EngineHandle) -> EngineResult<usize> {
        Ok(self.page_refs(handle)?.len())
    }
    fn page_geometry(&self, handle: EngineHandle, page: PageRef) -> EngineResult<PageGeometry>;
    /// Renders a page at `zoom` pixels per point. Zooms that are not
    /// finite and positive, or that exceed the engine's raster size limit,
    /// fail with [`EngineError::InvalidArgument`].
    fn rasterize(
        &self,
        handle: EngineHandle,
        page: PageRef,
        zoom: f32,
        rotation: Rotation,
    ) -> EngineResult<RgbaImage>;

    fn insert_page(
        &self,
        handle: EngineHandle,
        position: usize,
        spec: &PageSpec,
    ) -> EngineResult<PageRef>;
    /// Removes all listed pages or none of them.
    fn delete_pages(&self, handle: EngineHandle, pages: &[PageRef]) -> EngineResult<()>;
    fn move_page(&self, handle: EngineHandle, page: PageRef, to: usize) -> EngineResult<()>;
    fn set_rotation(
        &self,
        handle: EngineHandle,
        page: PageRef,
        rotation: Rotation,
    ) -> EngineResult<()>;
    /// Adds an invisible text layer to a page.
    fn insert_text(&self, handle: EngineHandle, page: PageRef, text: &str) -> EngineResult<()>;
    /// Appends visible text to a page's content.
    fn add_text(&self, handle: EngineHandle, page: PageRef, run: &TextRun) -> EngineResult<()>;
    /// Draws `image` stretched over `rect` (`[x0, y0, x1, y1]`) on top of
    /// the page content.
    fn insert_image(
        &self,
        handle: EngineHandle,
        page: PageRef,
        image: &RgbaImage,
        rect: [f32; 4],
        opacity: f32,
    ) -> EngineResult<()>;
    /// Text shown by a page's content streams, one line per text object.
    fn page_text(&self, handle: EngineHandle, page: PageRef) -> EngineResult<String>;
    /// Image XObjects in a page's resources.
    fn page_images(&self, handle: EngineHandle, page: PageRef) -> EngineResult<Vec<PageImage>>;

    /// Copies `pages` (with everything they reference) from `src` into `dst`
    /// at `dst_position`, in the order given. Either every page is copied or
    /// the destination is left untouched. `src` may equal `dst`.
    fn transplant_pages(
        &self,
        src: EngineHandle,
        dst: EngineHandle,
        pages: &[PageRef],
        dst_position: usize,
    ) -> EngineResult<Vec<PageRef>>;

    fn apply_encryption(
        &self,
        handle: EngineHandle,
        settings: Option<&EncryptionSettings>,
    ) -> EngineResult<()>;
    fn is_encrypted(&self, handle: EngineHandle) -> EngineResult<bool>;
    /// Checks a user or owner password against the handle's encryption.
    fn authenticate(&self, handle: EngineHandle, password: &str) -> EngineResult<bool>;
    /// Permission flags of the handle's encryption, if any.
    fn permissions(&self, handle: EngineHandle) -> EngineResult<Option<Permissions>>;

    fn metadata(&self, handle: EngineHandle) -> EngineResult<InfoFields>;
    fn set_metadata(&self, handle: EngineHandle, info: &InfoFields) -> EngineResult<()>;
    fn outline(&self, handle: EngineHandle) -> EngineResult<Vec<OutlineItem>>;
    fn set_outline(&self, handle: EngineHandle, items: &[OutlineItem]) -> EngineResult<()>;
    /// Annotations on `page` with a subtype the editor models.
    ///
    /// Returned annotations become owned by the caller: the next
    /// [`set_annotations`](Self::set_annotations) for the page replaces
    /// them. Other annotations (links, widgets) are left alone.
    fn annotations(&self, handle: EngineHandle, page: PageRef) -> EngineResult<Vec<AnnotationAppearance>>;
    fn set_annotations(
        &self,
        handle: EngineHandle,
        page: PageRef,
        annotations: &[AnnotationAppearance],
    ) -> EngineResult<()>;

    fn write(&self, handle: EngineHandle, path: &Path, options: &WriteOptions) -> EngineResult<()>;
}

/// Text recognition collaborator.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &RgbaImage, language: &str) -> EngineResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_normalizes_negative_degrees() {
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::Deg270));
        assert_eq!(Rotation::from_degrees(-180), Some(Rotation::Deg180));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::Deg90));
        assert_eq!(Rotation::from_degrees(720), Some(Rotation::Deg0));
        assert_eq!(Rotation::from_degrees(45), None);
    }

    #[test]
    fn rotation_adds_clockwise() {
        assert_eq!(Rotation::Deg270.rotate_by(Rotation::Deg180), Rotation::Deg90);
        assert_eq!(Rotation::Deg0.rotate_by(Rotation::Deg0), Rotation::Deg0);
    }

    #[test]
    fn display_size_swaps_for_sideways_pages() {
        let mut geometry = PageGeometry::new(100.0, 200.0);
        assert_eq!(geometry.display_size(), (100.0, 200.0));
        geometry.rotation = Rotation::Deg90;
        assert_eq!(geometry.display_size(), (200.0, 100.0));
    }

    #[test]
    fn encryption_settings_debug_hides_passwords() {
        let settings = EncryptionSettings {
            user_password: "hunter2".to_owned(),
            owner_password: "sekrit".to_owned(),
            permissions: Permissions::PRINT,
            method: EncryptionMethod::Rc4_128,
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("sekrit"));
    }
}
